//! 3D Tiles point cloud (`pnts`) codec.
//!
//! ```text
//! header (28 bytes, little-endian u32s)
//!   magic "pnts" | version 1 | byteLength | ftJSON len | ftBinary len | 0 | 0
//! feature table JSON, space padded so the binary starts on 8 bytes
//! feature table binary: POSITION (f32 x3 per point) [RGB (u8 x3 per point)], zero padded to 8
//! ```

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::TileCodec;
use crate::error::CodecError;
use crate::points::Point;

const MAGIC: [u8; 4] = *b"pnts";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 28;
const POSITION_STRIDE: usize = 12;
const RGB_STRIDE: usize = 3;
const DEFAULT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Clone, Copy, Debug)]
pub struct PntsCodec {
  pub include_rgb: bool,
}

impl PntsCodec {
  pub fn new(include_rgb: bool) -> Self {
    Self { include_rgb }
  }
}

impl Default for PntsCodec {
  fn default() -> Self {
    Self::new(true)
  }
}

#[derive(Serialize, Deserialize)]
struct BinaryRef {
  #[serde(rename = "byteOffset")]
  byte_offset: usize,
}

#[derive(Serialize, Deserialize)]
struct FeatureTable {
  #[serde(rename = "POINTS_LENGTH")]
  points_length: usize,
  #[serde(rename = "POSITION")]
  position: BinaryRef,
  #[serde(rename = "RGB", skip_serializing_if = "Option::is_none", default)]
  rgb: Option<BinaryRef>,
}

fn pad_to_8(len: usize) -> usize {
  (8 - len % 8) % 8
}

fn checked_u32(v: usize) -> Result<u32, CodecError> {
  u32::try_from(v).map_err(|_| CodecError::TooLarge)
}

/// Sub-slice of `n` records of `stride` bytes starting at `offset`.
///
/// Offsets and counts come from the tile itself, so every bound is checked.
fn section(binary: &[u8], offset: usize, stride: usize, n: usize) -> Result<&[u8], CodecError> {
  let end = stride
    .checked_mul(n)
    .and_then(|len| len.checked_add(offset))
    .ok_or(CodecError::TooLarge)?;
  binary.get(offset..end).ok_or(CodecError::Truncated {
    needed: end,
    available: binary.len(),
  })
}

impl TileCodec for PntsCodec {
  fn extension(&self) -> &'static str {
    ".pnts"
  }

  fn encode(&self, points: &[Point]) -> Result<Vec<u8>, CodecError> {
    let n = points.len();
    let table = FeatureTable {
      points_length: n,
      position: BinaryRef { byte_offset: 0 },
      rgb: self.include_rgb.then_some(BinaryRef {
        byte_offset: POSITION_STRIDE * n,
      }),
    };
    let mut json =
      serde_json::to_vec(&table).map_err(|e| CodecError::FeatureTable(e.to_string()))?;
    json.resize(json.len() + pad_to_8(HEADER_LEN + json.len()), b' ');

    let mut binary = Vec::with_capacity(n * (POSITION_STRIDE + RGB_STRIDE) + 8);
    for p in points {
      for v in p.position {
        binary.write_f32::<LittleEndian>(v)?;
      }
    }
    if self.include_rgb {
      for p in points {
        binary.write_all(&p.color)?;
      }
    }
    binary.resize(binary.len() + pad_to_8(binary.len()), 0);

    let total = HEADER_LEN + json.len() + binary.len();
    let mut out = Vec::with_capacity(total);
    out.write_all(&MAGIC)?;
    out.write_u32::<LittleEndian>(VERSION)?;
    out.write_u32::<LittleEndian>(checked_u32(total)?)?;
    out.write_u32::<LittleEndian>(checked_u32(json.len())?)?;
    out.write_u32::<LittleEndian>(checked_u32(binary.len())?)?;
    // batch table JSON and binary
    out.write_u32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_all(&json)?;
    out.write_all(&binary)?;
    Ok(out)
  }

  fn decode(&self, bytes: &[u8]) -> Result<Vec<Point>, CodecError> {
    if bytes.len() < HEADER_LEN {
      return Err(CodecError::Truncated {
        needed: HEADER_LEN,
        available: bytes.len(),
      });
    }
    let mut header = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    header.read_exact(&mut magic)?;
    if magic != MAGIC {
      return Err(CodecError::BadMagic(magic));
    }
    let version = header.read_u32::<LittleEndian>()?;
    if version != VERSION {
      return Err(CodecError::UnsupportedVersion(version));
    }
    let _byte_length = header.read_u32::<LittleEndian>()?;
    let json_len = header.read_u32::<LittleEndian>()? as usize;
    let binary_len = header.read_u32::<LittleEndian>()? as usize;
    let needed = HEADER_LEN
      .checked_add(json_len)
      .and_then(|v| v.checked_add(binary_len))
      .ok_or(CodecError::TooLarge)?;
    if bytes.len() < needed {
      return Err(CodecError::Truncated {
        needed,
        available: bytes.len(),
      });
    }

    let json = &bytes[HEADER_LEN..HEADER_LEN + json_len];
    let table: FeatureTable =
      serde_json::from_slice(json).map_err(|e| CodecError::FeatureTable(e.to_string()))?;
    let binary = &bytes[HEADER_LEN + json_len..needed];
    let n = table.points_length;

    let mut positions = Cursor::new(section(
      binary,
      table.position.byte_offset,
      POSITION_STRIDE,
      n,
    )?);
    let mut colors = match &table.rgb {
      Some(rgb) => Some(section(binary, rgb.byte_offset, RGB_STRIDE, n)?.chunks_exact(RGB_STRIDE)),
      None => None,
    };

    let mut points = Vec::with_capacity(n);
    for _ in 0..n {
      let position = [
        positions.read_f32::<LittleEndian>()?,
        positions.read_f32::<LittleEndian>()?,
        positions.read_f32::<LittleEndian>()?,
      ];
      let color = match colors.as_mut().and_then(Iterator::next) {
        Some(c) => [c[0], c[1], c[2]],
        None => DEFAULT_COLOR,
      };
      points.push(Point::new(position, color));
    }
    Ok(points)
  }
}

#[cfg(test)]
mod tests {
  use byteorder::ByteOrder;

  use super::*;

  fn le_u32(bytes: &[u8], at: usize) -> u32 {
    LittleEndian::read_u32(&bytes[at..at + 4])
  }

  /// Well formed header around an arbitrary feature table.
  fn tile_with_table(table: &str, binary_len: usize) -> Vec<u8> {
    let mut json = table.as_bytes().to_vec();
    json.resize(json.len() + pad_to_8(HEADER_LEN + json.len()), b' ');
    let total = HEADER_LEN + json.len() + binary_len;
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    for v in [VERSION, total as u32, json.len() as u32, binary_len as u32, 0, 0] {
      out.write_u32::<LittleEndian>(v).unwrap();
    }
    out.extend_from_slice(&json);
    out.resize(total, 0);
    out
  }

  fn sample() -> Vec<Point> {
    vec![
      Point::new([0.0, 1.0, 2.0], [1, 2, 3]),
      Point::new([-5.5, 0.25, 100.0], [250, 128, 0]),
      Point::new([3.0, 3.0, 3.0], [9, 9, 9]),
    ]
  }

  #[test]
  fn test_layout_is_aligned() {
    let bytes = PntsCodec::new(true).encode(&sample()).unwrap();
    assert_eq!(&bytes[0..4], b"pnts");
    assert_eq!(le_u32(&bytes, 4), 1);
    assert_eq!(le_u32(&bytes, 8) as usize, bytes.len());
    let json_len = le_u32(&bytes, 12) as usize;
    assert_eq!((HEADER_LEN + json_len) % 8, 0);
    assert_eq!(bytes.len() % 8, 0);
    // 3 points: 36 position bytes + 9 color bytes, padded to 48
    assert_eq!(le_u32(&bytes, 16), 48);
    let json = std::str::from_utf8(&bytes[HEADER_LEN..HEADER_LEN + json_len]).unwrap();
    assert!(json.starts_with("{\"POINTS_LENGTH\":3"));
  }

  #[test]
  fn test_decode_restores_points() {
    let codec = PntsCodec::new(true);
    let bytes = codec.encode(&sample()).unwrap();
    assert_eq!(codec.decode(&bytes).unwrap(), sample());
  }

  #[test]
  fn test_without_rgb() {
    let codec = PntsCodec::new(false);
    let bytes = codec.encode(&sample()).unwrap();
    let decoded = codec.decode(&bytes).unwrap();
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[1].position, [-5.5, 0.25, 100.0]);
    assert_eq!(decoded[1].color, DEFAULT_COLOR);
  }

  #[test]
  fn test_rejects_corrupt_payloads() {
    let codec = PntsCodec::default();
    let mut bytes = codec.encode(&sample()).unwrap();
    assert!(matches!(
      codec.decode(&bytes[..20]),
      Err(CodecError::Truncated { .. })
    ));
    assert!(matches!(
      codec.decode(&bytes[..bytes.len() - 8]),
      Err(CodecError::Truncated { .. })
    ));
    bytes[0] = b'b';
    assert!(matches!(codec.decode(&bytes), Err(CodecError::BadMagic(_))));
  }

  #[test]
  fn test_empty_tile() {
    let codec = PntsCodec::default();
    let bytes = codec.encode(&[]).unwrap();
    assert!(codec.decode(&bytes).unwrap().is_empty());
  }

  /// Counts and offsets read from the feature table never overflow.
  #[test]
  fn test_forged_points_length_is_rejected() {
    let codec = PntsCodec::default();
    let huge = format!(
      "{{\"POINTS_LENGTH\":{},\"POSITION\":{{\"byteOffset\":0}}}}",
      usize::MAX / 4
    );
    assert!(matches!(
      codec.decode(&tile_with_table(&huge, 16)),
      Err(CodecError::TooLarge)
    ));

    let far = format!(
      "{{\"POINTS_LENGTH\":1,\"POSITION\":{{\"byteOffset\":0}},\"RGB\":{{\"byteOffset\":{}}}}}",
      usize::MAX
    );
    assert!(matches!(
      codec.decode(&tile_with_table(&far, 16)),
      Err(CodecError::TooLarge)
    ));

    let short = "{\"POINTS_LENGTH\":10,\"POSITION\":{\"byteOffset\":0}}";
    assert!(matches!(
      codec.decode(&tile_with_table(short, 16)),
      Err(CodecError::Truncated { needed: 120, available: 16 })
    ));
  }
}
