//! Point cloud readers.
//!
//! A reader scans the input files once up front (bounds, counts, portions)
//! and then streams the raw points of one portion per read job.

mod xyz;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glam::DVec3;

use crate::error::{ConfigError, TilerError};
use crate::octree::DAabb3;

pub use xyz::XyzReader;

/// Byte range of one input file handled by a single read job.
#[derive(Clone, Debug, PartialEq)]
pub struct FilePortion {
  pub path: PathBuf,
  /// Inclusive start byte, aligned on a record boundary.
  pub start: u64,
  /// Exclusive end byte, aligned on a record boundary.
  pub end: u64,
  /// Ordinal of the first record of the range within its file.
  pub first_ordinal: u64,
  /// 1-based line number of the byte at `start`, for error reports.
  pub first_line: u64,
  /// Points the portion yields after sampling.
  pub point_count: u64,
  /// Factor bringing this file's color components into 0..=255.
  pub color_scale: Option<f64>,
}

/// Point as found in the input, before any transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawPoint {
  pub position: DVec3,
  pub color: [u16; 3],
}

/// Input statistics gathered before scheduling.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanInfo {
  /// Bounds of the sampled points, in input coordinates.
  pub aabb: DAabb3,
  pub point_count: u64,
  /// Average of the per-file minimum corners.
  pub avg_min: DVec3,
  pub portions: Vec<FilePortion>,
  /// Coordinate reference system declared by the input, if any.
  pub srs_in: Option<String>,
  pub has_color: bool,
}

pub type RawPoints<'a> = Box<dyn Iterator<Item = Result<RawPoint, TilerError>> + Send + 'a>;

pub trait PointReader: Send + Sync {
  /// Lowercase file extensions handled by this reader.
  fn extensions(&self) -> &'static [&'static str];

  fn scan(&self, files: &[PathBuf]) -> Result<ScanInfo, TilerError>;

  /// Lazy, finite iterator over the sampled points of `portion`.
  fn read(&self, portion: &FilePortion) -> Result<RawPoints<'_>, TilerError>;
}

fn extension_of(path: &Path) -> String {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase)
    .unwrap_or_default()
}

/// Common extension of every input, or a configuration error.
pub fn common_extension(files: &[PathBuf]) -> Result<String, ConfigError> {
  if files.is_empty() {
    return Err(ConfigError::NoInput);
  }
  let extensions: BTreeSet<String> = files.iter().map(|f| extension_of(f)).collect();
  if extensions.len() > 1 {
    return Err(ConfigError::MixedExtensions(extensions.into_iter().collect()));
  }
  Ok(extensions.into_iter().next().unwrap_or_default())
}

/// Default reader for an input extension.
pub fn reader_for_extension(extension: &str, fraction: u8) -> Result<Box<dyn PointReader>, ConfigError> {
  let reader = XyzReader::new(fraction)?;
  if reader.extensions().contains(&extension) {
    Ok(Box::new(reader))
  } else {
    Err(ConfigError::UnsupportedExtension(extension.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_common_extension() {
    let files = vec![PathBuf::from("a.XYZ"), PathBuf::from("b.xyz")];
    assert_eq!(common_extension(&files).unwrap(), "xyz");
  }

  #[test]
  fn test_mixed_extensions_rejected() {
    let files = vec![PathBuf::from("a.las"), PathBuf::from("b.xyz")];
    match common_extension(&files) {
      Err(ConfigError::MixedExtensions(found)) => assert_eq!(found, vec!["las", "xyz"]),
      other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(common_extension(&[]), Err(ConfigError::NoInput)));
  }

  #[test]
  fn test_reader_lookup() {
    assert!(reader_for_extension("txt", 100).is_ok());
    assert!(matches!(
      reader_for_extension("laz", 100),
      Err(ConfigError::UnsupportedExtension(_))
    ));
  }
}
