//! Plain text `x y z [r g b]` reader for `.xyz` / `.txt` clouds.
//!
//! Fields are separated by whitespace or commas. Blank lines and lines
//! starting with `#` are skipped. Columns beyond the sixth are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use glam::DVec3;
use tracing::debug;

use super::{FilePortion, PointReader, RawPoint, RawPoints, ScanInfo};
use crate::constants::PORTION_POINTS;
use crate::error::{ConfigError, TilerError};
use crate::octree::DAabb3;

const DEFAULT_COLOR: [u16; 3] = [255, 255, 255];

#[derive(Clone, Debug)]
pub struct XyzReader {
  /// Percentage of points kept, 1..=100.
  fraction: u8,
  /// Max records per portion.
  portion_points: u64,
}

impl XyzReader {
  pub fn new(fraction: u8) -> Result<Self, ConfigError> {
    if fraction == 0 || fraction > 100 {
      return Err(ConfigError::InvalidFraction(fraction));
    }
    Ok(Self {
      fraction,
      portion_points: PORTION_POINTS,
    })
  }

  /// Override the portion size; mostly useful to exercise partitioning.
  pub fn with_portion_points(mut self, portion_points: u64) -> Self {
    self.portion_points = portion_points.max(1);
    self
  }

  #[inline]
  fn keeps(&self, ordinal: u64) -> bool {
    let fraction = self.fraction as u64;
    (ordinal * fraction) % 100 < fraction
  }
}

/// Outcome of parsing one line.
enum Line {
  Skip,
  Record(RawPoint, bool),
}

fn parse_line(line: &str) -> Result<Line, String> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return Ok(Line::Skip);
  }
  let fields: Vec<&str> = trimmed
    .split(|c: char| c.is_whitespace() || c == ',')
    .filter(|f| !f.is_empty())
    .collect();
  if fields.len() < 3 {
    return Err(format!("expected at least 3 columns, found {}", fields.len()));
  }
  let number = |i: usize| {
    fields[i]
      .parse::<f64>()
      .map_err(|_| format!("column {} is not a number: '{}'", i + 1, fields[i]))
  };
  let position = DVec3::new(number(0)?, number(1)?, number(2)?);
  if fields.len() >= 6 {
    let channel = |i: usize| number(i).map(|v| v.round().clamp(0.0, u16::MAX as f64) as u16);
    let color = [channel(3)?, channel(4)?, channel(5)?];
    Ok(Line::Record(RawPoint { position, color }, true))
  } else {
    Ok(Line::Record(
      RawPoint {
        position,
        color: DEFAULT_COLOR,
      },
      false,
    ))
  }
}

struct FileScan {
  aabb: Option<DAabb3>,
  portions: Vec<FilePortion>,
  point_count: u64,
  max_color: u16,
  has_color: bool,
}

impl XyzReader {
  fn scan_file(&self, path: &Path) -> Result<FileScan, TilerError> {
    let file = File::open(path).map_err(|e| TilerError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut scan = FileScan {
      aabb: None,
      portions: Vec::new(),
      point_count: 0,
      max_color: 0,
      has_color: false,
    };

    let mut line = String::new();
    let mut offset = 0u64;
    let mut line_no = 0u64;
    let mut ordinal = 0u64;
    // (start byte, first line, first ordinal, kept points) of the portion being built
    let mut current: Option<(u64, u64, u64, u64)> = None;

    loop {
      line.clear();
      let read = reader
        .read_line(&mut line)
        .map_err(|e| TilerError::io(path, e))?;
      if read == 0 {
        break;
      }
      let line_start = offset;
      offset += read as u64;
      line_no += 1;

      let record = parse_line(&line).map_err(|message| TilerError::Parse {
        file: path.to_path_buf(),
        line: line_no,
        message,
      })?;
      let Line::Record(point, has_color) = record else {
        continue;
      };

      let (start, first_line, first, kept) =
        current.get_or_insert((line_start, line_no, ordinal, 0));
      if self.keeps(ordinal) {
        *kept += 1;
        scan.point_count += 1;
        scan.aabb = Some(match scan.aabb {
          Some(mut aabb) => {
            aabb.include(point.position);
            aabb
          }
          None => DAabb3::new(point.position, point.position),
        });
        if has_color {
          scan.has_color = true;
          scan.max_color = scan.max_color.max(point.color.into_iter().max().unwrap_or(0));
        }
      }
      ordinal += 1;

      if ordinal - *first >= self.portion_points {
        scan.portions.push(FilePortion {
          path: path.to_path_buf(),
          start: *start,
          end: offset,
          first_ordinal: *first,
          first_line: *first_line,
          point_count: *kept,
          color_scale: None,
        });
        current = None;
      }
    }

    if let Some((start, first_line, first, kept)) = current {
      scan.portions.push(FilePortion {
        path: path.to_path_buf(),
        start,
        end: offset,
        first_ordinal: first,
        first_line,
        point_count: kept,
        color_scale: None,
      });
    }
    scan.portions.retain(|p| p.point_count > 0);
    // 16-bit colors are scaled per file; 8-bit files next to them stay as is.
    let color_scale = (scan.max_color > 255).then_some(1.0 / 256.0);
    for portion in &mut scan.portions {
      portion.color_scale = color_scale;
    }
    Ok(scan)
  }
}

impl PointReader for XyzReader {
  fn extensions(&self) -> &'static [&'static str] {
    &["xyz", "txt"]
  }

  fn scan(&self, files: &[PathBuf]) -> Result<ScanInfo, TilerError> {
    let mut aabb: Option<DAabb3> = None;
    let mut min_sum = DVec3::ZERO;
    let mut files_with_points = 0u32;
    let mut portions = Vec::new();
    let mut point_count = 0;
    let mut has_color = false;

    for path in files {
      let scan = self.scan_file(path)?;
      debug!(
        file = %path.display(),
        points = scan.point_count,
        portions = scan.portions.len(),
        "scanned input file"
      );
      if let Some(file_aabb) = scan.aabb {
        min_sum += file_aabb.min;
        files_with_points += 1;
        aabb = Some(match aabb {
          Some(acc) => acc.union(&file_aabb),
          None => file_aabb,
        });
      }
      portions.extend(scan.portions);
      point_count += scan.point_count;
      has_color |= scan.has_color;
    }

    let aabb = aabb.ok_or(ConfigError::EmptyInput)?;
    Ok(ScanInfo {
      aabb,
      point_count,
      avg_min: min_sum / files_with_points as f64,
      portions,
      srs_in: None,
      has_color,
    })
  }

  fn read(&self, portion: &FilePortion) -> Result<RawPoints<'_>, TilerError> {
    let mut file = File::open(&portion.path).map_err(|e| TilerError::io(&portion.path, e))?;
    file
      .seek(SeekFrom::Start(portion.start))
      .map_err(|e| TilerError::io(&portion.path, e))?;
    let lines = BufReader::new(file.take(portion.end - portion.start)).lines();
    Ok(Box::new(XyzPoints {
      reader: self.clone(),
      path: portion.path.clone(),
      lines,
      line: portion.first_line.saturating_sub(1),
      ordinal: portion.first_ordinal,
    }))
  }
}

/// Streaming iterator over one portion.
struct XyzPoints {
  reader: XyzReader,
  path: PathBuf,
  lines: std::io::Lines<BufReader<std::io::Take<File>>>,
  /// Line number of the last line read.
  line: u64,
  ordinal: u64,
}

impl Iterator for XyzPoints {
  type Item = Result<RawPoint, TilerError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let line = match self.lines.next()? {
        Ok(line) => line,
        Err(e) => return Some(Err(TilerError::io(&self.path, e))),
      };
      self.line += 1;
      let point = match parse_line(&line) {
        Ok(Line::Skip) => continue,
        Ok(Line::Record(point, _)) => point,
        Err(message) => {
          return Some(Err(TilerError::Parse {
            file: self.path.clone(),
            line: self.line,
            message,
          }))
        }
      };
      let ordinal = self.ordinal;
      self.ordinal += 1;
      if self.reader.keeps(ordinal) {
        return Some(Ok(point));
      }
    }
  }
}

#[cfg(test)]
#[path = "xyz_test.rs"]
mod xyz_test;
