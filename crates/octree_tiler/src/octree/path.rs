//! NodePath - octal digit path identifying an octree node.
//!
//! The empty path is the root; each digit selects one of the 8 children.
//! On the wire and in file names a path is its ASCII digit string.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::constants::DIGITS_PER_DIRECTORY;
use crate::error::ProtocolError;

/// Octree node identifier: a sequence of digits in `0..8`.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(SmallVec<[u8; 16]>);

impl NodePath {
  /// The root node (empty path).
  pub fn root() -> Self {
    Self(SmallVec::new())
  }

  /// Build a path from raw octant digits.
  ///
  /// Returns None if any digit is not a valid octant.
  pub fn from_digits(digits: &[u8]) -> Option<Self> {
    if digits.iter().any(|&d| d > 7) {
      return None;
    }
    Some(Self(SmallVec::from_slice(digits)))
  }

  /// Decode the ASCII digit form used in message frames.
  pub fn from_wire(bytes: &[u8]) -> Result<Self, ProtocolError> {
    let mut digits = SmallVec::with_capacity(bytes.len());
    for &b in bytes {
      match b {
        b'0'..=b'7' => digits.push(b - b'0'),
        _ => {
          return Err(ProtocolError::Malformed(format!(
            "invalid node path byte 0x{b:02x}"
          )))
        }
      }
    }
    Ok(Self(digits))
  }

  /// ASCII digit form used in message frames.
  pub fn to_wire(&self) -> Vec<u8> {
    self.0.iter().map(|d| b'0' + d).collect()
  }

  #[inline]
  pub fn depth(&self) -> usize {
    self.0.len()
  }

  #[inline]
  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  #[inline]
  pub fn digits(&self) -> &[u8] {
    &self.0
  }

  /// Child path for the given octant (0-7).
  pub fn child(&self, octant: u8) -> Self {
    debug_assert!(octant < 8, "octant must be within 0..8");
    let mut digits = self.0.clone();
    digits.push(octant);
    Self(digits)
  }

  /// Parent path, None for the root.
  pub fn parent(&self) -> Option<Self> {
    if self.is_root() {
      return None;
    }
    let mut digits = self.0.clone();
    digits.pop();
    Some(Self(digits))
  }

  /// True when `prefix` is a prefix of this path (equality included).
  #[inline]
  pub fn starts_with(&self, prefix: &NodePath) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// File path of this node relative to an output directory.
  ///
  /// Every complete group of 8 leading digits becomes one directory level
  /// so that deep trees do not put millions of files in one folder:
  /// `""` → `r.pnts`, `"0123"` → `r0123.pnts`,
  /// `"012345670"` → `01234567/r012345670.pnts`.
  pub fn relative_file(&self, suffix: &str) -> PathBuf {
    let name = self.to_string();
    let mut path = PathBuf::new();
    let full_groups = self.depth() / DIGITS_PER_DIRECTORY;
    for group in 0..full_groups {
      let start = group * DIGITS_PER_DIRECTORY;
      path.push(&name[start..start + DIGITS_PER_DIRECTORY]);
    }
    path.push(format!("r{name}{suffix}"));
    path
  }
}

impl fmt::Display for NodePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for d in &self.0 {
      write!(f, "{d}")?;
    }
    Ok(())
  }
}

impl fmt::Debug for NodePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NodePath(r{self})")
  }
}

impl FromStr for NodePath {
  type Err = ProtocolError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_wire(s.as_bytes())
  }
}

#[cfg(test)]
#[path = "path_test.rs"]
mod path_test;
