//! Input-to-local coordinate transform.
//!
//! Raw input coordinates go through, in order: the optional SRS
//! reprojection, offset removal, optional rotation, uniform scaling.
//! The tileset root carries the inverse so renderers recover input units.

use glam::{DMat3, DMat4, DVec3};

use crate::error::TilerError;
use crate::points::Point;
use crate::reader::RawPoint;

/// Reprojection between coordinate reference systems.
///
/// No implementation ships with the crate; callers plug one in through
/// [`crate::convert_with`].
pub trait SrsTransformer: Send + Sync {
  /// Reproject positions in place.
  fn transform(&self, positions: &mut [DVec3]) -> Result<(), TilerError>;

  /// Rotation aligning the local frame at `center` with the output axes,
  /// e.g. east-north-up for geocentric outputs.
  fn local_rotation(&self, _center: DVec3) -> Option<DMat3> {
    None
  }
}

/// Offset, rotation and scale applied to every point of a read job.
#[derive(Clone, Debug, PartialEq)]
pub struct PointTransform {
  pub offset: DVec3,
  pub scale: f64,
  pub rotation: Option<DMat3>,
  /// Factor bringing input color components into 0..=255.
  pub color_scale: Option<f64>,
}

impl Default for PointTransform {
  fn default() -> Self {
    Self {
      offset: DVec3::ZERO,
      scale: 1.0,
      rotation: None,
      color_scale: None,
    }
  }
}

impl PointTransform {
  /// Local frame position of an (already reprojected) input position.
  #[inline]
  pub fn to_local(&self, position: DVec3) -> DVec3 {
    let shifted = position - self.offset;
    let rotated = match self.rotation {
      Some(r) => r * shifted,
      None => shifted,
    };
    rotated * self.scale
  }

  #[inline]
  pub fn color(&self, raw: [u16; 3]) -> [u8; 3] {
    let factor = self.color_scale.unwrap_or(1.0);
    raw.map(|c| (c as f64 * factor).round().clamp(0.0, 255.0) as u8)
  }

  /// This transform, falling back to `file_scale` when no color scale is
  /// forced for the whole run.
  pub fn for_file(&self, file_scale: Option<f64>) -> Self {
    Self {
      color_scale: self.color_scale.or(file_scale),
      ..self.clone()
    }
  }

  pub fn apply(&self, raw: &RawPoint) -> Point {
    Point::new(self.to_local(raw.position).as_vec3().to_array(), self.color(raw.color))
  }

  /// Tileset root transform (column-major):
  /// `translation(offset) · scale(1/scale) · inverse(rotation)`.
  pub fn tileset_matrix(&self) -> [f64; 16] {
    let inverse_rotation = self.rotation.map_or(DMat4::IDENTITY, |r| DMat4::from_mat3(r.inverse()));
    let m = DMat4::from_translation(self.offset)
      * DMat4::from_scale(DVec3::splat(1.0 / self.scale))
      * inverse_rotation;
    m.to_cols_array()
  }
}
