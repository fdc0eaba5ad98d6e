//! Point records and the serialized batches carried by tasks.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::TilerError;

/// A single point in the scaled local frame of the octree.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub position: [f32; 3],
  pub color: [u8; 3],
}

impl Point {
  pub fn new(position: [f32; 3], color: [u8; 3]) -> Self {
    Self { position, color }
  }

  #[inline]
  pub fn position_vec(&self) -> Vec3 {
    Vec3::from_array(self.position)
  }
}

/// Batch of points destined for one node.
///
/// Serialized with bincode when travelling inside a task frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointBatch {
  pub points: Vec<Point>,
}

impl PointBatch {
  pub fn new(points: Vec<Point>) -> Self {
    Self { points }
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn encode(&self) -> Result<Vec<u8>, TilerError> {
    Ok(bincode::serialize(self)?)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, TilerError> {
    Ok(bincode::deserialize(bytes)?)
  }
}
