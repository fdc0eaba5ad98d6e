//! OctreeMetadata - process-wide octree geometry computed once from the
//! input statistics, before any job is scheduled.

use glam::DVec3;

use super::{DAabb3, NodePath};
use crate::constants::{DEFAULT_MAX_DEPTH, DEFAULT_NODE_CAPACITY, MIN_POINT_SIZE, SPACING_DIVISOR};

/// Immutable octree geometry shared by the dispatcher and every worker.
///
/// `aabb` lives in the scaled local frame: input coordinates minus the
/// offset, times `scale`. Point positions stored in nodes use the same frame.
#[derive(Clone, Debug, PartialEq)]
pub struct OctreeMetadata {
  /// Root box in the scaled local frame.
  pub aabb: DAabb3,

  /// Target point spacing at the root, in the scaled local frame.
  pub spacing: f64,

  /// Uniform factor applied to offset coordinates.
  pub scale: f64,

  /// Points a leaf keeps before it subdivides.
  pub node_capacity: usize,

  /// Nodes at this depth never subdivide.
  pub max_depth: usize,
}

/// Root spacing for a box: diagonal length / 125.
#[inline]
pub fn compute_spacing(aabb: &DAabb3) -> f64 {
  aabb.size().length() / SPACING_DIVISOR
}

/// Uniform scale keeping positions in a comfortable f32 range.
#[inline]
pub fn compute_scale(base_spacing: f64) -> f64 {
  if base_spacing > 10.0 {
    0.01
  } else if base_spacing > 1.0 {
    0.1
  } else {
    1.0
  }
}

impl OctreeMetadata {
  /// Derive metadata from the input box with the offset already removed.
  pub fn from_offset_aabb(offset_aabb: DAabb3) -> Self {
    let scale = compute_scale(compute_spacing(&offset_aabb));
    let aabb = offset_aabb.scaled(scale);
    Self {
      aabb,
      spacing: compute_spacing(&aabb).max(MIN_POINT_SIZE),
      scale,
      node_capacity: DEFAULT_NODE_CAPACITY,
      max_depth: DEFAULT_MAX_DEPTH,
    }
  }

  /// Override the subdivision limits.
  pub fn with_limits(mut self, node_capacity: usize, max_depth: usize) -> Self {
    self.node_capacity = node_capacity.max(1);
    self.max_depth = max_depth;
    self
  }

  /// Bounding box of the node at `path`.
  pub fn node_aabb(&self, path: &NodePath) -> DAabb3 {
    path
      .digits()
      .iter()
      .fold(self.aabb, |aabb, &octant| aabb.child(octant))
  }

  /// Target spacing at `depth`: halves at each level.
  #[inline]
  pub fn node_spacing(&self, depth: usize) -> f64 {
    self.spacing / 2f64.powi(depth as i32)
  }

  /// Tileset-level geometric error, in input units.
  pub fn root_geometric_error(&self) -> f64 {
    self.aabb.size().length() / self.scale
  }

  /// Convert an input-frame offset coordinate into the scaled local frame.
  #[inline]
  pub fn to_local(&self, offset_coords: DVec3) -> DVec3 {
    offset_coords * self.scale
  }
}
