//! Node - accumulated points of one octree node.
//!
//! A node is a leaf until it holds more than `node_capacity` points. It then
//! subdivides: a [`Grid`] keeps one point per cell and every rejected point
//! is forwarded to the child octant containing it. Forwarded points leave
//! the worker as child tasks; the node itself never references its children
//! other than through the `children` bitmask.

use serde::{Deserialize, Serialize};

use super::{Grid, NodePath, OctreeMetadata};
use crate::error::TilerError;
use crate::points::Point;

/// Result of inserting a batch into a node.
#[derive(Debug, Default)]
pub struct InsertOutcome {
  /// `points_held_after - points_held_before`. Negative when a subdivision
  /// forwards previously held points.
  pub absorbed: i64,

  /// Points to route to each child octant.
  pub forwarded: [Vec<Point>; 8],
}

impl InsertOutcome {
  /// Non-empty child batches with their octant.
  pub fn child_batches(self) -> impl Iterator<Item = (u8, Vec<Point>)> {
    self
      .forwarded
      .into_iter()
      .enumerate()
      .filter(|(_, pts)| !pts.is_empty())
      .map(|(octant, pts)| (octant as u8, pts))
  }

  pub fn forwarded_count(&self) -> usize {
    self.forwarded.iter().map(Vec::len).sum()
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub path: NodePath,
  /// Leaf storage. Empty once the node has subdivided.
  points: Vec<Point>,
  /// Present once the node has subdivided.
  grid: Option<Grid>,
  /// Bit `i` set when child octant `i` received points.
  children: u8,
}

impl Node {
  pub fn new(path: NodePath) -> Self {
    Self {
      path,
      points: Vec::new(),
      grid: None,
      children: 0,
    }
  }

  /// Decode a node buffer; an empty buffer is a fresh node.
  pub fn from_buffer(path: &NodePath, buffer: &[u8]) -> Result<Self, TilerError> {
    if buffer.is_empty() {
      return Ok(Self::new(path.clone()));
    }
    Ok(bincode::deserialize(buffer)?)
  }

  pub fn to_buffer(&self) -> Result<Vec<u8>, TilerError> {
    Ok(bincode::serialize(self)?)
  }

  /// Points currently held by this node.
  pub fn point_count(&self) -> usize {
    match &self.grid {
      Some(grid) => grid.len(),
      None => self.points.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.point_count() == 0
  }

  pub fn is_subdivided(&self) -> bool {
    self.grid.is_some()
  }

  pub fn children_mask(&self) -> u8 {
    self.children
  }

  /// Snapshot of every held point.
  pub fn points(&self) -> Vec<Point> {
    match &self.grid {
      Some(grid) => grid.points().copied().collect(),
      None => self.points.clone(),
    }
  }

  /// Insert a batch, subdividing on overflow.
  pub fn insert<I>(&mut self, meta: &OctreeMetadata, incoming: I) -> InsertOutcome
  where
    I: IntoIterator<Item = Point>,
  {
    let before = self.point_count() as i64;
    let mut outcome = InsertOutcome::default();

    if let Some(grid) = self.grid.as_mut() {
      let aabb = meta.node_aabb(&self.path);
      for point in incoming {
        if !grid.try_insert(point) {
          let octant = aabb.octant_of(point.position_vec().as_dvec3());
          outcome.forwarded[octant as usize].push(point);
        }
      }
    } else {
      self.points.extend(incoming);
      if self.points.len() > meta.node_capacity && self.path.depth() < meta.max_depth {
        self.subdivide(meta, &mut outcome);
      }
    }

    for (octant, pts) in outcome.forwarded.iter().enumerate() {
      if !pts.is_empty() {
        self.children |= 1 << octant;
      }
    }
    outcome.absorbed = self.point_count() as i64 - before;
    outcome
  }

  fn subdivide(&mut self, meta: &OctreeMetadata, outcome: &mut InsertOutcome) {
    let aabb = meta.node_aabb(&self.path);
    let mut grid = Grid::new(&aabb, meta.node_spacing(self.path.depth()));
    for point in self.points.drain(..) {
      if !grid.try_insert(point) {
        let octant = aabb.octant_of(point.position_vec().as_dvec3());
        outcome.forwarded[octant as usize].push(point);
      }
    }
    self.points.shrink_to_fit();
    self.grid = Some(grid);
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
