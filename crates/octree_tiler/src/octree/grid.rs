//! Grid - one-point-per-cell downsampling of a subdivided node.
//!
//! The node box is cut into cubic cells of edge `spacing(depth)`. The first
//! point landing in a cell stays; later points in the same cell are rejected
//! and the caller forwards them to a child node.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::DAabb3;
use crate::points::Point;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Grid {
  origin: [f64; 3],
  cell_size: f64,
  dims: [u32; 3],
  cells: HashMap<u64, Point>,
}

impl Grid {
  /// Empty grid covering `aabb` with cells of edge `cell_size`.
  pub fn new(aabb: &DAabb3, cell_size: f64) -> Self {
    let size = aabb.size();
    let axis = |extent: f64| ((extent / cell_size).ceil() as u32).max(1);
    Self {
      origin: aabb.min.to_array(),
      cell_size,
      dims: [axis(size.x), axis(size.y), axis(size.z)],
      cells: HashMap::new(),
    }
  }

  /// Linear cell index of `position`, clamped to the grid.
  fn cell_key(&self, position: DVec3) -> u64 {
    let rel = (position - DVec3::from_array(self.origin)) / self.cell_size;
    let idx = |v: f64, dim: u32| (v.floor().max(0.0) as u64).min(dim as u64 - 1);
    let [nx, ny, nz] = self.dims;
    let ix = idx(rel.x, nx);
    let iy = idx(rel.y, ny);
    let iz = idx(rel.z, nz);
    ix + (nx as u64) * (iy + (ny as u64) * iz)
  }

  /// Keep `point` if its cell is free. Returns false when rejected.
  pub fn try_insert(&mut self, point: Point) -> bool {
    let key = self.cell_key(point.position_vec().as_dvec3());
    match self.cells.entry(key) {
      Entry::Occupied(_) => false,
      Entry::Vacant(slot) => {
        slot.insert(point);
        true
      }
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.cells.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  pub fn dims(&self) -> [u32; 3] {
    self.dims
  }

  /// Retained points, in no particular order.
  pub fn points(&self) -> impl Iterator<Item = &Point> {
    self.cells.values()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unit() -> DAabb3 {
    DAabb3::new(DVec3::ZERO, DVec3::ONE)
  }

  #[test]
  fn test_dims_cover_box() {
    let grid = Grid::new(&unit(), 0.3);
    assert_eq!(grid.dims(), [4, 4, 4]);
    let flat = Grid::new(&DAabb3::new(DVec3::ZERO, DVec3::new(1.0, 1.0, 0.0)), 0.5);
    assert_eq!(flat.dims(), [2, 2, 1]);
  }

  #[test]
  fn test_one_point_per_cell() {
    let mut grid = Grid::new(&unit(), 0.5);
    assert!(grid.try_insert(Point::new([0.1, 0.1, 0.1], [0; 3])));
    assert!(!grid.try_insert(Point::new([0.2, 0.2, 0.2], [0; 3])));
    assert!(grid.try_insert(Point::new([0.6, 0.1, 0.1], [0; 3])));
    assert_eq!(grid.len(), 2);
  }

  /// Points on the max face or slightly outside clamp into edge cells.
  #[test]
  fn test_boundary_points_clamp() {
    let mut grid = Grid::new(&unit(), 0.5);
    assert!(grid.try_insert(Point::new([1.0, 1.0, 1.0], [0; 3])));
    assert!(!grid.try_insert(Point::new([1.0001, 0.9, 0.99], [0; 3])));
    assert!(grid.try_insert(Point::new([-0.0001, 0.0, 0.0], [0; 3])));
    assert_eq!(grid.len(), 2);
  }
}
