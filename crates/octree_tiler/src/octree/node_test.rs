use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::octree::DAabb3;

fn meta(capacity: usize) -> OctreeMetadata {
  OctreeMetadata::from_offset_aabb(DAabb3::new(DVec3::ZERO, DVec3::ONE)).with_limits(capacity, 20)
}

fn random_points(n: usize, seed: u64) -> Vec<Point> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n)
    .map(|_| {
      Point::new(
        [rng.random::<f32>(), rng.random::<f32>(), rng.random::<f32>()],
        [rng.random(), rng.random(), rng.random()],
      )
    })
    .collect()
}

// =========================================================================
// Leaf behaviour
// =========================================================================

/// Below capacity a leaf keeps everything and forwards nothing.
#[test]
fn test_leaf_keeps_all_points() {
  let meta = meta(100);
  let mut node = Node::new(NodePath::root());
  let outcome = node.insert(&meta, random_points(100, 1));

  assert_eq!(outcome.absorbed, 100);
  assert_eq!(outcome.forwarded_count(), 0);
  assert_eq!(node.point_count(), 100);
  assert!(!node.is_subdivided());
  assert_eq!(node.children_mask(), 0);
}

/// A leaf at max depth never subdivides.
#[test]
fn test_leaf_at_max_depth_keeps_overflow() {
  let meta = meta(10).with_limits(10, 2);
  let mut node = Node::new("01".parse().unwrap());
  let outcome = node.insert(&meta, random_points(50, 2));
  assert_eq!(outcome.absorbed, 50);
  assert!(!node.is_subdivided());
}

// =========================================================================
// Subdivision
// =========================================================================

/// Held + forwarded always equals inserted: no point is lost or duplicated.
#[test]
fn test_subdivision_conserves_points() {
  let meta = meta(100);
  let mut node = Node::new(NodePath::root());
  let outcome = node.insert(&meta, random_points(5_000, 3));

  assert!(node.is_subdivided());
  let held = node.point_count();
  assert_eq!(held + outcome.forwarded_count(), 5_000);
  assert_eq!(outcome.absorbed, held as i64);
}

/// A leaf holding points re-forwards some of them when it subdivides,
/// so the second insert reports a negative delta.
#[test]
fn test_absorbed_can_be_negative() {
  let meta = meta(100);
  let mut node = Node::new(NodePath::root());
  // Every point in one grid cell: the grid keeps a single point.
  let clump = vec![Point::new([0.5, 0.5, 0.5], [1, 2, 3]); 100];
  assert_eq!(node.insert(&meta, clump).absorbed, 100);

  let outcome = node.insert(&meta, vec![Point::new([0.5, 0.5, 0.5], [1, 2, 3])]);
  assert_eq!(node.point_count(), 1);
  assert_eq!(outcome.absorbed, -99);
  assert_eq!(outcome.forwarded_count(), 100);
}

/// Forwarded points land in the child box designated by their octant.
#[test]
fn test_forwarded_points_inside_child_box() {
  let meta = meta(50);
  let path: NodePath = "3".parse().unwrap();
  let aabb = meta.node_aabb(&path);
  let mut rng = StdRng::seed_from_u64(4);
  let points: Vec<Point> = (0..2_000)
    .map(|_| {
      let p = aabb.min + (aabb.size() * DVec3::new(rng.random(), rng.random(), rng.random()));
      Point::new(p.as_vec3().to_array(), [0; 3])
    })
    .collect();

  let mut node = Node::new(path.clone());
  let outcome = node.insert(&meta, points);
  let mask = node.children_mask();
  for (octant, pts) in outcome.child_batches() {
    assert!(mask & (1 << octant) != 0);
    let child_box = meta.node_aabb(&path.child(octant));
    for p in pts {
      assert!(child_box.contains_point(p.position_vec().as_dvec3()));
    }
  }
}

/// Subdivided nodes keep filling free cells on later inserts.
#[test]
fn test_subdivided_node_accepts_new_cells() {
  let meta = meta(10);
  let mut node = Node::new(NodePath::root());
  node.insert(&meta, vec![Point::new([0.1, 0.1, 0.1], [0; 3]); 11]);
  assert!(node.is_subdivided());
  let outcome = node.insert(&meta, vec![Point::new([0.9, 0.9, 0.9], [0; 3])]);
  assert_eq!(outcome.absorbed, 1);
  assert_eq!(node.point_count(), 2);
}

// =========================================================================
// Buffers
// =========================================================================

#[test]
fn test_empty_buffer_is_fresh_node() {
  let path: NodePath = "15".parse().unwrap();
  let node = Node::from_buffer(&path, &[]).unwrap();
  assert_eq!(node, Node::new(path));
}

#[test]
fn test_buffer_preserves_subdivided_state() {
  let meta = meta(100);
  let mut node = Node::new(NodePath::root());
  node.insert(&meta, random_points(1_000, 5));

  let restored = Node::from_buffer(&NodePath::root(), &node.to_buffer().unwrap()).unwrap();
  assert_eq!(restored, node);
  assert!(restored.is_subdivided());
}
