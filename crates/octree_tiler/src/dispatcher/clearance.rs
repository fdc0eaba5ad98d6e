//! Ancestor write-clearance rule.
//!
//! A finished node may be written only when no queued or running work can
//! still change it or one of its descendants. Work on a node can be fed
//! only by its ancestors, and a node's tile content depends on what its
//! descendants absorbed, so any related pending path blocks the write.

use crate::octree::NodePath;

/// Ancestry on node names: `ancestor` is a prefix of `node`, equality
/// included. The empty name (root) is an ancestor of every node.
///
/// Works on any digit encoding, ASCII names as well as raw octants.
#[inline]
pub fn is_ancestor_name(node: &[u8], ancestor: &[u8]) -> bool {
  node.starts_with(ancestor)
}

/// [`is_ancestor_name`] on parsed paths.
#[inline]
pub fn is_ancestor(node: &NodePath, ancestor: &NodePath) -> bool {
  is_ancestor_name(node.digits(), ancestor.digits())
}

/// Either path is an ancestor of the other.
#[inline]
pub fn related(a: &NodePath, b: &NodePath) -> bool {
  is_ancestor(a, b) || is_ancestor(b, a)
}

/// True when `node` lies under the `finished` node and no queued or
/// processing path is related to it.
pub fn can_pnts_be_written<'a, Q, P>(
  node: &NodePath,
  finished: &NodePath,
  to_process: Q,
  processing: P,
) -> bool
where
  Q: IntoIterator<Item = &'a NodePath>,
  P: IntoIterator<Item = &'a NodePath>,
{
  is_ancestor(node, finished) && !is_blocked(node, to_process, processing)
}

/// Some queued or processing path is related to `node`.
pub fn is_blocked<'a, Q, P>(node: &NodePath, to_process: Q, processing: P) -> bool
where
  Q: IntoIterator<Item = &'a NodePath>,
  P: IntoIterator<Item = &'a NodePath>,
{
  to_process
    .into_iter()
    .chain(processing)
    .any(|pending| related(node, pending))
}
