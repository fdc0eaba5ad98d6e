//! Octree spatial model.
//!
//! Nodes are addressed by their [`NodePath`] only: a node's box, spacing and
//! children are all derived from the path and the process-wide
//! [`OctreeMetadata`]. No node holds a pointer to another node, which keeps
//! node buffers trivially serializable between dispatcher and workers.
//!
//! # Octant Convention
//!
//! ```text
//! digit bits:  bit 0 = +X half, bit 1 = +Y half, bit 2 = +Z half
//!
//!        6──────7
//!       /│     /│
//!      4─┼────5 │      path "" = root
//!      │ 2────┼─3      path "5" = +X, -Y, +Z child of root
//!      │/     │/       path "52" = -X, +Y, -Z child of "5"
//!      0──────1
//! ```
//!
//! # Module Structure
//!
//! - [`path`]: `NodePath` - octal digit path, ancestor relation, file naming
//! - [`bounds`]: `DAabb3` - double precision box with octant split
//! - [`metadata`]: `OctreeMetadata` - root box, spacing, scale, capacity
//! - [`grid`]: `Grid` - one-point-per-cell downsampling
//! - [`node`]: `Node` - per-node buffer and overflow redistribution

pub mod bounds;
pub mod grid;
pub mod metadata;
pub mod node;
pub mod path;

pub use bounds::DAabb3;
pub use grid::Grid;
pub use metadata::{compute_scale, compute_spacing, OctreeMetadata};
pub use node::{InsertOutcome, Node};
pub use path::NodePath;
