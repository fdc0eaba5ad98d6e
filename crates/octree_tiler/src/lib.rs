//! octree_tiler - memory-bounded point cloud to 3D Tiles conversion
//!
//! Turns an unbounded stream of points into an octree of `pnts` tiles with a
//! dispatcher/worker pipeline. The dispatcher owns every piece of
//! coordination state; workers are stateless and only exchange framed
//! messages with it.
//!
//! ```text
//! ┌──────────────┐  READ_FILE   ┌──────────┐  NEW_TASK(root)  ┌────────────┐
//! │ file portions├─────────────►│ Worker   ├─────────────────►│ Dispatcher │
//! └──────────────┘              │ (read)   │                  │  State     │
//!                               └──────────┘                  └─────┬──────┘
//!                                       PROCESS_JOBS (deepest first)│
//!                               ┌──────────┐◄───────────────────────┘
//!                               │ Worker   ├── NEW_TASK(child) ──► Dispatcher
//!                               │ (process)├── PROCESSED ────────► clearance
//!                               └──────────┘
//!                               ┌──────────┐  WRITE_PNTS (cleared nodes)
//!                               │ Worker   │◄──────────────── Dispatcher
//!                               │ (write)  ├── PNTS_WRITTEN ──► integrity
//!                               └──────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use octree_tiler::{convert, ConvertOptions};
//!
//! let options = ConvertOptions::new(vec!["cloud.xyz".into()], "out/");
//! let report = convert(&options)?;
//! println!("{} points in {} tiles", report.points_written, report.tiles_written);
//! ```

pub mod constants;
pub mod error;
pub mod points;

pub use error::{CodecError, ConfigError, ProtocolError, StoreError, TilerError};
pub use points::{Point, PointBatch};

// Octree spatial model
pub mod octree;
pub use octree::{DAabb3, Grid, Node, NodePath, OctreeMetadata};

// Disk-backed node buffer cache
pub mod store;
pub use store::NodeStore;

// Dispatcher <-> worker wire protocol and transport
pub mod bus;
pub mod protocol;
pub use protocol::{Command, Response};

// External collaborators
pub mod codec;
pub mod reader;
pub mod transform;
pub use codec::{PntsCodec, TileCodec};
pub use reader::{FilePortion, PointReader, XyzReader};
pub use transform::{PointTransform, SrsTransformer};

pub mod worker;
pub use worker::{Worker, WorkerContext};

pub mod dispatcher;
pub use dispatcher::{can_pnts_be_written, is_ancestor, is_ancestor_name, Manager, State};

pub mod metrics;
pub mod tileset;

// Conversion driver
pub mod convert;
pub use convert::{convert, convert_with, ConversionReport, ConvertOptions};
