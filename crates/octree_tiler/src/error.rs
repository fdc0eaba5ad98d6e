//! Error taxonomy of the conversion pipeline.
//!
//! Configuration errors are raised before any worker starts. Protocol,
//! store and integrity errors indicate a logic defect and abort the run.
//! Memory pressure never surfaces here; it is handled by back-pressure and
//! store eviction.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::octree::NodePath;

/// Top-level error returned by every fallible pipeline operation.
#[derive(Debug, Error)]
pub enum TilerError {
  #[error("configuration error: {0}")]
  Config(#[from] ConfigError),

  #[error("protocol violation: {0}")]
  Protocol(#[from] ProtocolError),

  #[error("node store: {0}")]
  Store(#[from] StoreError),

  #[error("tile codec: {0}")]
  Codec(#[from] CodecError),

  /// Points were lost or duplicated somewhere in the pipeline.
  #[error("integrity check failed: expected {expected} points in tiles, wrote {written}")]
  Integrity { expected: u64, written: u64 },

  #[error("worker {worker} failed: {message}")]
  WorkerFailed { worker: usize, message: String },

  #[error("worker pool: {0}")]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),

  #[error("root tile is missing: {}", .0.display())]
  MissingRoot(PathBuf),

  #[error("i/o error on {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("serialization: {0}")]
  Serialization(#[from] bincode::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("{file}:{line}: {message}")]
  Parse {
    file: PathBuf,
    line: u64,
    message: String,
  },
}

impl TilerError {
  /// Wrap an `io::Error` with the path it happened on.
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Invalid options or input detected before the pipeline starts.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("no input file given")]
  NoInput,

  #[error("all files should have the same extension, found {0:?}")]
  MixedExtensions(Vec<String>),

  #[error("unsupported input extension '{0}'")]
  UnsupportedExtension(String),

  #[error("no SRS information in the input files, specify it with --srs-in")]
  MissingSrs,

  #[error("no coordinate transformer available for EPSG:{from} -> EPSG:{to}")]
  UnsupportedTransform { from: String, to: String },

  #[error("output folder '{}' already exists", .0.display())]
  OutputExists(PathBuf),

  #[error("fraction must be within 1..=100, got {0}")]
  InvalidFraction(u8),

  #[error("at least one worker is required")]
  NoWorkers,

  #[error("input contains no point")]
  EmptyInput,

  #[error("input file name is not valid UTF-8: {}", .0.display())]
  NonUtf8Path(PathBuf),
}

/// Violations of the dispatcher/worker protocol or scheduling invariants.
#[derive(Debug, Error)]
pub enum ProtocolError {
  #[error("unknown command kind {0}")]
  UnknownCommand(u8),

  #[error("unknown response kind {0}")]
  UnknownResponse(u8),

  #[error("malformed message: {0}")]
  Malformed(String),

  #[error("job submitted while no worker is idle")]
  NoIdleWorker,

  #[error("worker {0} reported idle twice")]
  DuplicateIdle(usize),

  #[error("worker {0} reported halted twice")]
  DuplicateHalted(usize),

  #[error("unknown worker {0}")]
  UnknownWorker(usize),

  #[error("task for node '{0}' carries no point")]
  EmptyTask(NodePath),

  #[error("node '{0}' finished processing but was never dispatched")]
  UnexpectedProcessed(NodePath),

  #[error("message bus disconnected")]
  Disconnected,
}

/// Node store failures.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("node '{0}' is not in the store")]
  Missing(NodePath),

  #[error("spill file {}: {source}", path.display())]
  Spill {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Tile payload encoding/decoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
  #[error("bad magic {0:?}")]
  BadMagic([u8; 4]),

  #[error("unsupported version {0}")]
  UnsupportedVersion(u32),

  #[error("payload truncated: need {needed} bytes, have {available}")]
  Truncated { needed: usize, available: usize },

  #[error("feature table: {0}")]
  FeatureTable(String),

  #[error("tile exceeds the 4 GiB format limit")]
  TooLarge,

  #[error("tile bytes: {0}")]
  Io(#[from] io::Error),
}
