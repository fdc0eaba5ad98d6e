//! Pipeline tuning constants.

/// Points a leaf node holds before it subdivides.
pub const DEFAULT_NODE_CAPACITY: usize = 20_000;

/// Depth at which nodes keep every point instead of subdividing.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Divisor applied to the root diagonal to obtain the base spacing.
pub const SPACING_DIVISOR: f64 = 125.0;

/// Smallest box extent used when inverting sizes.
pub const MIN_POINT_SIZE: f64 = 1e-6;

/// Target point count of one PROCESS_JOBS message.
///
/// A single node larger than this is still sent alone.
pub const PROCESS_BATCH_TARGET: u64 = 100_000;

/// Upper bound of in-flight points when deciding to start another read.
pub const DEFAULT_MAX_POINTS_IN_PROGRESS: u64 = 60_000_000;

/// Max points per NEW_TASK emitted by a read job.
pub const READ_BATCH_POINTS: usize = 50_000;

/// Max lines per file portion produced by the XYZ scanner.
pub const PORTION_POINTS: u64 = 1_000_000;

/// Default node store budget in megabytes.
pub const DEFAULT_CACHE_SIZE_MB: u64 = 1024;

/// Scheduling latency above which a worker logs the delay (microseconds).
pub const LATENCY_LOG_THRESHOLD_US: u64 = 10_000;

/// Path digits grouped into one directory level of the output layout.
pub const DIGITS_PER_DIRECTORY: usize = 8;

/// Geometric error multiplier applied to node spacing.
pub const GEOMETRIC_ERROR_FACTOR: f64 = 10.0;

/// Name of the node store spill directory inside the output folder.
pub const WORKING_DIR_NAME: &str = "tmp";
