//! Conversion driver: options in, tiles and `tileset.json` out.
//!
//! ```text
//! validate ─► scan ─► metadata + transform ─► dispatcher loop ─► integrity ─► tileset ─► cleanup
//! ```
//!
//! Every configuration error surfaces before a worker starts. On any fatal
//! error `tileset.json` is never written.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use glam::DVec3;
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::codec::{PntsCodec, TileCodec};
use crate::constants::{
  DEFAULT_CACHE_SIZE_MB, DEFAULT_MAX_DEPTH, DEFAULT_MAX_POINTS_IN_PROGRESS, DEFAULT_NODE_CAPACITY,
  PROCESS_BATCH_TARGET, WORKING_DIR_NAME,
};
use crate::dispatcher::{self, DispatchLimits, Manager, State};
use crate::error::{ConfigError, TilerError};
use crate::metrics::JobTimingSummary;
use crate::octree::{DAabb3, OctreeMetadata};
use crate::reader::{common_extension, reader_for_extension, PointReader, ScanInfo};
use crate::store::NodeStore;
use crate::tileset;
use crate::transform::{PointTransform, SrsTransformer};
use crate::worker::WorkerContext;

pub const PROGRESSION_FILE: &str = "progression.csv";

#[derive(Clone, Debug)]
pub struct ConvertOptions {
  pub files: Vec<PathBuf>,
  pub out: PathBuf,
  /// Replace an existing output directory.
  pub overwrite: bool,
  /// Worker count.
  pub jobs: usize,
  /// Resident budget of the node store.
  pub cache_size_mb: u64,
  /// Input EPSG code, overriding what the files declare.
  pub srs_in: Option<String>,
  pub srs_out: Option<String>,
  /// Percentage of input points kept, 1..=100.
  pub fraction: u8,
  pub rgb: bool,
  /// Write `progression.csv` next to the tileset.
  pub graph: bool,
  pub color_scale: Option<f64>,
  pub max_points_in_progress: u64,
  pub node_capacity: usize,
  pub max_depth: usize,
  /// Log a one-line benchmark summary under this label.
  pub benchmark: Option<String>,
}

impl ConvertOptions {
  pub fn new(files: Vec<PathBuf>, out: impl Into<PathBuf>) -> Self {
    Self {
      files,
      out: out.into(),
      overwrite: false,
      jobs: std::thread::available_parallelism().map_or(1, |n| n.get()),
      cache_size_mb: DEFAULT_CACHE_SIZE_MB,
      srs_in: None,
      srs_out: None,
      fraction: 100,
      rgb: true,
      graph: false,
      color_scale: None,
      max_points_in_progress: DEFAULT_MAX_POINTS_IN_PROGRESS,
      node_capacity: DEFAULT_NODE_CAPACITY,
      max_depth: DEFAULT_MAX_DEPTH,
      benchmark: None,
    }
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.files.is_empty() {
      return Err(ConfigError::NoInput);
    }
    // Read jobs carry file names as UTF-8 text.
    if let Some(file) = self.files.iter().find(|f| f.to_str().is_none()) {
      return Err(ConfigError::NonUtf8Path(file.clone()));
    }
    if self.fraction == 0 || self.fraction > 100 {
      return Err(ConfigError::InvalidFraction(self.fraction));
    }
    if self.jobs == 0 {
      return Err(ConfigError::NoWorkers);
    }
    if self.out.exists() && !self.overwrite {
      return Err(ConfigError::OutputExists(self.out.clone()));
    }
    Ok(())
  }
}

#[derive(Clone, Debug)]
pub struct ConversionReport {
  pub input_points: u64,
  pub points_written: u64,
  pub tiles_written: u64,
  pub bytes_written: u64,
  pub elapsed: Duration,
  pub timings: JobTimingSummary,
  /// Node buffers spilled to disk by the store.
  pub evictions: u64,
}

/// Convert with the reader matching the input extension and the `pnts`
/// codec.
pub fn convert(options: &ConvertOptions) -> Result<ConversionReport, TilerError> {
  let extension = common_extension(&options.files)?;
  let reader: Arc<dyn PointReader> = Arc::from(reader_for_extension(&extension, options.fraction)?);
  convert_with(options, reader, Arc::new(PntsCodec::new(options.rgb)), None)
}

/// Pick the reprojection for the run.
///
/// Without an output SRS nothing is reprojected unless `provided` is set.
/// Identical input and output systems need no transformer.
fn resolve_srs(
  options: &ConvertOptions,
  scanned: Option<String>,
  provided: Option<Arc<dyn SrsTransformer>>,
) -> Result<Option<Arc<dyn SrsTransformer>>, ConfigError> {
  let Some(target) = &options.srs_out else {
    return Ok(provided);
  };
  let source = options.srs_in.clone().or(scanned).ok_or(ConfigError::MissingSrs)?;
  if provided.is_some() || &source == target {
    return Ok(provided);
  }
  Err(ConfigError::UnsupportedTransform {
    from: source,
    to: target.clone(),
  })
}

fn corners(aabb: &DAabb3) -> [DVec3; 8] {
  let (lo, hi) = (aabb.min, aabb.max);
  std::array::from_fn(|i| {
    DVec3::new(
      if i & 1 != 0 { hi.x } else { lo.x },
      if i & 2 != 0 { hi.y } else { lo.y },
      if i & 4 != 0 { hi.z } else { lo.z },
    )
  })
}

/// Octree metadata and per-point transform derived from the scan.
fn frame(
  options: &ConvertOptions,
  scan: &ScanInfo,
  srs: Option<&dyn SrsTransformer>,
) -> Result<(OctreeMetadata, PointTransform), TilerError> {
  let mut box_corners = corners(&scan.aabb);
  let mut offset = [scan.avg_min];
  let mut rotation = None;
  if let Some(srs) = srs {
    srs.transform(&mut box_corners)?;
    srs.transform(&mut offset)?;
    if let Some(projected) = DAabb3::from_points(box_corners) {
      rotation = srs.local_rotation(projected.center());
    }
  }
  let offset = offset[0];

  let local_corners = box_corners.map(|c| {
    let shifted = c - offset;
    rotation.map_or(shifted, |r| r * shifted)
  });
  let offset_aabb = DAabb3::from_points(local_corners).unwrap_or(DAabb3::new(DVec3::ZERO, DVec3::ZERO));
  let metadata = OctreeMetadata::from_offset_aabb(offset_aabb)
    .with_limits(options.node_capacity, options.max_depth);
  let transform = PointTransform {
    offset,
    scale: metadata.scale,
    rotation,
    color_scale: options.color_scale,
  };
  Ok((metadata, transform))
}

/// Convert with caller supplied collaborators.
#[tracing::instrument(skip_all, name = "convert", fields(out = %options.out.display()))]
pub fn convert_with(
  options: &ConvertOptions,
  reader: Arc<dyn PointReader>,
  codec: Arc<dyn TileCodec>,
  srs: Option<Arc<dyn SrsTransformer>>,
) -> Result<ConversionReport, TilerError> {
  let started = Instant::now();
  options.validate()?;

  let scan = reader.scan(&options.files)?;
  if scan.point_count == 0 {
    return Err(ConfigError::EmptyInput.into());
  }
  let srs = resolve_srs(options, scan.srs_in.clone(), srs)?;
  let (metadata, transform) = frame(options, &scan, srs.as_deref())?;
  info!(
    points = scan.point_count,
    portions = scan.portions.len(),
    scale = metadata.scale,
    spacing = metadata.spacing,
    "input scanned"
  );
  debug!(?metadata, ?transform, "octree frame");

  if options.out.exists() {
    fs::remove_dir_all(&options.out).map_err(|e| TilerError::io(&options.out, e))?;
  }
  let work_dir = options.out.join(WORKING_DIR_NAME);
  fs::create_dir_all(&work_dir).map_err(|e| TilerError::io(&work_dir, e))?;

  let ctx = Arc::new(WorkerContext {
    metadata: metadata.clone(),
    out_dir: options.out.clone(),
    reader,
    codec: Arc::clone(&codec),
    srs,
  });
  let mut state = State::new(
    scan.portions,
    scan.point_count,
    options.max_points_in_progress,
    (options.jobs / 2).max(1),
  );
  let mut store = NodeStore::new(&work_dir);
  let mut manager = Manager::start(options.jobs, ctx)?;
  let limits = DispatchLimits {
    process_batch_target: PROCESS_BATCH_TARGET,
    cache_budget_bytes: (options.cache_size_mb as usize).saturating_mul(1024 * 1024),
  };
  let stats = dispatcher::run(&mut state, &mut store, &mut manager, &transform, limits)?;
  drop(manager);

  let counters = *state.counters();
  if counters.points_written != scan.point_count {
    return Err(TilerError::Integrity {
      expected: scan.point_count,
      written: counters.points_written,
    });
  }

  let tiles = tileset::write_tileset(&options.out, &metadata, &transform, codec.as_ref())?;
  if tiles as u64 != counters.tiles_written {
    warn!(
      in_tileset = tiles,
      written = counters.tiles_written,
      "some tiles are not reachable from the root"
    );
  }

  fs::remove_dir_all(&work_dir).map_err(|e| TilerError::io(&work_dir, e))?;
  if options.graph {
    let file = options.out.join(PROGRESSION_FILE);
    fs::write(&file, stats.progress.to_csv()).map_err(|e| TilerError::io(&file, e))?;
  }

  let report = ConversionReport {
    input_points: scan.point_count,
    points_written: counters.points_written,
    tiles_written: counters.tiles_written,
    bytes_written: counters.bytes_written,
    elapsed: started.elapsed(),
    timings: stats.timings.summary(),
    evictions: store.evictions(),
  };
  info!(
    points = report.points_written,
    tiles = report.tiles_written,
    mb = report.bytes_written / (1024 * 1024),
    elapsed_s = report.elapsed.as_secs_f64(),
    "conversion finished"
  );
  if let Some(label) = &options.benchmark {
    info!(
      label = %label,
      jobs = options.jobs,
      points = report.points_written,
      elapsed_s = report.elapsed.as_secs_f64(),
      points_per_s = report.points_written as f64 / report.elapsed.as_secs_f64().max(1e-9),
      avg_process_us = report.timings.process.average_us,
      avg_write_us = report.timings.write.average_us,
      evictions = report.evictions,
      "benchmark"
    );
  }
  Ok(report)
}

#[cfg(test)]
#[path = "convert_test.rs"]
mod convert_test;
