use std::fmt::Write as _;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::codec::tile_filename;
use crate::error::CodecError;
use crate::octree::NodePath;
use crate::points::Point;
use crate::reader::XyzReader;
use crate::tileset::{read_tileset, Refine, TILESET_FILE};

/// `n` random points with color inside `[0, edge)^3`.
fn write_cloud(dir: &Path, name: &str, n: usize, edge: f64, seed: u64) -> PathBuf {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut text = String::from("# x y z r g b\n");
  for _ in 0..n {
    let (x, y, z) = (
      rng.random::<f64>() * edge,
      rng.random::<f64>() * edge,
      rng.random::<f64>() * edge,
    );
    let c: u8 = rng.random();
    writeln!(text, "{x:.6} {y:.6} {z:.6} {c} {c} {c}").unwrap();
  }
  let path = dir.join(name);
  fs::write(&path, text).unwrap();
  path
}

/// `n` points snapped to a coarse lattice so that many of them share a
/// grid cell and the tree has to grow several levels.
fn write_clustered_cloud(dir: &Path, name: &str, n: usize, seed: u64) -> PathBuf {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut text = String::new();
  for _ in 0..n {
    let mut coord = || rng.random_range(0..=8) as f64 * 0.5;
    let (x, y, z) = (coord(), coord(), coord());
    writeln!(text, "{x} {y} {z}").unwrap();
  }
  let path = dir.join(name);
  fs::write(&path, text).unwrap();
  path
}

fn options(files: Vec<PathBuf>, out: &Path, jobs: usize) -> ConvertOptions {
  let mut options = ConvertOptions::new(files, out);
  options.jobs = jobs;
  options
}

// =========================================================================
// End to end
// =========================================================================

/// A small cloud fits in the root: one tile, refined by replacement.
#[test]
fn test_unit_cube_single_worker() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 1_000, 1.0, 7);
  let out = dir.path().join("out");

  let report = convert(&options(vec![input], &out, 1)).unwrap();
  assert_eq!(report.input_points, 1_000);
  assert_eq!(report.points_written, 1_000);
  assert_eq!(report.tiles_written, 1);

  assert!(out.join("r.pnts").is_file());
  assert!(!out.join(WORKING_DIR_NAME).exists());
  assert!(!out.join(PROGRESSION_FILE).exists());

  let summary = read_tileset(&out, &PntsCodec::default()).unwrap();
  assert_eq!(summary.tiles, 1);
  assert_eq!(summary.points, 1_000);
  assert_eq!(summary.tileset.root.refine, Refine::Replace);
  assert_eq!(summary.tileset.root.geometric_error, 0.0);
}

/// Points written equal points read, however the input is split into
/// portions and however many workers share the work.
#[test]
fn test_conservation_across_partitioning() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_clustered_cloud(dir.path(), "clustered.xyz", 5_000, 11);

  for (run, (portion_points, jobs)) in [(1_000_000, 1), (333, 4), (1_000, 3)].into_iter().enumerate() {
    let out = dir.path().join(format!("out{run}"));
    let mut opts = options(vec![input.clone()], &out, jobs);
    opts.node_capacity = 200;
    opts.max_points_in_progress = 1_000;
    // Evict everything each tick so buffers round-trip through disk.
    opts.cache_size_mb = 0;
    let reader = Arc::new(XyzReader::new(100).unwrap().with_portion_points(portion_points));

    let report = convert_with(&opts, reader, Arc::new(PntsCodec::default()), None).unwrap();
    assert_eq!(report.points_written, 5_000, "run {run}");
    assert!(report.tiles_written > 1, "run {run}");

    let summary = read_tileset(&out, &PntsCodec::default()).unwrap();
    assert_eq!(summary.points, 5_000, "run {run}");
    assert_eq!(summary.tiles as u64, report.tiles_written, "run {run}");
    assert!(!out.join(WORKING_DIR_NAME).exists());
  }
}

#[test]
fn test_several_input_files() {
  let dir = tempfile::tempdir().unwrap();
  let a = write_cloud(dir.path(), "a.xyz", 300, 10.0, 1);
  let b = write_cloud(dir.path(), "b.xyz", 200, 10.0, 2);
  let out = dir.path().join("out");
  let report = convert(&options(vec![a, b], &out, 2)).unwrap();
  assert_eq!(report.points_written, 500);
}

#[test]
fn test_fraction_samples_input() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 1_000, 1.0, 3);
  let out = dir.path().join("out");
  let mut opts = options(vec![input], &out, 2);
  opts.fraction = 50;
  let report = convert(&opts).unwrap();
  assert_eq!(report.input_points, 500);
  assert_eq!(report.points_written, 500);
}

#[test]
fn test_graph_writes_progression() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 100, 1.0, 5);
  let out = dir.path().join("out");
  let mut opts = options(vec![input], &out, 1);
  opts.graph = true;
  opts.benchmark = Some("small".into());
  convert(&opts).unwrap();
  let csv = fs::read_to_string(out.join(PROGRESSION_FILE)).unwrap();
  assert!(csv.starts_with("elapsed_s,percent\n"));
  assert!(csv.trim_end().ends_with("100.00"));
}

// =========================================================================
// Configuration errors
// =========================================================================

#[test]
fn test_existing_output_requires_overwrite() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 50, 1.0, 9);
  let out = dir.path().join("out");
  fs::create_dir_all(&out).unwrap();
  fs::write(out.join("stale.txt"), "old").unwrap();

  let mut opts = options(vec![input], &out, 1);
  assert!(matches!(
    convert(&opts),
    Err(TilerError::Config(ConfigError::OutputExists(_)))
  ));
  assert!(out.join("stale.txt").exists());

  opts.overwrite = true;
  convert(&opts).unwrap();
  assert!(!out.join("stale.txt").exists());
  assert!(out.join(TILESET_FILE).exists());
}

#[test]
fn test_input_validation() {
  let dir = tempfile::tempdir().unwrap();
  let out = dir.path().join("out");
  let xyz = write_cloud(dir.path(), "a.xyz", 10, 1.0, 1);
  let txt = write_cloud(dir.path(), "b.txt", 10, 1.0, 2);

  assert!(matches!(
    convert(&options(Vec::new(), &out, 1)),
    Err(TilerError::Config(ConfigError::NoInput))
  ));
  assert!(matches!(
    convert(&options(vec![xyz.clone(), txt], &out, 1)),
    Err(TilerError::Config(ConfigError::MixedExtensions(_)))
  ));
  assert!(matches!(
    convert(&options(vec![dir.path().join("cloud.las")], &out, 1)),
    Err(TilerError::Config(ConfigError::UnsupportedExtension(_)))
  ));
  assert!(matches!(
    convert(&options(vec![xyz.clone()], &out, 0)),
    Err(TilerError::Config(ConfigError::NoWorkers))
  ));
  let mut opts = options(vec![xyz], &out, 1);
  opts.fraction = 0;
  assert!(matches!(
    convert(&opts),
    Err(TilerError::Config(ConfigError::InvalidFraction(0)))
  ));
  assert!(!out.exists());
}

/// A file name the workers could not reopen is refused before any work.
#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_file_name_rejected_up_front() {
  use std::ffi::OsStr;
  use std::os::unix::ffi::OsStrExt;

  let dir = tempfile::tempdir().unwrap();
  let name = OsStr::from_bytes(b"cl\xffoud.xyz");
  let input = dir.path().join(name);
  fs::write(&input, "0 0 0\n1 1 1\n").unwrap();
  let out = dir.path().join("out");

  match convert(&options(vec![input], &out, 1)) {
    Err(TilerError::Config(ConfigError::NonUtf8Path(path))) => {
      assert_eq!(path.file_name(), Some(name))
    }
    other => panic!("unexpected {other:?}"),
  }
  assert!(!out.exists());
}

#[test]
fn test_srs_resolution() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 20, 1.0, 4);
  let out = dir.path().join("out");

  let mut opts = options(vec![input], &out, 1);
  opts.srs_out = Some("4978".into());
  assert!(matches!(
    convert(&opts),
    Err(TilerError::Config(ConfigError::MissingSrs))
  ));

  opts.srs_in = Some("2154".into());
  assert!(matches!(
    convert(&opts),
    Err(TilerError::Config(ConfigError::UnsupportedTransform { .. }))
  ));
  assert!(!out.exists());

  opts.srs_in = Some("4978".into());
  assert_eq!(convert(&opts).unwrap().points_written, 20);
}

/// Shifts every position along X.
struct ShiftX(f64);

impl SrsTransformer for ShiftX {
  fn transform(&self, positions: &mut [DVec3]) -> Result<(), TilerError> {
    for p in positions {
      p.x += self.0;
    }
    Ok(())
  }
}

#[test]
fn test_custom_srs_transformer() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 200, 1.0, 8);
  let out = dir.path().join("out");
  let mut opts = options(vec![input], &out, 2);
  opts.srs_in = Some("2154".into());
  opts.srs_out = Some("4978".into());

  let reader = Arc::new(XyzReader::new(100).unwrap());
  let report = convert_with(
    &opts,
    reader,
    Arc::new(PntsCodec::default()),
    Some(Arc::new(ShiftX(1_000.0))),
  )
  .unwrap();
  assert_eq!(report.points_written, 200);

  // Local positions stay near the origin; the offset carries the shift.
  let summary = read_tileset(&out, &PntsCodec::default()).unwrap();
  let transform = summary.tileset.root.transform.unwrap();
  assert!(transform[12] >= 1_000.0 && transform[12] < 1_001.0);
  let root = fs::read(tile_filename(&out, &NodePath::root(), &PntsCodec::default())).unwrap();
  for point in PntsCodec::default().decode(&root).unwrap() {
    assert!(point.position[0] < 2.0);
  }
}

// =========================================================================
// Failures
// =========================================================================

/// Refuses to encode anything.
struct BrokenCodec;

impl TileCodec for BrokenCodec {
  fn extension(&self) -> &'static str {
    ".pnts"
  }

  fn encode(&self, _points: &[Point]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::FeatureTable("disk full".into()))
  }

  fn decode(&self, _bytes: &[u8]) -> Result<Vec<Point>, CodecError> {
    Ok(Vec::new())
  }
}

/// A failing job aborts the run and no tileset is produced.
#[test]
fn test_worker_failure_aborts() {
  let dir = tempfile::tempdir().unwrap();
  let input = write_cloud(dir.path(), "cube.xyz", 100, 1.0, 6);
  let out = dir.path().join("out");
  let opts = options(vec![input], &out, 2);
  let reader = Arc::new(XyzReader::new(100).unwrap());

  let err = convert_with(&opts, reader, Arc::new(BrokenCodec), None).unwrap_err();
  match err {
    TilerError::WorkerFailed { message, .. } => assert!(message.contains("disk full"), "{message}"),
    other => panic!("unexpected {other:?}"),
  }
  assert!(!out.join(TILESET_FILE).exists());
}
