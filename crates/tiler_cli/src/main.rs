//! Point cloud to 3D Tiles converter.
//!
//! Reads one or more point cloud files and writes an octree of `pnts` tiles
//! plus `tileset.json` into the output folder.

mod config;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::FileConfig;
use octree_tiler::ConvertOptions;

/// Point cloud to 3D Tiles converter.
#[derive(Parser, Debug)]
#[command(name = "convert_tiles")]
#[command(about = "Converts point cloud files into a 3D Tiles tileset")]
struct Args {
	/// Input files (.xyz or .txt), all with the same extension.
	files: Vec<PathBuf>,

	/// Folder where the tileset is written [default: ./3dtiles].
	#[arg(long)]
	out: Option<PathBuf>,

	/// Delete and recreate the output folder if it already exists.
	#[arg(long)]
	overwrite: bool,

	/// Number of workers [default: number of CPUs].
	#[arg(long)]
	jobs: Option<usize>,

	/// Node cache size in MB [default: 1024].
	#[arg(long)]
	cache_size: Option<u64>,

	/// Output SRS (numeric part of the EPSG code).
	#[arg(long)]
	srs_out: Option<String>,

	/// Override the input SRS (numeric part of the EPSG code).
	#[arg(long)]
	srs_in: Option<String>,

	/// Percentage of the point cloud to process [default: 100].
	#[arg(long)]
	fraction: Option<u8>,

	/// Export RGB attributes [default: true].
	#[arg(long)]
	rgb: Option<bool>,

	/// Write progression.csv next to the tileset.
	#[arg(long)]
	graph: bool,

	/// Force the color scale factor.
	#[arg(long)]
	color_scale: Option<f64>,

	/// Log a summary line under this label when done.
	#[arg(long)]
	benchmark: Option<String>,

	/// TOML file supplying defaults for any option.
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Raise log verbosity (-v info, -vv debug, -vvv trace).
	#[arg(short, long, action = ArgAction::Count)]
	verbose: u8,
}

fn init_logging(verbose: u8) {
	let level = match verbose {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Command line over config file over library defaults.
fn merge(args: Args, file: FileConfig) -> ConvertOptions {
	let files = if args.files.is_empty() {
		file.files
	} else {
		args.files
	};
	let out = args
		.out
		.or(file.out)
		.unwrap_or_else(|| PathBuf::from("./3dtiles"));

	let mut options = ConvertOptions::new(files, out);
	options.overwrite = args.overwrite || file.overwrite.unwrap_or(false);
	if let Some(jobs) = args.jobs.or(file.jobs) {
		options.jobs = jobs;
	}
	if let Some(cache_size) = args.cache_size.or(file.cache_size) {
		options.cache_size_mb = cache_size;
	}
	options.srs_in = args.srs_in.or(file.srs_in);
	options.srs_out = args.srs_out.or(file.srs_out);
	if let Some(fraction) = args.fraction.or(file.fraction) {
		options.fraction = fraction;
	}
	if let Some(rgb) = args.rgb.or(file.rgb) {
		options.rgb = rgb;
	}
	options.graph = args.graph || file.graph.unwrap_or(false);
	options.color_scale = args.color_scale.or(file.color_scale);
	options.benchmark = args.benchmark.or(file.benchmark);
	if let Some(max) = file.max_points_in_progress {
		options.max_points_in_progress = max;
	}
	if let Some(capacity) = file.node_capacity {
		options.node_capacity = capacity;
	}
	if let Some(depth) = file.max_depth {
		options.max_depth = depth;
	}
	options
}

fn main() -> Result<()> {
	let args = Args::parse();
	init_logging(args.verbose);

	let file = match &args.config {
		Some(path) => FileConfig::load(path)?,
		None => FileConfig::default(),
	};
	let options = merge(args, file);
	if options.files.is_empty() {
		anyhow::bail!("No input file given");
	}

	tracing::info!(
		files = options.files.len(),
		out = %options.out.display(),
		jobs = options.jobs,
		"converting"
	);
	let report = octree_tiler::convert(&options)
		.with_context(|| format!("Conversion into {} failed", options.out.display()))?;

	println!(
		"Wrote {} points in {} tiles ({} bytes) to {} in {:.2}s",
		report.points_written,
		report.tiles_written,
		report.bytes_written,
		options.out.display(),
		report.elapsed.as_secs_f64()
	);
	Ok(())
}
