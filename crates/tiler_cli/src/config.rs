//! Optional TOML file supplying defaults for any command line option.
//!
//! ```toml
//! files = ["scan_a.xyz", "scan_b.xyz"]
//! out = "tiles"
//! jobs = 8
//! cache_size = 2048
//! rgb = true
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Every field is optional; the command line wins over the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
	/// Inputs, used when none is given on the command line.
	#[serde(default)]
	pub files: Vec<PathBuf>,
	pub out: Option<PathBuf>,
	pub overwrite: Option<bool>,
	pub jobs: Option<usize>,
	/// Node cache size in MB.
	pub cache_size: Option<u64>,
	pub srs_in: Option<String>,
	pub srs_out: Option<String>,
	pub fraction: Option<u8>,
	pub rgb: Option<bool>,
	pub graph: Option<bool>,
	pub color_scale: Option<f64>,
	pub benchmark: Option<String>,
	/// Read back-pressure: points read but not yet absorbed by a node.
	pub max_points_in_progress: Option<u64>,
	pub node_capacity: Option<usize>,
	pub max_depth: Option<usize>,
}

impl FileConfig {
	/// Load configuration from a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file: {}", path.display()))?;
		let config: FileConfig = toml::from_str(&content)
			.with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;

		if config.jobs == Some(0) {
			anyhow::bail!("jobs must be at least 1");
		}
		if let Some(fraction) = config.fraction {
			if fraction == 0 || fraction > 100 {
				anyhow::bail!("fraction must be within 1..=100, got {}", fraction);
			}
		}

		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write(dir: &Path, content: &str) -> PathBuf {
		let path = dir.join("tiler.toml");
		std::fs::write(&path, content).unwrap();
		path
	}

	#[test]
	fn test_load_partial_config() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(
			dir.path(),
			"files = [\"a.xyz\"]\nout = \"tiles\"\njobs = 3\nrgb = false\n",
		);
		let config = FileConfig::load(&path).unwrap();
		assert_eq!(config.files, vec![PathBuf::from("a.xyz")]);
		assert_eq!(config.out, Some(PathBuf::from("tiles")));
		assert_eq!(config.jobs, Some(3));
		assert_eq!(config.rgb, Some(false));
		assert!(config.srs_out.is_none());
	}

	#[test]
	fn test_rejects_invalid_values() {
		let dir = tempfile::tempdir().unwrap();
		assert!(FileConfig::load(&write(dir.path(), "jobs = 0\n")).is_err());
		assert!(FileConfig::load(&write(dir.path(), "fraction = 101\n")).is_err());
		assert!(FileConfig::load(&write(dir.path(), "unknown_key = 1\n")).is_err());
	}

	#[test]
	fn test_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		assert!(FileConfig::load(&dir.path().join("absent.toml")).is_err());
	}
}
