//! Tile payload codecs.

mod pnts;

use std::path::{Path, PathBuf};

use crate::error::CodecError;
use crate::octree::NodePath;
use crate::points::Point;

pub use pnts::PntsCodec;

/// Encoder/decoder of one tile payload format.
pub trait TileCodec: Send + Sync {
  /// File suffix including the dot, e.g. `.pnts`.
  fn extension(&self) -> &'static str;

  fn encode(&self, points: &[Point]) -> Result<Vec<u8>, CodecError>;

  fn decode(&self, bytes: &[u8]) -> Result<Vec<Point>, CodecError>;
}

/// Location of the tile of `path` inside `out_dir`.
pub fn tile_filename(out_dir: &Path, path: &NodePath, codec: &dyn TileCodec) -> PathBuf {
  out_dir.join(path.relative_file(codec.extension()))
}
