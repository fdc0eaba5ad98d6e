//! Tileset assembler - turns the written tiles into `tileset.json`.
//!
//! The tree is rebuilt from the files alone: a tile exists for a path when
//! its file exists, and children are probed for all eight octants. Sibling
//! subtrees are assembled in parallel.

use std::fs;
use std::path::{Component, Path};

use glam::DVec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::{tile_filename, TileCodec};
use crate::constants::GEOMETRIC_ERROR_FACTOR;
use crate::error::TilerError;
use crate::octree::{DAabb3, NodePath, OctreeMetadata};
use crate::transform::PointTransform;

pub const TILESET_FILE: &str = "tileset.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Asset {
  pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoundingVolume {
  #[serde(rename = "box")]
  pub bounding_box: [f64; 12],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Content {
  pub uri: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Refine {
  Replace,
  Add,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub transform: Option<[f64; 16]>,
  pub bounding_volume: BoundingVolume,
  pub geometric_error: f64,
  pub refine: Refine,
  pub content: Content,
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub children: Vec<Tile>,
}

impl Tile {
  /// Number of tiles in this subtree.
  pub fn count(&self) -> usize {
    1 + self.children.iter().map(Tile::count).sum::<usize>()
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
  pub asset: Asset,
  pub geometric_error: f64,
  pub root: Tile,
}

/// `content.uri` of a tile file, always with forward slashes.
fn content_uri(relative: &Path) -> String {
  relative
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
      _ => None,
    })
    .collect::<Vec<_>>()
    .join("/")
}

fn build_tile(
  out_dir: &Path,
  path: &NodePath,
  metadata: &OctreeMetadata,
  codec: &dyn TileCodec,
) -> Result<Option<Tile>, TilerError> {
  let file = tile_filename(out_dir, path, codec);
  if !file.is_file() {
    return Ok(None);
  }
  let bytes = fs::read(&file).map_err(|e| TilerError::io(&file, e))?;
  let points = codec.decode(&bytes)?;
  let aabb = DAabb3::from_points(points.iter().map(|p| p.position_vec().as_dvec3()))
    .unwrap_or_else(|| DAabb3::new(DVec3::ZERO, DVec3::ZERO));

  let children = (0..8u8)
    .into_par_iter()
    .map(|octant| build_tile(out_dir, &path.child(octant), metadata, codec))
    .collect::<Result<Vec<_>, TilerError>>()?
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

  let geometric_error = if children.is_empty() {
    0.0
  } else {
    GEOMETRIC_ERROR_FACTOR * metadata.node_spacing(path.depth()) / metadata.scale
  };

  Ok(Some(Tile {
    transform: None,
    bounding_volume: BoundingVolume {
      bounding_box: aabb.to_box_volume(),
    },
    geometric_error,
    refine: if path.is_root() {
      Refine::Replace
    } else {
      Refine::Add
    },
    content: Content {
      uri: content_uri(&path.relative_file(codec.extension())),
    },
    children,
  }))
}

/// Assemble the tileset from the tiles found in `out_dir`.
#[tracing::instrument(skip_all, name = "tileset::build")]
pub fn build_tileset(
  out_dir: &Path,
  metadata: &OctreeMetadata,
  transform: &PointTransform,
  codec: &dyn TileCodec,
) -> Result<Tileset, TilerError> {
  let root_path = NodePath::root();
  let mut root = build_tile(out_dir, &root_path, metadata, codec)?
    .ok_or_else(|| TilerError::MissingRoot(tile_filename(out_dir, &root_path, codec)))?;
  root.transform = Some(transform.tileset_matrix());
  debug!(tiles = root.count(), "tileset assembled");
  Ok(Tileset {
    asset: Asset {
      version: "1.0".to_string(),
    },
    geometric_error: metadata.root_geometric_error(),
    root,
  })
}

/// Build and write `<out_dir>/tileset.json`. Returns the tile count.
pub fn write_tileset(
  out_dir: &Path,
  metadata: &OctreeMetadata,
  transform: &PointTransform,
  codec: &dyn TileCodec,
) -> Result<usize, TilerError> {
  let tileset = build_tileset(out_dir, metadata, transform, codec)?;
  let file = out_dir.join(TILESET_FILE);
  let json = serde_json::to_vec_pretty(&tileset)?;
  fs::write(&file, json).map_err(|e| TilerError::io(&file, e))?;
  let tiles = tileset.root.count();
  info!(tiles, file = %file.display(), "tileset written");
  Ok(tiles)
}

/// Summary of a tileset read back from disk.
#[derive(Debug)]
pub struct TilesetSummary {
  pub tileset: Tileset,
  pub tiles: usize,
  pub points: u64,
}

/// Load `<out_dir>/tileset.json` and decode every referenced tile.
pub fn read_tileset(out_dir: &Path, codec: &dyn TileCodec) -> Result<TilesetSummary, TilerError> {
  let file = out_dir.join(TILESET_FILE);
  let json = fs::read(&file).map_err(|e| TilerError::io(&file, e))?;
  let tileset: Tileset = serde_json::from_slice(&json)?;

  let mut tiles = 0;
  let mut points = 0u64;
  let mut stack = vec![&tileset.root];
  while let Some(tile) = stack.pop() {
    let tile_file = out_dir.join(&tile.content.uri);
    let bytes = fs::read(&tile_file).map_err(|e| TilerError::io(&tile_file, e))?;
    points += codec.decode(&bytes)?.len() as u64;
    tiles += 1;
    stack.extend(tile.children.iter());
  }
  Ok(TilesetSummary {
    tileset,
    tiles,
    points,
  })
}
