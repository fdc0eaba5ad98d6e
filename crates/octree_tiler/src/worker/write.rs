//! WRITE_PNTS: encode a finalized node and persist its tile.

use std::fs;

use tracing::instrument;

use super::WorkerContext;
use crate::codec::tile_filename;
use crate::error::{CodecError, TilerError};
use crate::octree::Node;
use crate::protocol::{Response, WriteJob};

#[instrument(skip_all, name = "worker::write_node", fields(node = %job.path))]
pub fn write_node<E>(ctx: &WorkerContext, job: &WriteJob, emit: &mut E) -> Result<(), TilerError>
where
  E: FnMut(Response) -> Result<(), TilerError>,
{
  let node = Node::from_buffer(&job.path, &job.buffer)?;
  let points = node.points();
  let bytes = ctx.codec.encode(&points)?;

  let file = tile_filename(&ctx.out_dir, &job.path, ctx.codec.as_ref());
  if let Some(parent) = file.parent() {
    fs::create_dir_all(parent).map_err(|e| TilerError::io(parent, e))?;
  }
  fs::write(&file, &bytes).map_err(|e| TilerError::io(&file, e))?;

  emit(Response::PntsWritten {
    points: u32::try_from(points.len()).map_err(|_| CodecError::TooLarge)?,
    bytes: u32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge)?,
  })
}
