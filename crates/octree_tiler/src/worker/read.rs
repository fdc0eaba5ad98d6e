//! READ_FILE: stream one file portion into root tasks.

use glam::DVec3;
use tracing::{instrument, warn};

use super::WorkerContext;
use crate::constants::READ_BATCH_POINTS;
use crate::error::{ProtocolError, TilerError};
use crate::octree::NodePath;
use crate::points::{Point, PointBatch};
use crate::protocol::{ReadJob, Response, Task};
use crate::reader::RawPoint;
use crate::transform::PointTransform;

/// Read `job.portion`, emit one NEW_TASK per batch of at most
/// `READ_BATCH_POINTS` points, then READ_DONE.
///
/// Every point goes to the root: a reader has no knowledge of the tree.
#[instrument(skip_all, name = "worker::read_portion", fields(file = %job.portion.path.display()))]
pub fn read_portion<E>(ctx: &WorkerContext, job: &ReadJob, emit: &mut E) -> Result<(), TilerError>
where
  E: FnMut(Response) -> Result<(), TilerError>,
{
  let transform = job.transform.for_file(job.portion.color_scale);
  let mut batch: Vec<RawPoint> = Vec::with_capacity(READ_BATCH_POINTS);
  let mut total = 0u64;

  for raw in ctx.reader.read(&job.portion)? {
    batch.push(raw?);
    if batch.len() == READ_BATCH_POINTS {
      total += flush(ctx, &transform, &mut batch, emit)?;
    }
  }
  if !batch.is_empty() {
    total += flush(ctx, &transform, &mut batch, emit)?;
  }

  if total != job.portion.point_count {
    warn!(
      expected = job.portion.point_count,
      read = total,
      "portion yielded an unexpected number of points"
    );
  }
  emit(Response::ReadDone)
}

fn flush<E>(
  ctx: &WorkerContext,
  transform: &PointTransform,
  batch: &mut Vec<RawPoint>,
  emit: &mut E,
) -> Result<u64, TilerError>
where
  E: FnMut(Response) -> Result<(), TilerError>,
{
  if let Some(srs) = &ctx.srs {
    let mut positions: Vec<DVec3> = batch.iter().map(|p| p.position).collect();
    srs.transform(&mut positions)?;
    for (raw, position) in batch.iter_mut().zip(positions) {
      raw.position = position;
    }
  }

  let points: Vec<Point> = batch.drain(..).map(|raw| transform.apply(&raw)).collect();
  let count = points.len();
  let point_count = u32::try_from(count)
    .map_err(|_| ProtocolError::Malformed(format!("batch of {count} points")))?;
  emit(Response::NewTask {
    path: NodePath::root(),
    task: Task {
      points: PointBatch::new(points).encode()?,
      point_count,
    },
  })?;
  Ok(count as u64)
}
