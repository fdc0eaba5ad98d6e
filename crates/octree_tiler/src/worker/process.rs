//! PROCESS_JOBS: insert queued tasks into their nodes.

use tracing::{instrument, trace};

use super::WorkerContext;
use crate::error::{ProtocolError, TilerError};
use crate::octree::Node;
use crate::points::PointBatch;
use crate::protocol::{ProcessJob, ProcessedNode, Response, Task};

/// Process every node of the message.
///
/// For each node the child NEW_TASKs are emitted before its PROCESSED, so
/// the dispatcher already queued the children when it sees the parent done.
#[instrument(skip_all, name = "worker::process_jobs", fields(nodes = jobs.len()))]
pub fn process_jobs<E>(ctx: &WorkerContext, jobs: Vec<ProcessJob>, emit: &mut E) -> Result<(), TilerError>
where
  E: FnMut(Response) -> Result<(), TilerError>,
{
  for job in jobs {
    process_node(ctx, job, emit)?;
  }
  Ok(())
}

fn process_node<E>(ctx: &WorkerContext, job: ProcessJob, emit: &mut E) -> Result<(), TilerError>
where
  E: FnMut(Response) -> Result<(), TilerError>,
{
  let mut node = Node::from_buffer(&job.path, &job.buffer)?;

  let mut incoming = Vec::with_capacity(job.point_count() as usize);
  for task in &job.tasks {
    let batch = PointBatch::decode(&task.points)?;
    if batch.len() != task.point_count as usize {
      return Err(
        ProtocolError::Malformed(format!(
          "task for '{}' announces {} points, carries {}",
          job.path,
          task.point_count,
          batch.len()
        ))
        .into(),
      );
    }
    incoming.extend(batch.points);
  }

  let outcome = node.insert(&ctx.metadata, incoming);
  let absorbed = outcome.absorbed;
  trace!(
    node = %job.path,
    absorbed,
    forwarded = outcome.forwarded_count(),
    "node processed"
  );

  for (octant, points) in outcome.child_batches() {
    let count = points.len();
    let point_count = u32::try_from(count)
      .map_err(|_| ProtocolError::Malformed(format!("child batch of {count} points")))?;
    emit(Response::NewTask {
      path: job.path.child(octant),
      task: Task {
        points: PointBatch::new(points).encode()?,
        point_count,
      },
    })?;
  }

  let buffer = if node.is_empty() {
    Vec::new()
  } else {
    node.to_buffer()?
  };
  emit(Response::Processed(ProcessedNode {
    path: job.path,
    buffer,
    absorbed,
  }))
}
