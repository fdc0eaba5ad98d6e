//! Dispatcher - the single owner of scheduling state.
//!
//! Each tick drains worker responses, then hands out jobs in priority
//! order (writes, processing, reads), then trims the node store.
//!
//! ```text
//!  responses ──► State ──► writes ──► process batches ──► reads ──► store trim
//!      ▲                                                               │
//!      └───────────────────────────── next tick ───────────────────────┘
//! ```
//!
//! The loop blocks when no worker is idle, or when the previous tick had
//! nothing to hand out (only a response can create new work). It ends once
//! every worker acknowledged SHUTDOWN.

mod clearance;
mod manager;
mod state;

use std::collections::HashMap;

use tracing::{debug, info, warn};
use web_time::Instant;

pub use clearance::{can_pnts_be_written, is_ancestor, is_ancestor_name, is_blocked, related};
pub use manager::Manager;
pub use state::{Counters, QueuedNode, State};

use crate::bus::WorkerId;
use crate::error::{StoreError, TilerError};
use crate::metrics::{JobTimings, ProgressLog};
use crate::protocol::{Command, ProcessJob, ReadJob, Response, WriteJob};
use crate::store::NodeStore;
use crate::transform::PointTransform;

/// Tunables of the dispatch loop.
#[derive(Clone, Copy, Debug)]
pub struct DispatchLimits {
  /// Target point count of one PROCESS_JOBS message.
  pub process_batch_target: u64,
  /// Resident byte budget of the node store.
  pub cache_budget_bytes: usize,
}

/// What the loop observed besides the counters kept in [`State`].
#[derive(Debug, Default)]
pub struct DispatchStats {
  pub timings: JobTimings,
  pub progress: ProgressLog,
  pub evicted_entries: usize,
}

#[derive(Clone, Copy, Debug)]
enum JobKind {
  Read,
  Write,
  Process,
}

/// Drive `manager`'s workers until the pipeline is drained and every
/// worker halted.
#[tracing::instrument(skip_all, name = "dispatcher::run")]
pub fn run(
  state: &mut State,
  store: &mut NodeStore,
  manager: &mut Manager,
  transform: &PointTransform,
  limits: DispatchLimits,
) -> Result<DispatchStats, TilerError> {
  let started = Instant::now();
  let mut last_report = started;
  let mut stats = DispatchStats::default();
  let mut running: HashMap<WorkerId, (JobKind, Instant)> = HashMap::new();
  let mut stalled = false;

  while !manager.is_finished() {
    // 1. responses
    let mut block = stalled || !manager.has_idle();
    while let Some((worker, response)) = manager.recv(block)? {
      block = false;
      match response {
        Response::Idle => {
          manager.mark_idle(worker)?;
          if let Some((kind, since)) = running.remove(&worker) {
            let elapsed_us = since.elapsed().as_micros() as u64;
            match kind {
              JobKind::Read => stats.timings.read_us.push(elapsed_us),
              JobKind::Write => stats.timings.write_us.push(elapsed_us),
              JobKind::Process => {}
            }
          }
        }
        Response::Halted => manager.mark_halted(worker)?,
        Response::ReadDone => state.on_read_done()?,
        Response::Processed(node) => {
          let finalized = !node.buffer.is_empty();
          if finalized {
            store.put(node.path.clone(), node.buffer)?;
          }
          let elapsed = state.on_processed(&node.path, node.absorbed, finalized)?;
          stats.timings.process_us.push(elapsed.as_micros() as u64);
        }
        Response::PntsWritten { points, bytes } => state.on_written(points, bytes)?,
        Response::NewTask { path, task } => state.add_task(path, task)?,
        Response::Failed(message) => {
          return Err(TilerError::WorkerFailed { worker, message });
        }
      }
    }
    if manager.shutdown_sent() {
      continue;
    }
    let dispatched_before = running.len();

    // 2. writes
    while manager.has_idle() {
      let Some(path) = state.next_write() else {
        break;
      };
      let buffer = store.get(&path)?;
      let worker = manager.send_to_idle(&Command::WritePnts(WriteJob {
        path: path.clone(),
        buffer,
      }))?;
      store.remove(&path)?;
      running.insert(worker, (JobKind::Write, Instant::now()));
    }

    // 3. processing
    while manager.has_idle() && state.has_node_work() {
      let batch = state.next_process_batch(limits.process_batch_target);
      if batch.is_empty() {
        break;
      }
      let jobs = batch
        .into_iter()
        .map(|(path, queued)| {
          let buffer = if store.contains(&path) {
            store.take(&path)?
          } else {
            Vec::new()
          };
          Ok(ProcessJob {
            path,
            buffer,
            tasks: queued.tasks,
          })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
      let worker = manager.send_to_idle(&Command::ProcessJobs(jobs))?;
      running.insert(worker, (JobKind::Process, Instant::now()));
    }

    // 4. reads
    while manager.has_idle() && state.can_add_reading_job() {
      let Some(portion) = state.next_reading_job() else {
        break;
      };
      debug!(file = %portion.path.display(), points = portion.point_count, "dispatching read");
      let worker = manager.send_to_idle(&Command::ReadFile(ReadJob {
        portion,
        transform: transform.clone(),
      }))?;
      running.insert(worker, (JobKind::Read, Instant::now()));
    }

    stalled = running.len() == dispatched_before;

    // 5. shutdown
    if manager.all_idle() {
      if !state.is_drained() {
        warn!(
          queued = state.queued_len(),
          waiting = state.waiting_len(),
          "every worker idle with work left behind"
        );
      }
      manager.broadcast_shutdown()?;
    }

    // 6. memory
    stats.evicted_entries += store.control_memory_usage(limits.cache_budget_bytes)?;

    let elapsed_s = started.elapsed().as_secs_f64();
    stats.progress.record(elapsed_s, state.progress_percent());
    if last_report.elapsed().as_secs() >= 1 {
      last_report = Instant::now();
      let counters = state.counters();
      info!(
        percent = state.progress_percent(),
        in_flight = counters.points_in_flight,
        queued = state.queued_len(),
        processing = state.processing_len(),
        waiting = state.waiting_len(),
        tiles = counters.tiles_written,
        resident_mb = store.resident_bytes() / (1024 * 1024),
        "progress"
      );
    }
  }

  debug!(
    elapsed_s = started.elapsed().as_secs_f64(),
    evicted = stats.evicted_entries,
    "dispatcher finished"
  );
  Ok(stats)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use glam::DVec3;

  use super::*;
  use crate::codec::PntsCodec;
  use crate::octree::{DAabb3, OctreeMetadata};
  use crate::protocol::Command;
  use crate::reader::XyzReader;
  use crate::worker::WorkerContext;

  fn context(out_dir: &std::path::Path) -> Arc<WorkerContext> {
    Arc::new(WorkerContext {
      metadata: OctreeMetadata::from_offset_aabb(DAabb3::new(DVec3::ZERO, DVec3::ONE)),
      out_dir: out_dir.to_path_buf(),
      reader: Arc::new(XyzReader::new(100).unwrap()),
      codec: Arc::new(PntsCodec::default()),
      srs: None,
    })
  }

  fn wait_idle(manager: &mut Manager, count: usize) {
    for _ in 0..count {
      let (worker, response) = manager.recv(true).unwrap().unwrap();
      assert!(matches!(response, Response::Idle));
      manager.mark_idle(worker).unwrap();
    }
  }

  #[test]
  fn test_manager_shutdown_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = Manager::start(2, context(dir.path())).unwrap();
    wait_idle(&mut manager, 2);
    assert!(manager.all_idle());

    assert_eq!(manager.broadcast_shutdown().unwrap(), 2);
    assert!(!manager.has_idle());
    let (first, response) = manager.recv(true).unwrap().unwrap();
    assert!(matches!(response, Response::Halted));
    manager.mark_halted(first).unwrap();

    // A repeated HALTED must not count as the second worker.
    assert!(matches!(
      manager.mark_halted(first),
      Err(crate::error::ProtocolError::DuplicateHalted(w)) if w == first
    ));
    assert!(!manager.is_finished());

    let (second, response) = manager.recv(true).unwrap().unwrap();
    assert!(matches!(response, Response::Halted));
    assert_ne!(first, second);
    manager.mark_halted(second).unwrap();
    assert!(manager.is_finished());
  }

  #[test]
  fn test_dispatch_requires_idle_worker() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = Manager::start(1, context(dir.path())).unwrap();
    assert!(matches!(
      manager.send_to_idle(&Command::Shutdown),
      Err(crate::error::ProtocolError::NoIdleWorker)
    ));
    wait_idle(&mut manager, 1);
    assert!(matches!(
      manager.mark_idle(0),
      Err(crate::error::ProtocolError::DuplicateIdle(0))
    ));
  }

  #[test]
  fn test_zero_workers_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Manager::start(0, context(dir.path())).is_err());
  }

  /// Empty input: the loop only performs the startup and shutdown handshake.
  #[test]
  fn test_run_without_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = Manager::start(2, context(dir.path())).unwrap();
    let mut state = State::new(Vec::new(), 0, 1_000, 1);
    let mut store = NodeStore::new(dir.path().join("tmp"));
    let limits = DispatchLimits {
      process_batch_target: 100,
      cache_budget_bytes: 1 << 20,
    };
    run(&mut state, &mut store, &mut manager, &PointTransform::default(), limits).unwrap();
    assert!(manager.is_finished());
    assert!(state.is_drained());
    assert_eq!(state.counters().tiles_written, 0);
  }
}
