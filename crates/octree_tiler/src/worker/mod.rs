//! Stateless job executor.
//!
//! A worker announces itself with IDLE, then loops: receive one command,
//! execute it, answer. Jobs only see what the message carries plus the
//! immutable [`WorkerContext`]; all coordination state lives in the
//! dispatcher.
//!
//! ```text
//! ┌────────────┐  command  ┌────────┐  NEW_TASK* PROCESSED | READ_DONE | PNTS_WRITTEN
//! │ Dispatcher ├──────────►│ Worker ├──────────────────────────────────────────────┐
//! └─────▲──────┘           └────────┘  then IDLE (or FAILED and exit)              │
//!       └──────────────────────────────────────────────────────────────────────────┘
//! ```

mod process;
mod read;
mod write;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, trace};
use web_time::Instant;

pub use process::process_jobs;
pub use read::read_portion;
pub use write::write_node;

use crate::bus::Dealer;
use crate::codec::TileCodec;
use crate::constants::LATENCY_LOG_THRESHOLD_US;
use crate::error::TilerError;
use crate::octree::OctreeMetadata;
use crate::protocol::{now_us, Command, Response};
use crate::reader::PointReader;
use crate::transform::SrsTransformer;

/// Immutable collaborators shared by every worker.
pub struct WorkerContext {
  pub metadata: OctreeMetadata,
  pub out_dir: PathBuf,
  pub reader: Arc<dyn PointReader>,
  pub codec: Arc<dyn TileCodec>,
  pub srs: Option<Arc<dyn SrsTransformer>>,
}

pub struct Worker {
  dealer: Dealer,
  ctx: Arc<WorkerContext>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "worker panicked".to_string()
  }
}

impl Worker {
  pub fn new(dealer: Dealer, ctx: Arc<WorkerContext>) -> Self {
    Self { dealer, ctx }
  }

  /// Serve commands until SHUTDOWN, a failure, or the router closing.
  pub fn run(self) {
    let id = self.dealer.id();
    if self.dealer.send(Response::Idle.encode()).is_err() {
      return;
    }

    while let Some(frames) = self.dealer.recv() {
      let (sent_at, command) = match Command::decode(&frames) {
        Ok(decoded) => decoded,
        Err(e) => {
          error!(worker = id, error = %e, "rejecting command");
          let _ = self.dealer.send(Response::Failed(e.to_string()).encode());
          return;
        }
      };

      let latency = now_us().saturating_sub(sent_at);
      if latency > LATENCY_LOG_THRESHOLD_US {
        debug!(worker = id, latency_ms = latency / 1_000, "command waited in queue");
      }

      if matches!(command, Command::Shutdown) {
        let _ = self.dealer.send(Response::Halted.encode());
        return;
      }

      let kind = command.kind();
      let start = Instant::now();
      let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(command)));
      let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(panic_message(payload)),
      };
      trace!(worker = id, kind, elapsed_us = start.elapsed().as_micros() as u64, "job done");

      match failure {
        None => {
          if self.dealer.send(Response::Idle.encode()).is_err() {
            return;
          }
        }
        Some(message) => {
          error!(worker = id, kind, %message, "job failed");
          let _ = self.dealer.send(Response::Failed(message).encode());
          return;
        }
      }
    }
  }

  fn execute(&self, command: Command) -> Result<(), TilerError> {
    let mut emit = |response: Response| -> Result<(), TilerError> {
      self.dealer.send(response.encode())?;
      Ok(())
    };
    match command {
      Command::ReadFile(job) => read_portion(&self.ctx, &job, &mut emit),
      Command::ProcessJobs(jobs) => process_jobs(&self.ctx, jobs, &mut emit),
      Command::WritePnts(job) => write_node(&self.ctx, &job, &mut emit),
      Command::Shutdown => Ok(()),
    }
  }
}
