//! Manager - worker pool, router and idle bookkeeping.
//!
//! Each worker is one long-lived job on a dedicated rayon pool sized to the
//! worker count, so every worker owns a thread for the whole run.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::bus::{self, Router, WorkerId};
use crate::error::{ProtocolError, TilerError};
use crate::protocol::{now_us, Command, Response};
use crate::worker::{Worker, WorkerContext};

pub struct Manager {
  router: Router,
  _pool: ThreadPool,
  idle: VecDeque<WorkerId>,
  worker_count: usize,
  halted: HashSet<WorkerId>,
  shutdown_sent: bool,
}

impl Manager {
  /// Spawn `jobs` workers sharing `ctx`.
  pub fn start(jobs: usize, ctx: Arc<WorkerContext>) -> Result<Self, TilerError> {
    if jobs == 0 {
      return Err(crate::error::ConfigError::NoWorkers.into());
    }
    let pool = ThreadPoolBuilder::new()
      .num_threads(jobs)
      .thread_name(|i| format!("tiler-worker-{i}"))
      .build()?;
    let (router, dealers) = bus::router(jobs);
    for dealer in dealers {
      let worker = Worker::new(dealer, Arc::clone(&ctx));
      pool.spawn(move || worker.run());
    }
    debug!(workers = jobs, "worker pool started");
    Ok(Self {
      router,
      _pool: pool,
      idle: VecDeque::with_capacity(jobs),
      worker_count: jobs,
      halted: HashSet::with_capacity(jobs),
      shutdown_sent: false,
    })
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  pub fn has_idle(&self) -> bool {
    !self.idle.is_empty()
  }

  pub fn idle_count(&self) -> usize {
    self.idle.len()
  }

  /// Every live worker is idle.
  pub fn all_idle(&self) -> bool {
    self.idle.len() + self.halted.len() == self.worker_count
  }

  pub fn shutdown_sent(&self) -> bool {
    self.shutdown_sent
  }

  /// Every worker acknowledged SHUTDOWN.
  pub fn is_finished(&self) -> bool {
    self.halted.len() == self.worker_count
  }

  pub fn mark_idle(&mut self, worker: WorkerId) -> Result<(), ProtocolError> {
    if worker >= self.worker_count {
      return Err(ProtocolError::UnknownWorker(worker));
    }
    if self.idle.contains(&worker) {
      return Err(ProtocolError::DuplicateIdle(worker));
    }
    self.idle.push_back(worker);
    Ok(())
  }

  pub fn mark_halted(&mut self, worker: WorkerId) -> Result<(), ProtocolError> {
    if worker >= self.worker_count {
      return Err(ProtocolError::UnknownWorker(worker));
    }
    if !self.halted.insert(worker) {
      return Err(ProtocolError::DuplicateHalted(worker));
    }
    Ok(())
  }

  /// Hand `command` to the longest idle worker.
  pub fn send_to_idle(&mut self, command: &Command) -> Result<WorkerId, ProtocolError> {
    let worker = self.idle.pop_front().ok_or(ProtocolError::NoIdleWorker)?;
    self.router.send(worker, command.encode(now_us()))?;
    Ok(worker)
  }

  /// Send SHUTDOWN to every idle worker.
  pub fn broadcast_shutdown(&mut self) -> Result<usize, ProtocolError> {
    let mut sent = 0;
    while let Some(worker) = self.idle.pop_front() {
      self.router.send(worker, Command::Shutdown.encode(now_us()))?;
      sent += 1;
    }
    self.shutdown_sent = true;
    debug!(workers = sent, "shutdown broadcast");
    Ok(sent)
  }

  /// Next response; blocks when `block` is set.
  ///
  /// A disconnected bus is only an error while some worker has not halted.
  pub fn recv(&self, block: bool) -> Result<Option<(WorkerId, Response)>, ProtocolError> {
    let message = if block {
      self.router.recv().map(Some)
    } else {
      self.router.try_recv()
    };
    match message {
      Ok(Some((worker, frames))) => Ok(Some((worker, Response::decode(&frames)?))),
      Ok(None) => Ok(None),
      Err(ProtocolError::Disconnected) if self.is_finished() => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// Close every command channel; workers exit on their next receive.
  pub fn terminate(&mut self) {
    self.router.close();
  }
}

impl Drop for Manager {
  fn drop(&mut self) {
    self.terminate();
  }
}
