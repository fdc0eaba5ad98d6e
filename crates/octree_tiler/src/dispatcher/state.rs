//! State - every piece of coordination state, owned by the dispatcher.
//!
//! Per-path lifecycle, driven only by worker responses:
//!
//! ```text
//! unseen ─NEW_TASK─► queued ─dispatch─► processing ─PROCESSED─► waiting ─clear─► cleared ─dispatch─► written
//!                      ▲                                          │
//!                      └─────────────── NEW_TASK ─────────────────┘
//! ```
//!
//! A path sits in at most one of the queue, processing set, waiting list or
//! write queue, except that a processing node may receive new tasks: it is
//! then queued too, but only re-dispatched once its running batch is done.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::trace;
use web_time::Instant;

use super::clearance::{can_pnts_be_written, is_ancestor, is_blocked};
use crate::error::ProtocolError;
use crate::octree::NodePath;
use crate::protocol::Task;
use crate::reader::FilePortion;

/// Tasks accumulated for one node.
#[derive(Debug, Default)]
pub struct QueuedNode {
  pub tasks: Vec<Task>,
  pub point_count: u64,
}

#[derive(Debug)]
struct InProgress {
  task_count: usize,
  point_count: u64,
  started: Instant,
}

/// Cumulative pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
  /// Sum of absorbed deltas: points currently held by nodes.
  pub points_processed: i64,
  /// Points read but not yet absorbed by a node.
  pub points_in_flight: i64,
  pub points_written: u64,
  pub bytes_written: u64,
  pub tiles_written: u64,
  pub active_readers: usize,
  pub active_writers: usize,
}

pub struct State {
  pending_portions: VecDeque<FilePortion>,
  node_to_process: HashMap<NodePath, QueuedNode>,
  processing_nodes: HashMap<NodePath, InProgress>,
  waiting_writing_nodes: Vec<NodePath>,
  pnts_to_writing: VecDeque<NodePath>,
  counters: Counters,
  total_points: u64,
  max_points_in_progress: u64,
  max_readers: usize,
}

impl State {
  pub fn new(
    portions: Vec<FilePortion>,
    total_points: u64,
    max_points_in_progress: u64,
    max_readers: usize,
  ) -> Self {
    Self {
      pending_portions: portions.into(),
      node_to_process: HashMap::new(),
      processing_nodes: HashMap::new(),
      waiting_writing_nodes: Vec::new(),
      pnts_to_writing: VecDeque::new(),
      counters: Counters::default(),
      total_points,
      max_points_in_progress,
      max_readers: max_readers.max(1),
    }
  }

  pub fn counters(&self) -> &Counters {
    &self.counters
  }

  pub fn total_points(&self) -> u64 {
    self.total_points
  }

  /// Written share of the input, 0..=100.
  pub fn progress_percent(&self) -> f64 {
    if self.total_points == 0 {
      return 100.0;
    }
    100.0 * self.counters.points_written as f64 / self.total_points as f64
  }

  // =========================================================================
  // Reading
  // =========================================================================

  /// No portion left and no read outstanding.
  pub fn is_reading_finished(&self) -> bool {
    self.pending_portions.is_empty() && self.counters.active_readers == 0
  }

  /// Reader cap, remaining portions, and the in-flight point budget allow
  /// another read. The budget is ignored when no read is outstanding so a
  /// single oversized portion cannot stall the pipeline.
  pub fn can_add_reading_job(&self) -> bool {
    let Some(next) = self.pending_portions.front() else {
      return false;
    };
    if self.counters.active_readers >= self.max_readers {
      return false;
    }
    self.counters.active_readers == 0
      || self.counters.points_in_flight.max(0) as u64 + next.point_count
        <= self.max_points_in_progress
  }

  pub fn next_reading_job(&mut self) -> Option<FilePortion> {
    let portion = self.pending_portions.pop_front()?;
    self.counters.active_readers += 1;
    self.counters.points_in_flight += portion.point_count as i64;
    Some(portion)
  }

  /// A read finished. Sweeps the waiting nodes once reading is complete.
  pub fn on_read_done(&mut self) -> Result<(), ProtocolError> {
    if self.counters.active_readers == 0 {
      return Err(ProtocolError::Malformed("READ_DONE without an active read".into()));
    }
    self.counters.active_readers -= 1;
    if self.is_reading_finished() {
      self.sweep_waiting(|_| true);
    }
    Ok(())
  }

  // =========================================================================
  // Processing
  // =========================================================================

  pub fn add_task(&mut self, path: NodePath, task: Task) -> Result<(), ProtocolError> {
    if task.point_count == 0 {
      return Err(ProtocolError::EmptyTask(path));
    }
    debug_assert!(
      !self.pnts_to_writing.contains(&path),
      "cleared node {path} received a task"
    );
    let entry = self.node_to_process.entry(path).or_default();
    entry.point_count += task.point_count as u64;
    entry.tasks.push(task);
    Ok(())
  }

  /// Queued nodes not currently processing.
  pub fn has_node_work(&self) -> bool {
    self
      .node_to_process
      .keys()
      .any(|path| !self.processing_nodes.contains_key(path))
  }

  /// Pick the next PROCESS_JOBS batch: deepest paths first (ties by path),
  /// whole entries packed until `target` points are reached. A single node
  /// larger than `target` still goes alone.
  ///
  /// Picked entries move to the processing set and leave the waiting list.
  pub fn next_process_batch(&mut self, target: u64) -> Vec<(NodePath, QueuedNode)> {
    let mut candidates: Vec<(&NodePath, u64)> = self
      .node_to_process
      .iter()
      .filter(|(path, _)| !self.processing_nodes.contains_key(*path))
      .map(|(path, queued)| (path, queued.point_count))
      .collect();
    candidates.sort_unstable_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));

    let mut picked = Vec::new();
    let mut packed = 0u64;
    for (path, points) in candidates {
      if packed >= target {
        break;
      }
      packed += points;
      picked.push(path.clone());
    }

    let now = Instant::now();
    let mut batch = Vec::with_capacity(picked.len());
    for path in picked {
      let Some(queued) = self.node_to_process.remove(&path) else {
        continue;
      };
      self.processing_nodes.insert(
        path.clone(),
        InProgress {
          task_count: queued.tasks.len(),
          point_count: queued.point_count,
          started: now,
        },
      );
      self.waiting_writing_nodes.retain(|w| w != &path);
      batch.push((path, queued));
    }
    batch
  }

  /// A node finished processing. `finalized` is false when the node holds
  /// no point. Returns how long the node was processing.
  pub fn on_processed(
    &mut self,
    path: &NodePath,
    absorbed: i64,
    finalized: bool,
  ) -> Result<Duration, ProtocolError> {
    let Some(done) = self.processing_nodes.remove(path) else {
      return Err(ProtocolError::UnexpectedProcessed(path.clone()));
    };
    trace!(
      node = %path,
      tasks = done.task_count,
      points = done.point_count,
      absorbed,
      "node finished processing"
    );
    self.counters.points_in_flight -= absorbed;
    self.counters.points_processed += absorbed;

    if finalized {
      self.waiting_writing_nodes.push(path.clone());
    }
    if self.is_reading_finished() {
      if self.node_to_process.is_empty() && self.processing_nodes.is_empty() {
        self.pnts_to_writing.extend(self.waiting_writing_nodes.drain(..));
      } else {
        // Only nodes related to `path` can have been unblocked.
        self.sweep_waiting(|w| is_ancestor(w, path) || is_ancestor(path, w));
      }
    }
    Ok(done.started.elapsed())
  }

  /// Move every waiting node accepted by `candidate` and no longer blocked
  /// to the write queue, keeping order.
  fn sweep_waiting<F>(&mut self, candidate: F)
  where
    F: Fn(&NodePath) -> bool,
  {
    let mut still_waiting = Vec::with_capacity(self.waiting_writing_nodes.len());
    for node in self.waiting_writing_nodes.drain(..) {
      let clear = candidate(&node)
        && can_pnts_be_written(
          &node,
          &node,
          self.node_to_process.keys(),
          self.processing_nodes.keys(),
        );
      if clear {
        self.pnts_to_writing.push_back(node);
      } else {
        still_waiting.push(node);
      }
    }
    self.waiting_writing_nodes = still_waiting;
  }

  // =========================================================================
  // Writing
  // =========================================================================

  pub fn next_write(&mut self) -> Option<NodePath> {
    let path = self.pnts_to_writing.pop_front()?;
    debug_assert!(!is_blocked(
      &path,
      self.node_to_process.keys(),
      self.processing_nodes.keys()
    ));
    self.counters.active_writers += 1;
    Some(path)
  }

  pub fn has_pending_write(&self) -> bool {
    !self.pnts_to_writing.is_empty()
  }

  pub fn on_written(&mut self, points: u32, bytes: u32) -> Result<(), ProtocolError> {
    if self.counters.active_writers == 0 {
      return Err(ProtocolError::Malformed("PNTS_WRITTEN without an active write".into()));
    }
    self.counters.active_writers -= 1;
    self.counters.points_written += points as u64;
    self.counters.bytes_written += bytes as u64;
    self.counters.tiles_written += 1;
    Ok(())
  }

  // =========================================================================
  // Introspection
  // =========================================================================

  /// Nothing left anywhere in the pipeline.
  pub fn is_drained(&self) -> bool {
    self.is_reading_finished()
      && self.node_to_process.is_empty()
      && self.processing_nodes.is_empty()
      && self.waiting_writing_nodes.is_empty()
      && self.pnts_to_writing.is_empty()
      && self.counters.active_writers == 0
  }

  pub fn queued_len(&self) -> usize {
    self.node_to_process.len()
  }

  pub fn processing_len(&self) -> usize {
    self.processing_nodes.len()
  }

  pub fn waiting_len(&self) -> usize {
    self.waiting_writing_nodes.len()
  }

  pub fn is_waiting(&self, path: &NodePath) -> bool {
    self.waiting_writing_nodes.contains(path)
  }

  pub fn is_cleared(&self, path: &NodePath) -> bool {
    self.pnts_to_writing.contains(path)
  }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;
