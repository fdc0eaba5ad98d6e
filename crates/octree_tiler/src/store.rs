//! NodeStore - memory-budgeted, disk-backed cache of node buffers.
//!
//! Holds the serialized buffer of every node that is accumulating points.
//! When resident bytes exceed the budget, the least recently touched
//! buffers are written to one spill file each under the working directory
//! and transparently reloaded on the next access.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::StoreError;
use crate::octree::NodePath;

const SPILL_SUFFIX: &str = ".node";

struct Resident {
  buffer: Vec<u8>,
  touched: u64,
}

/// Path-keyed buffer cache with least-recently-touched eviction.
pub struct NodeStore {
  dir: PathBuf,
  resident: HashMap<NodePath, Resident>,
  spilled: HashSet<NodePath>,
  resident_bytes: usize,
  /// Monotonic access counter used as the recency stamp.
  clock: u64,
  evictions: u64,
}

impl NodeStore {
  /// Store spilling into `dir`. The directory is created on first eviction.
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      resident: HashMap::new(),
      spilled: HashSet::new(),
      resident_bytes: 0,
      clock: 0,
      evictions: 0,
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn tick(&mut self) -> u64 {
    self.clock += 1;
    self.clock
  }

  fn spill_path(&self, path: &NodePath) -> PathBuf {
    self.dir.join(path.relative_file(SPILL_SUFFIX))
  }

  /// Insert or replace the buffer of `path`.
  pub fn put(&mut self, path: NodePath, buffer: Vec<u8>) -> Result<(), StoreError> {
    if self.spilled.remove(&path) {
      self.delete_spill(&path)?;
    }
    let touched = self.tick();
    self.resident_bytes += buffer.len();
    if let Some(old) = self.resident.insert(path, Resident { buffer, touched }) {
      self.resident_bytes -= old.buffer.len();
    }
    Ok(())
  }

  /// Copy of the buffer of `path`, reloading it from disk when spilled.
  pub fn get(&mut self, path: &NodePath) -> Result<Vec<u8>, StoreError> {
    if self.spilled.contains(path) {
      let buffer = self.take(path)?;
      self.put(path.clone(), buffer.clone())?;
      return Ok(buffer);
    }
    let touched = self.tick();
    match self.resident.get_mut(path) {
      Some(entry) => {
        entry.touched = touched;
        Ok(entry.buffer.clone())
      }
      None => Err(StoreError::Missing(path.clone())),
    }
  }

  /// Remove and return the buffer of `path`.
  pub fn take(&mut self, path: &NodePath) -> Result<Vec<u8>, StoreError> {
    if let Some(entry) = self.resident.remove(path) {
      self.resident_bytes -= entry.buffer.len();
      return Ok(entry.buffer);
    }
    if self.spilled.remove(path) {
      let file = self.spill_path(path);
      let buffer = fs::read(&file).map_err(|source| StoreError::Spill {
        path: file.clone(),
        source,
      })?;
      self.delete_spill(path)?;
      trace!(node = %path, bytes = buffer.len(), "reloaded spilled node");
      return Ok(buffer);
    }
    Err(StoreError::Missing(path.clone()))
  }

  /// Drop the buffer of `path`.
  pub fn remove(&mut self, path: &NodePath) -> Result<(), StoreError> {
    if let Some(entry) = self.resident.remove(path) {
      self.resident_bytes -= entry.buffer.len();
      return Ok(());
    }
    if self.spilled.remove(path) {
      return self.delete_spill(path);
    }
    Err(StoreError::Missing(path.clone()))
  }

  pub fn contains(&self, path: &NodePath) -> bool {
    self.resident.contains_key(path) || self.spilled.contains(path)
  }

  /// Bytes held in memory.
  pub fn resident_bytes(&self) -> usize {
    self.resident_bytes
  }

  /// Number of stored nodes, resident or spilled.
  pub fn len(&self) -> usize {
    self.resident.len() + self.spilled.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn spilled_len(&self) -> usize {
    self.spilled.len()
  }

  /// Total evictions since creation.
  pub fn evictions(&self) -> u64 {
    self.evictions
  }

  /// Evict least recently touched buffers until resident bytes fit the
  /// budget. Returns the number of evicted nodes.
  pub fn control_memory_usage(&mut self, budget_bytes: usize) -> Result<usize, StoreError> {
    if self.resident_bytes <= budget_bytes {
      return Ok(0);
    }

    let mut by_age: Vec<(u64, NodePath)> = self
      .resident
      .iter()
      .map(|(path, entry)| (entry.touched, path.clone()))
      .collect();
    by_age.sort_unstable();

    let mut evicted = 0;
    for (_, path) in by_age {
      if self.resident_bytes <= budget_bytes {
        break;
      }
      let Some(entry) = self.resident.remove(&path) else {
        continue;
      };
      let file = self.spill_path(&path);
      write_spill(&file, &entry.buffer).map_err(|source| StoreError::Spill {
        path: file.clone(),
        source,
      })?;
      self.resident_bytes -= entry.buffer.len();
      self.spilled.insert(path);
      evicted += 1;
    }

    self.evictions += evicted as u64;
    debug!(
      evicted,
      resident_bytes = self.resident_bytes,
      budget_bytes,
      "node store evicted to disk"
    );
    Ok(evicted)
  }

  fn delete_spill(&self, path: &NodePath) -> Result<(), StoreError> {
    let file = self.spill_path(path);
    match fs::remove_file(&file) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Spill { path: file, source }),
    }
  }
}

fn write_spill(file: &Path, buffer: &[u8]) -> io::Result<()> {
  if let Some(parent) = file.parent() {
    fs::create_dir_all(parent)?;
  }
  fs::write(file, buffer)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
