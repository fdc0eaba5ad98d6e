//! In-process router/dealer message bus over crossbeam channels.
//!
//! The router addresses each worker through its own command channel; all
//! workers share one response channel and tag every message with their id.
//! Only dealers hold response senders, so the router observes a disconnect
//! once every worker has exited.

use crossbeam_channel::{self as channel, Receiver, RecvError, Sender, TryRecvError};

use crate::error::ProtocolError;
use crate::protocol::Frames;

pub type WorkerId = usize;

/// Dispatcher side of the bus.
pub struct Router {
  commands: Vec<Sender<Frames>>,
  responses: Receiver<(WorkerId, Frames)>,
}

/// Worker side of the bus.
pub struct Dealer {
  id: WorkerId,
  commands: Receiver<Frames>,
  responses: Sender<(WorkerId, Frames)>,
}

/// Build a router connected to `workers` dealers.
pub fn router(workers: usize) -> (Router, Vec<Dealer>) {
  let (response_tx, response_rx) = channel::unbounded();
  let mut commands = Vec::with_capacity(workers);
  let mut dealers = Vec::with_capacity(workers);
  for id in 0..workers {
    let (tx, rx) = channel::unbounded();
    commands.push(tx);
    dealers.push(Dealer {
      id,
      commands: rx,
      responses: response_tx.clone(),
    });
  }
  drop(response_tx);
  (
    Router {
      commands,
      responses: response_rx,
    },
    dealers,
  )
}

impl Router {
  pub fn send(&self, worker: WorkerId, frames: Frames) -> Result<(), ProtocolError> {
    let tx = self
      .commands
      .get(worker)
      .ok_or(ProtocolError::UnknownWorker(worker))?;
    tx.send(frames).map_err(|_| ProtocolError::Disconnected)
  }

  /// Block until a worker responds.
  pub fn recv(&self) -> Result<(WorkerId, Frames), ProtocolError> {
    self
      .responses
      .recv()
      .map_err(|RecvError| ProtocolError::Disconnected)
  }

  /// Next pending response, if any.
  pub fn try_recv(&self) -> Result<Option<(WorkerId, Frames)>, ProtocolError> {
    match self.responses.try_recv() {
      Ok(message) => Ok(Some(message)),
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Disconnected) => Err(ProtocolError::Disconnected),
    }
  }

  /// Drop every command channel; workers exit on their next receive.
  pub fn close(&mut self) {
    self.commands.clear();
  }

  pub fn worker_count(&self) -> usize {
    self.commands.len()
  }
}

impl Dealer {
  pub fn id(&self) -> WorkerId {
    self.id
  }

  /// Next command, None once the router closed the channel.
  pub fn recv(&self) -> Option<Frames> {
    self.commands.recv().ok()
  }

  pub fn send(&self, frames: Frames) -> Result<(), ProtocolError> {
    self
      .responses
      .send((self.id, frames))
      .map_err(|_| ProtocolError::Disconnected)
  }
}
