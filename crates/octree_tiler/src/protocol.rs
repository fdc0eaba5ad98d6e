//! Dispatcher/worker wire protocol.
//!
//! Every message is a list of byte frames. Commands (dispatcher → worker)
//! start with the submission timestamp and a kind byte; responses
//! (worker → dispatcher) start with a kind byte. Integers are big-endian.
//!
//! ```text
//! command:  [ts_us u64][kind u8][payload frames...]
//!   READ_FILE     file, start, end, first_ordinal, first_line, point_count,
//!                 color_scale (empty = none), transform
//!   PROCESS_JOBS  per node: path, buffer, task_count u32, then per task: points, count u32
//!   WRITE_PNTS    path, buffer
//!   SHUTDOWN
//!
//! response: [kind u8][payload frames...]
//!   IDLE | HALTED | READ_DONE
//!   PROCESSED     path, buffer (empty = not finalized), absorbed i64
//!   PNTS_WRITTEN  points u32, bytes u32
//!   NEW_TASK      path, points, count u32
//!   FAILED        message
//! ```

use std::io::{self, Cursor};
use std::path::PathBuf;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use glam::{DMat3, DVec3};
use smallvec::{smallvec, SmallVec};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;
use crate::octree::NodePath;
use crate::reader::FilePortion;
use crate::transform::PointTransform;

/// One message: a short list of byte frames.
pub type Frames = SmallVec<[Vec<u8>; 4]>;

// =========================================================================
// Kinds
// =========================================================================

pub const READ_FILE: u8 = 1;
pub const PROCESS_JOBS: u8 = 2;
pub const WRITE_PNTS: u8 = 3;
pub const SHUTDOWN: u8 = 4;

pub const IDLE: u8 = 1;
pub const HALTED: u8 = 2;
pub const READ_DONE: u8 = 3;
pub const PROCESSED: u8 = 4;
pub const PNTS_WRITTEN: u8 = 5;
pub const NEW_TASK: u8 = 6;
pub const FAILED: u8 = 7;

// =========================================================================
// Messages
// =========================================================================

/// Serialized batch of points destined for one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
  pub points: Vec<u8>,
  pub point_count: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadJob {
  pub portion: FilePortion,
  pub transform: PointTransform,
}

/// One node of a PROCESS_JOBS message.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessJob {
  pub path: NodePath,
  /// Current node buffer; empty for a node seen for the first time.
  pub buffer: Vec<u8>,
  pub tasks: Vec<Task>,
}

impl ProcessJob {
  pub fn point_count(&self) -> u64 {
    self.tasks.iter().map(|t| t.point_count as u64).sum()
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WriteJob {
  pub path: NodePath,
  pub buffer: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
  ReadFile(ReadJob),
  ProcessJobs(Vec<ProcessJob>),
  WritePnts(WriteJob),
  Shutdown,
}

/// Outcome of processing one node.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedNode {
  pub path: NodePath,
  /// Updated node buffer. Empty when the node holds no point.
  pub buffer: Vec<u8>,
  /// Signed change of the node's held point count.
  pub absorbed: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
  Idle,
  Halted,
  ReadDone,
  Processed(ProcessedNode),
  PntsWritten { points: u32, bytes: u32 },
  NewTask { path: NodePath, task: Task },
  Failed(String),
}

/// Microseconds since the UNIX epoch.
pub fn now_us() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_micros() as u64)
    .unwrap_or(0)
}

// =========================================================================
// Encoding
// =========================================================================

impl Command {
  pub fn kind(&self) -> u8 {
    match self {
      Command::ReadFile(_) => READ_FILE,
      Command::ProcessJobs(_) => PROCESS_JOBS,
      Command::WritePnts(_) => WRITE_PNTS,
      Command::Shutdown => SHUTDOWN,
    }
  }

  /// Encode with the given submission timestamp.
  pub fn encode(&self, sent_at_us: u64) -> Frames {
    let mut frames: Frames = smallvec![be_u64(sent_at_us), vec![self.kind()]];
    match self {
      Command::ReadFile(job) => {
        let p = &job.portion;
        frames.push(p.path.as_os_str().as_encoded_bytes().to_vec());
        for v in [p.start, p.end, p.first_ordinal, p.first_line, p.point_count] {
          frames.push(be_u64(v));
        }
        frames.push(p.color_scale.map_or_else(Vec::new, be_f64));
        frames.push(encode_transform(&job.transform));
      }
      Command::ProcessJobs(jobs) => {
        for job in jobs {
          frames.push(job.path.to_wire());
          frames.push(job.buffer.clone());
          frames.push(be_u32(job.tasks.len() as u32));
          for task in &job.tasks {
            frames.push(task.points.clone());
            frames.push(be_u32(task.point_count));
          }
        }
      }
      Command::WritePnts(job) => {
        frames.push(job.path.to_wire());
        frames.push(job.buffer.clone());
      }
      Command::Shutdown => {}
    }
    frames
  }

  /// Decode a command message, returning its timestamp too.
  pub fn decode(frames: &[Vec<u8>]) -> Result<(u64, Command), ProtocolError> {
    let mut r = FrameReader::new(frames);
    let sent_at = r.u64("timestamp")?;
    let kind = r.u8("command kind")?;
    let command = match kind {
      READ_FILE => {
        let file = std::str::from_utf8(r.frame("file name")?)
          .map_err(|_| ProtocolError::Malformed("file name is not UTF-8".into()))?;
        let portion = FilePortion {
          path: PathBuf::from(file),
          start: r.u64("start")?,
          end: r.u64("end")?,
          first_ordinal: r.u64("first ordinal")?,
          first_line: r.u64("first line")?,
          point_count: r.u64("point count")?,
          color_scale: r.optional_f64("color scale")?,
        };
        let transform = decode_transform(r.frame("transform")?)?;
        Command::ReadFile(ReadJob { portion, transform })
      }
      PROCESS_JOBS => {
        let mut jobs = Vec::new();
        while !r.is_done() {
          let path = NodePath::from_wire(r.frame("node path")?)?;
          let buffer = r.frame("node buffer")?.to_vec();
          let task_count = r.u32("task count")?;
          let mut tasks = Vec::with_capacity(task_count as usize);
          for _ in 0..task_count {
            let points = r.frame("task points")?.to_vec();
            let point_count = r.u32("task point count")?;
            tasks.push(Task {
              points,
              point_count,
            });
          }
          jobs.push(ProcessJob {
            path,
            buffer,
            tasks,
          });
        }
        Command::ProcessJobs(jobs)
      }
      WRITE_PNTS => Command::WritePnts(WriteJob {
        path: NodePath::from_wire(r.frame("node path")?)?,
        buffer: r.frame("node buffer")?.to_vec(),
      }),
      SHUTDOWN => Command::Shutdown,
      other => return Err(ProtocolError::UnknownCommand(other)),
    };
    r.finish()?;
    Ok((sent_at, command))
  }
}

impl Response {
  pub fn kind(&self) -> u8 {
    match self {
      Response::Idle => IDLE,
      Response::Halted => HALTED,
      Response::ReadDone => READ_DONE,
      Response::Processed(_) => PROCESSED,
      Response::PntsWritten { .. } => PNTS_WRITTEN,
      Response::NewTask { .. } => NEW_TASK,
      Response::Failed(_) => FAILED,
    }
  }

  pub fn encode(&self) -> Frames {
    let mut frames: Frames = smallvec![vec![self.kind()]];
    match self {
      Response::Idle | Response::Halted | Response::ReadDone => {}
      Response::Processed(node) => {
        frames.push(node.path.to_wire());
        frames.push(node.buffer.clone());
        frames.push(be_i64(node.absorbed));
      }
      Response::PntsWritten { points, bytes } => {
        frames.push(be_u32(*points));
        frames.push(be_u32(*bytes));
      }
      Response::NewTask { path, task } => {
        frames.push(path.to_wire());
        frames.push(task.points.clone());
        frames.push(be_u32(task.point_count));
      }
      Response::Failed(message) => frames.push(message.as_bytes().to_vec()),
    }
    frames
  }

  pub fn decode(frames: &[Vec<u8>]) -> Result<Response, ProtocolError> {
    let mut r = FrameReader::new(frames);
    let kind = r.u8("response kind")?;
    let response = match kind {
      IDLE => Response::Idle,
      HALTED => Response::Halted,
      READ_DONE => Response::ReadDone,
      PROCESSED => Response::Processed(ProcessedNode {
        path: NodePath::from_wire(r.frame("node path")?)?,
        buffer: r.frame("node buffer")?.to_vec(),
        absorbed: r.i64("absorbed")?,
      }),
      PNTS_WRITTEN => Response::PntsWritten {
        points: r.u32("written points")?,
        bytes: r.u32("written bytes")?,
      },
      NEW_TASK => Response::NewTask {
        path: NodePath::from_wire(r.frame("node path")?)?,
        task: Task {
          points: r.frame("task points")?.to_vec(),
          point_count: r.u32("task point count")?,
        },
      },
      FAILED => Response::Failed(String::from_utf8_lossy(r.frame("failure message")?).into_owned()),
      other => return Err(ProtocolError::UnknownResponse(other)),
    };
    r.finish()?;
    Ok(response)
  }
}

// =========================================================================
// Frame helpers
// =========================================================================

struct FrameReader<'a> {
  frames: &'a [Vec<u8>],
  next: usize,
}

impl<'a> FrameReader<'a> {
  fn new(frames: &'a [Vec<u8>]) -> Self {
    Self { frames, next: 0 }
  }

  fn is_done(&self) -> bool {
    self.next >= self.frames.len()
  }

  fn frame(&mut self, what: &str) -> Result<&'a [u8], ProtocolError> {
    let frame = self
      .frames
      .get(self.next)
      .ok_or_else(|| ProtocolError::Malformed(format!("missing {what} frame")))?;
    self.next += 1;
    Ok(frame)
  }

  /// Next frame, which must be exactly `len` bytes long.
  fn sized(&mut self, what: &str, len: usize) -> Result<&'a [u8], ProtocolError> {
    let frame = self.frame(what)?;
    if frame.len() != len {
      return Err(ProtocolError::Malformed(format!(
        "{what} frame is {} bytes, expected {len}",
        frame.len()
      )));
    }
    Ok(frame)
  }

  fn u8(&mut self, what: &str) -> Result<u8, ProtocolError> {
    Ok(self.sized(what, 1)?[0])
  }

  fn u32(&mut self, what: &str) -> Result<u32, ProtocolError> {
    Ok(BigEndian::read_u32(self.sized(what, 4)?))
  }

  fn u64(&mut self, what: &str) -> Result<u64, ProtocolError> {
    Ok(BigEndian::read_u64(self.sized(what, 8)?))
  }

  fn i64(&mut self, what: &str) -> Result<i64, ProtocolError> {
    Ok(BigEndian::read_i64(self.sized(what, 8)?))
  }

  /// An f64 frame, or an empty frame for none.
  fn optional_f64(&mut self, what: &str) -> Result<Option<f64>, ProtocolError> {
    let frame = self.frame(what)?;
    match frame.len() {
      0 => Ok(None),
      8 => Ok(Some(BigEndian::read_f64(frame))),
      n => Err(ProtocolError::Malformed(format!(
        "{what} frame is {n} bytes, expected 0 or 8"
      ))),
    }
  }

  fn finish(&self) -> Result<(), ProtocolError> {
    if self.is_done() {
      Ok(())
    } else {
      Err(ProtocolError::Malformed(format!(
        "{} trailing frame(s)",
        self.frames.len() - self.next
      )))
    }
  }
}

fn be_u32(v: u32) -> Vec<u8> {
  let mut buf = vec![0; 4];
  BigEndian::write_u32(&mut buf, v);
  buf
}

fn be_u64(v: u64) -> Vec<u8> {
  let mut buf = vec![0; 8];
  BigEndian::write_u64(&mut buf, v);
  buf
}

fn be_i64(v: i64) -> Vec<u8> {
  let mut buf = vec![0; 8];
  BigEndian::write_i64(&mut buf, v);
  buf
}

fn be_f64(v: f64) -> Vec<u8> {
  let mut buf = vec![0; 8];
  BigEndian::write_f64(&mut buf, v);
  buf
}

// Transform frame:
// offset xyz, scale, rotation flag [9 column-major values], color flag [scale]

fn encode_transform(t: &PointTransform) -> Vec<u8> {
  let mut out = Vec::with_capacity(8 * 14 + 2);
  for v in t.offset.to_array() {
    out.extend(be_f64(v));
  }
  out.extend(be_f64(t.scale));
  match t.rotation {
    Some(m) => {
      out.push(1);
      for v in m.to_cols_array() {
        out.extend(be_f64(v));
      }
    }
    None => out.push(0),
  }
  match t.color_scale {
    Some(c) => {
      out.push(1);
      out.extend(be_f64(c));
    }
    None => out.push(0),
  }
  out
}

fn truncated(_: io::Error) -> ProtocolError {
  ProtocolError::Malformed("transform frame truncated".into())
}

fn read_f64(c: &mut Cursor<&[u8]>) -> Result<f64, ProtocolError> {
  c.read_f64::<BigEndian>().map_err(truncated)
}

fn read_flag(c: &mut Cursor<&[u8]>) -> Result<bool, ProtocolError> {
  match c.read_u8().map_err(truncated)? {
    0 => Ok(false),
    1 => Ok(true),
    other => Err(ProtocolError::Malformed(format!("invalid flag byte {other}"))),
  }
}

fn decode_transform(bytes: &[u8]) -> Result<PointTransform, ProtocolError> {
  let mut c = Cursor::new(bytes);
  let offset = DVec3::new(read_f64(&mut c)?, read_f64(&mut c)?, read_f64(&mut c)?);
  let scale = read_f64(&mut c)?;
  let rotation = if read_flag(&mut c)? {
    let mut cols = [0.0; 9];
    for v in &mut cols {
      *v = read_f64(&mut c)?;
    }
    Some(DMat3::from_cols_array(&cols))
  } else {
    None
  };
  let color_scale = if read_flag(&mut c)? {
    Some(read_f64(&mut c)?)
  } else {
    None
  };
  if c.position() != bytes.len() as u64 {
    return Err(ProtocolError::Malformed("transform frame has trailing bytes".into()));
  }
  Ok(PointTransform {
    offset,
    scale,
    rotation,
    color_scale,
  })
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod protocol_test;
