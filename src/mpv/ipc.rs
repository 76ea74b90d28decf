//! Async IPC connection to one mpv process over a Unix domain socket.
//!
//! A connection owns the write half of the stream plus a reader task that
//! demultiplexes incoming lines: responses resolve pending requests by
//! `request_id`, property-change events update the shared observed-property
//! map, and every event is forwarded on a channel for subscribers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::protocol::{MpvEvent, MpvMessage, MpvRequest, MpvResponse};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("connection failed: {0}")]
  ConnectionFailed(String),
  #[error("write failed: {0}")]
  Write(#[from] std::io::Error),
  #[error("command timed out")]
  Timeout,
  #[error("disconnected")]
  Disconnected,
}

/// Pending request waiting for its response.
type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<MpvResponse>>>>;

/// One live IPC connection. Discarded wholesale on disconnect; a reconnect
/// always builds a fresh instance so no stale socket state survives.
pub(crate) struct MpvIpc {
  writer: tokio::sync::Mutex<OwnedWriteHalf>,
  pending: PendingMap,
  event_rx: Receiver<MpvEvent>,
  alive: Arc<AtomicBool>,
  reader_handle: JoinHandle<()>,
}

impl MpvIpc {
  /// Connect to the mpv IPC socket and start the reader task.
  pub async fn connect(
    path: &Path,
    timeout: Duration,
    observed: Arc<Mutex<HashMap<String, Value>>>,
  ) -> Result<Self, IpcError> {
    let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
      .await
      .map_err(|_| IpcError::ConnectionFailed(format!("connect to {} timed out", path.display())))?
      .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

    let (read_half, write_half) = stream.into_split();

    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let alive = Arc::new(AtomicBool::new(true));
    // Bounded so an unconsumed event stream cannot grow without limit;
    // subscribers that fall behind lose events, the observed map does not.
    let (event_tx, event_rx) = async_channel::bounded(256);

    let reader_pending = pending.clone();
    let reader_alive = alive.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(read_half, reader_pending, observed, event_tx, reader_alive).await;
    });

    Ok(Self {
      writer: tokio::sync::Mutex::new(write_half),
      pending,
      event_rx,
      alive,
      reader_handle,
    })
  }

  /// Whether the reader task still considers the connection live.
  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Send one request and wait for the matching response.
  ///
  /// A timeout abandons the request but leaves the connection intact; a late
  /// response is dropped by the reader as unmatched.
  pub async fn send(&self, request: &MpvRequest, timeout: Duration) -> Result<MpvResponse, IpcError> {
    let (tx, rx) = oneshot::channel();
    self.pending.lock().insert(request.request_id, tx);

    let mut line = serde_json::to_string(request).map_err(|e| IpcError::Write(e.into()))?;
    line.push('\n');

    {
      let mut writer = self.writer.lock().await;
      if let Err(e) = writer.write_all(line.as_bytes()).await {
        self.pending.lock().remove(&request.request_id);
        return Err(IpcError::Write(e));
      }
      if let Err(e) = writer.flush().await {
        self.pending.lock().remove(&request.request_id);
        return Err(IpcError::Write(e));
      }
    }

    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(response)) => Ok(response),
      // Sender dropped: the connection died while we were waiting.
      Ok(Err(_)) => Err(IpcError::Disconnected),
      Err(_) => {
        self.pending.lock().remove(&request.request_id);
        Err(IpcError::Timeout)
      }
    }
  }

  /// Receiver for property changes and other unsolicited events.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  /// Tear the connection down. In-flight requests fail with `Disconnected`.
  pub fn close(&self) {
    self.reader_handle.abort();
    self.alive.store(false, Ordering::SeqCst);
    self.pending.lock().clear();
  }

  async fn reader_loop(
    read_half: tokio::net::unix::OwnedReadHalf,
    pending: PendingMap,
    observed: Arc<Mutex<HashMap<String, Value>>>,
    event_tx: Sender<MpvEvent>,
    alive: Arc<AtomicBool>,
  ) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
      line.clear();
      match reader.read_line(&mut line).await {
        Ok(0) => {
          log::info!("mpv IPC connection closed by peer");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }

          match MpvMessage::parse(trimmed) {
            Ok(MpvMessage::Response(response)) => {
              if let Some(tx) = pending.lock().remove(&response.request_id) {
                let _ = tx.send(response);
              } else {
                // Late response after a timeout; the caller moved on.
                log::debug!("mpv: dropping response for request_id={}", response.request_id);
              }
            }
            Ok(MpvMessage::Event(event)) => {
              Self::handle_property_event(&event, &observed);
              let _ = event_tx.try_send(event);
            }
            Err(e) => {
              // One corrupt line must not take down the read loop.
              log::debug!("mpv: dropping unparseable line: {} - {}", e, trimmed);
            }
          }
        }
        Err(e) => {
          log::warn!("mpv IPC read error: {}", e);
          break;
        }
      }
    }

    alive.store(false, Ordering::SeqCst);
    // Fail any waiters still registered; their receivers resolve immediately.
    pending.lock().clear();
  }

  /// Update the observed-property map. Events for properties nobody observed
  /// are dropped on purpose.
  fn handle_property_event(event: &MpvEvent, observed: &Mutex<HashMap<String, Value>>) {
    if event.event != "property-change" {
      return;
    }
    let Some(name) = event.name.as_deref() else {
      return;
    };
    let mut observed = observed.lock();
    if let Some(slot) = observed.get_mut(name) {
      *slot = event.data.clone().unwrap_or(Value::Null);
    }
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.reader_handle.abort();
  }
}
