//! Per-process mpv controller with request correlation and retry.
//!
//! One controller is bound to one pool member's socket for the lifetime of
//! one process incarnation; a restarted process always gets a brand-new
//! controller so no request ids or observed values leak across connections.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use parking_lot::Mutex;
use serde_json::Value;

use super::ipc::{IpcError, MpvIpc};
use super::protocol::{response_codes, MpvEvent, MpvRequest, MpvResponse};

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// IPC controller for a single mpv process.
///
/// Commands never return a raw error: failures surface as responses with a
/// non-`success` error code, so callers check the `error` field and nothing
/// else. `in_use` is bookkeeping owned by the pool, not by the controller.
pub struct MpvController {
  socket_path: PathBuf,
  process_id: u32,
  command_timeout: Duration,
  next_request_id: AtomicI64,
  ipc: Mutex<Option<Arc<MpvIpc>>>,
  observed: Arc<Mutex<HashMap<String, Value>>>,
  events: Mutex<Option<Receiver<MpvEvent>>>,
  in_use: AtomicBool,
}

impl MpvController {
  pub(crate) fn new(socket_path: PathBuf, process_id: u32) -> Self {
    Self {
      socket_path,
      process_id,
      command_timeout: DEFAULT_COMMAND_TIMEOUT,
      next_request_id: AtomicI64::new(1),
      ipc: Mutex::new(None),
      observed: Arc::new(Mutex::new(HashMap::new())),
      events: Mutex::new(None),
      in_use: AtomicBool::new(false),
    }
  }

  #[cfg(test)]
  pub(crate) fn with_command_timeout(mut self, timeout: Duration) -> Self {
    self.command_timeout = timeout;
    self
  }

  /// The pool slot this controller belongs to.
  pub fn process_id(&self) -> u32 {
    self.process_id
  }

  /// Connect to the mpv IPC socket, replacing any previous connection.
  pub async fn connect(&self, timeout: Duration) -> Result<(), IpcError> {
    self.disconnect();

    match MpvIpc::connect(&self.socket_path, timeout, self.observed.clone()).await {
      Ok(ipc) => {
        *self.events.lock() = Some(ipc.events());
        *self.ipc.lock() = Some(Arc::new(ipc));
        log::info!(
          "Connected to mpv process {} at {}",
          self.process_id,
          self.socket_path.display()
        );
        Ok(())
      }
      Err(e) => {
        log::error!("Failed to connect to mpv process {}: {}", self.process_id, e);
        Err(e)
      }
    }
  }

  /// Drop the connection. Idempotent; in-flight requests fail immediately.
  pub fn disconnect(&self) {
    if let Some(ipc) = self.ipc.lock().take() {
      ipc.close();
    }
  }

  /// Whether the controller currently holds a live connection.
  pub fn is_connected(&self) -> bool {
    self.ipc.lock().as_ref().map(|ipc| ipc.is_alive()).unwrap_or(false)
  }

  /// Whether a caller currently holds this controller exclusively.
  pub fn is_in_use(&self) -> bool {
    self.in_use.load(Ordering::SeqCst)
  }

  /// Allocation flag, flipped only by the owning pool.
  pub(crate) fn set_in_use(&self, in_use: bool) {
    self.in_use.store(in_use, Ordering::SeqCst);
  }

  /// Send a command to mpv and wait for the matching response.
  ///
  /// A response timeout (default 5s) yields `error: "timeout"` and leaves the
  /// connection usable. If the connection turns out to be broken at write
  /// time, the controller reconnects and resends exactly once before giving
  /// up, so retry amplification is bounded at one.
  pub async fn send_command(&self, command: Vec<Value>) -> MpvResponse {
    let request = MpvRequest {
      command,
      request_id: self.next_request_id.fetch_add(1, Ordering::SeqCst),
    };

    let Some(ipc) = self.current_ipc() else {
      return MpvResponse::local_failure(response_codes::NOT_CONNECTED);
    };

    if ipc.is_alive() {
      match ipc.send(&request, self.command_timeout).await {
        Ok(response) => return response,
        Err(IpcError::Write(e)) if is_retryable_kind(e.kind()) => {
          log::info!(
            "mpv {}: socket broken during write ({}), reconnecting",
            self.process_id,
            e
          );
        }
        Err(e) => return Self::failure_for(e),
      }
    } else {
      log::info!("mpv {}: connection lost, reconnecting to retry", self.process_id);
    }

    self.resend_after_reconnect(&request).await
  }

  /// The single silent reconnect-and-resend cycle.
  async fn resend_after_reconnect(&self, request: &MpvRequest) -> MpvResponse {
    if self.connect(DEFAULT_CONNECT_TIMEOUT).await.is_err() {
      log::error!("mpv {}: reconnect failed for {:?}", self.process_id, request.command);
      return MpvResponse::local_failure(response_codes::RECONNECTION_FAILED);
    }

    let Some(ipc) = self.current_ipc() else {
      return MpvResponse::local_failure(response_codes::NOT_CONNECTED);
    };

    match ipc.send(request, self.command_timeout).await {
      Ok(response) => {
        log::info!("mpv {}: command succeeded after reconnect", self.process_id);
        response
      }
      Err(e) => Self::failure_for(e),
    }
  }

  fn current_ipc(&self) -> Option<Arc<MpvIpc>> {
    self.ipc.lock().clone()
  }

  fn failure_for(error: IpcError) -> MpvResponse {
    match error {
      IpcError::Timeout => MpvResponse::local_failure(response_codes::TIMEOUT),
      IpcError::Disconnected => MpvResponse::local_failure(response_codes::DISCONNECTED),
      other => MpvResponse::local_failure(&other.to_string()),
    }
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> MpvResponse {
    self.send_command(vec!["get_property".into(), name.into()]).await
  }

  /// Set a property value.
  pub async fn set_property(&self, name: &str, value: impl Into<Value>) -> MpvResponse {
    self.send_command(vec!["set".into(), name.into(), value.into()]).await
  }

  /// Add to a numeric property.
  pub async fn add_property(&self, name: &str, delta: f64) -> MpvResponse {
    self.send_command(vec!["add".into(), name.into(), delta.into()]).await
  }

  /// Multiply a numeric property.
  pub async fn multiply_property(&self, name: &str, factor: f64) -> MpvResponse {
    self.send_command(vec!["multiply".into(), name.into(), factor.into()]).await
  }

  /// Cycle through property values ("up" or "down").
  pub async fn cycle_property(&self, name: &str, direction: &str) -> MpvResponse {
    self.send_command(vec!["cycle".into(), name.into(), direction.into()]).await
  }

  /// Start observing a property. Later property-change events update the
  /// observed map; events for unobserved properties are dropped.
  pub async fn observe_property(&self, name: &str) -> MpvResponse {
    // Register before sending: mpv pushes the initial property-change as
    // soon as the observe lands, possibly before the acknowledgment.
    let observer_id = {
      let mut observed = self.observed.lock();
      if !observed.contains_key(name) {
        observed.insert(name.to_string(), Value::Null);
      }
      observed.len() as i64
    };
    let response = self
      .send_command(vec!["observe_property".into(), observer_id.into(), name.into()])
      .await;
    if !response.is_success() {
      self.observed.lock().remove(name);
    }
    response
  }

  /// Last value seen for an observed property, if any event arrived yet.
  pub fn observed_value(&self, name: &str) -> Option<Value> {
    self.observed.lock().get(name).cloned()
  }

  /// Snapshot of all observed properties and their last-known values.
  pub fn observed_properties(&self) -> HashMap<String, Value> {
    self.observed.lock().clone()
  }

  /// Load a file or URL for playback ("replace", "append", ...).
  pub async fn loadfile(&self, target: &str, mode: &str) -> MpvResponse {
    self.send_command(vec!["loadfile".into(), target.into(), mode.into()]).await
  }

  /// Pause/unpause playback; `None` toggles.
  pub async fn pause(&self, state: Option<bool>) -> MpvResponse {
    match state {
      Some(paused) => self.set_property("pause", paused).await,
      None => self.cycle_property("pause", "up").await,
    }
  }

  /// Seek to a position ("relative" or "absolute").
  pub async fn seek(&self, position: f64, mode: &str) -> MpvResponse {
    self.send_command(vec!["seek".into(), position.into(), mode.into()]).await
  }

  /// Stop playback, leaving the process idle.
  pub async fn stop(&self) -> MpvResponse {
    self.send_command(vec!["stop".into()]).await
  }

  /// Ask mpv to quit.
  pub async fn quit(&self) -> MpvResponse {
    self.send_command(vec!["quit".into()]).await
  }

  /// Receiver for unsolicited events, if connected at least once.
  pub fn events(&self) -> Option<Receiver<MpvEvent>> {
    self.events.lock().clone()
  }
}

/// Broken-pipe class write failures that warrant the one reconnect attempt,
/// keyed on structured error codes rather than message text.
fn is_retryable_kind(kind: ErrorKind) -> bool {
  matches!(kind, ErrorKind::BrokenPipe | ErrorKind::ConnectionReset)
}
