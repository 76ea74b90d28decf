//! In-process fakes for exercising controllers and pools without a real
//! player binary: a scripted IPC server on a real Unix socket, plus mock
//! process handles with externally controllable liveness.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::launch::PoolSpec;
use super::process::{ProcessError, ProcessHandle, ProcessLauncher};

static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique socket path under the system temp dir.
pub(crate) fn test_socket_path() -> PathBuf {
  std::env::temp_dir().join(format!(
    "canvas-mpv-test-{}-{}.sock",
    std::process::id(),
    TEST_COUNTER.fetch_add(1, Ordering::SeqCst)
  ))
}

/// Unique socket directory for pool tests.
pub(crate) fn test_pool_dir() -> PathBuf {
  let dir = std::env::temp_dir().join(format!(
    "canvas-mpv-pool-{}-{}",
    std::process::id(),
    TEST_COUNTER.fetch_add(1, Ordering::SeqCst)
  ));
  let _ = std::fs::create_dir_all(&dir);
  dir
}

/// Knobs controlling how the fake player answers.
pub(crate) struct FakeBehavior {
  silent: AtomicBool,
  garbage_before_response: AtomicBool,
  event_on_request: Mutex<Option<String>>,
  properties: Mutex<HashMap<String, Value>>,
}

impl FakeBehavior {
  fn new() -> Self {
    Self {
      silent: AtomicBool::new(false),
      garbage_before_response: AtomicBool::new(false),
      event_on_request: Mutex::new(None),
      properties: Mutex::new(HashMap::new()),
    }
  }

  /// Stop answering requests entirely (for timeout tests).
  pub fn set_silent(&self, silent: bool) {
    self.silent.store(silent, Ordering::SeqCst);
  }

  /// Emit one non-JSON line before every response.
  pub fn set_garbage_before_response(&self, garbage: bool) {
    self.garbage_before_response.store(garbage, Ordering::SeqCst);
  }

  /// Emit the given raw JSON line before every response.
  pub fn set_event_on_request(&self, event: &str) {
    *self.event_on_request.lock() = Some(event.to_string());
  }

  /// Answer `get_property` for `name` with `value`.
  pub fn set_property_data(&self, name: &str, value: Value) {
    self.properties.lock().insert(name.to_string(), value);
  }
}

/// Scripted mpv stand-in listening on a real Unix socket. Answers every
/// request with `success`, echoes the request id, and plays back the
/// configured property data and events.
pub(crate) struct FakePlayer {
  behavior: Arc<FakeBehavior>,
  accept_handle: JoinHandle<()>,
  conn_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakePlayer {
  /// Bind the socket (replacing any stale file) and start serving.
  pub fn bind(path: &Path) -> std::io::Result<Self> {
    if path.exists() {
      let _ = std::fs::remove_file(path);
    }
    let listener = UnixListener::bind(path)?;

    let behavior = Arc::new(FakeBehavior::new());
    let conn_handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let accept_behavior = behavior.clone();
    let accept_conns = conn_handles.clone();
    let accept_handle = tokio::spawn(async move {
      loop {
        match listener.accept().await {
          Ok((stream, _)) => {
            let behavior = accept_behavior.clone();
            let handle = tokio::spawn(serve_connection(stream, behavior));
            accept_conns.lock().push(handle);
          }
          Err(_) => break,
        }
      }
    });

    Ok(Self {
      behavior,
      accept_handle,
      conn_handles,
    })
  }

  pub fn behavior(&self) -> &FakeBehavior {
    &self.behavior
  }
}

impl Drop for FakePlayer {
  fn drop(&mut self) {
    self.accept_handle.abort();
    for handle in self.conn_handles.lock().drain(..) {
      handle.abort();
    }
  }
}

async fn serve_connection(stream: UnixStream, behavior: Arc<FakeBehavior>) {
  let (read_half, mut write_half) = stream.into_split();
  let mut reader = BufReader::new(read_half);
  let mut line = String::new();

  loop {
    line.clear();
    match reader.read_line(&mut line).await {
      Ok(0) | Err(_) => break,
      Ok(_) => {}
    }

    let request: Value = match serde_json::from_str(line.trim()) {
      Ok(v) => v,
      Err(_) => continue,
    };

    if behavior.silent.load(Ordering::SeqCst) {
      continue;
    }

    if behavior.garbage_before_response.load(Ordering::SeqCst)
      && write_half.write_all(b"### not json ###\n").await.is_err()
    {
      break;
    }

    let extra_event = behavior.event_on_request.lock().clone();
    if let Some(event) = extra_event {
      if write_half.write_all(format!("{}\n", event).as_bytes()).await.is_err() {
        break;
      }
    }

    let request_id = request.get("request_id").and_then(Value::as_i64).unwrap_or(0);
    let command = request.get("command").and_then(Value::as_array).cloned().unwrap_or_default();
    let verb = command.first().and_then(Value::as_str).unwrap_or("");

    let data = match verb {
      "get_property" => command
        .get(1)
        .and_then(Value::as_str)
        .and_then(|name| behavior.properties.lock().get(name).cloned()),
      _ => None,
    };

    let response = serde_json::json!({
      "request_id": request_id,
      "error": "success",
      "data": data,
    });
    if write_half.write_all(format!("{}\n", response).as_bytes()).await.is_err() {
      break;
    }

    // mpv pushes an initial property-change right after observe_property.
    if verb == "observe_property" {
      let observer_id = command.get(1).and_then(Value::as_i64).unwrap_or(0);
      if let Some(name) = command.get(2).and_then(Value::as_str) {
        let data = behavior.properties.lock().get(name).cloned().unwrap_or(Value::Null);
        let event = serde_json::json!({
          "event": "property-change",
          "id": observer_id,
          "name": name,
          "data": data,
        });
        if write_half.write_all(format!("{}\n", event).as_bytes()).await.is_err() {
          break;
        }
      }
    }
  }
}

/// Process handle whose liveness is a shared flag the test can flip.
struct MockProcess {
  alive: Arc<AtomicBool>,
  pid: u32,
}

impl ProcessHandle for MockProcess {
  fn is_running(&mut self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  fn pid(&self) -> Option<u32> {
    Some(self.pid)
  }

  fn shutdown(&mut self, _grace: Duration) -> BoxFuture<'_, ()> {
    let alive = self.alive.clone();
    async move {
      alive.store(false, Ordering::SeqCst);
    }
    .boxed()
  }
}

/// Launcher that brings up a [`FakePlayer`] per slot instead of spawning mpv.
pub(crate) struct MockLauncher {
  launches: AtomicUsize,
  no_socket: Mutex<HashSet<u32>>,
  alive_flags: Mutex<HashMap<u32, Arc<AtomicBool>>>,
  players: Mutex<HashMap<u32, FakePlayer>>,
}

impl MockLauncher {
  pub fn new() -> Self {
    Self {
      launches: AtomicUsize::new(0),
      no_socket: Mutex::new(HashSet::new()),
      alive_flags: Mutex::new(HashMap::new()),
      players: Mutex::new(HashMap::new()),
    }
  }

  /// Make this slot's player "launch" without ever creating its socket.
  pub fn set_no_socket(&self, process_id: u32) {
    self.no_socket.lock().insert(process_id);
  }

  /// Total number of launch attempts across all slots.
  pub fn launch_count(&self) -> usize {
    self.launches.load(Ordering::SeqCst)
  }

  /// Liveness of the most recent process for a slot.
  pub fn is_alive(&self, process_id: u32) -> bool {
    self
      .alive_flags
      .lock()
      .get(&process_id)
      .map(|flag| flag.load(Ordering::SeqCst))
      .unwrap_or(false)
  }

  /// Kill a slot's process behind the pool's back.
  pub fn kill(&self, process_id: u32) {
    if let Some(flag) = self.alive_flags.lock().get(&process_id) {
      flag.store(false, Ordering::SeqCst);
    }
  }
}

impl ProcessLauncher for MockLauncher {
  fn launch(
    &self,
    _spec: &PoolSpec,
    process_id: u32,
    socket_path: &Path,
  ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
    self.launches.fetch_add(1, Ordering::SeqCst);

    let alive = Arc::new(AtomicBool::new(true));
    self.alive_flags.lock().insert(process_id, alive.clone());

    if !self.no_socket.lock().contains(&process_id) {
      let player = FakePlayer::bind(socket_path)?;
      self.players.lock().insert(process_id, player);
    }

    Ok(Box::new(MockProcess {
      alive,
      pid: 9000 + process_id,
    }))
  }
}

impl ProcessLauncher for Arc<MockLauncher> {
  fn launch(
    &self,
    spec: &PoolSpec,
    process_id: u32,
    socket_path: &Path,
  ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
    (**self).launch(spec, process_id, socket_path)
  }
}
