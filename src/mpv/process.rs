//! Player process spawning and liveness.
//!
//! The pool never touches OS process APIs directly: it goes through
//! [`ProcessHandle`] and [`ProcessLauncher`] so liveness polling and spawning
//! can be faked in tests without a real mpv binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::launch::PoolSpec;

/// How long to poll for the IPC socket file after spawning.
pub(crate) const SOCKET_WAIT_POLL: Duration = Duration::from_millis(100);
/// Extra delay after the socket file appears, so mpv finishes bring-up.
pub(crate) const SOCKET_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("mpv executable not found")]
  NotFound,
  #[error("failed to spawn player: {0}")]
  Spawn(#[from] std::io::Error),
}

/// Minimal capability surface the pool needs from an OS process.
pub trait ProcessHandle: Send {
  /// Poll whether the process is still running.
  fn is_running(&mut self) -> bool;

  /// OS process id, if the process has not been reaped yet.
  fn pid(&self) -> Option<u32>;

  /// Wait up to `grace` for the process to exit, then force-kill it. A zero
  /// grace kills immediately.
  fn shutdown(&mut self, grace: Duration) -> BoxFuture<'_, ()>;
}

/// Spawns one player process for a pool slot, with the IPC socket path baked
/// into the launch command.
pub trait ProcessLauncher: Send + Sync {
  fn launch(
    &self,
    spec: &PoolSpec,
    process_id: u32,
    socket_path: &Path,
  ) -> Result<Box<dyn ProcessHandle>, ProcessError>;
}

/// A real mpv child process.
struct PlayerProcess {
  child: Child,
}

impl ProcessHandle for PlayerProcess {
  fn is_running(&mut self) -> bool {
    match self.child.try_wait() {
      Ok(None) => true,
      Ok(Some(status)) => {
        if let Some(code) = status.code() {
          log::warn!("mpv process exited with code {}", code);
        } else {
          log::warn!("mpv process terminated by signal");
        }
        false
      }
      Err(e) => {
        log::warn!("mpv liveness check failed: {}", e);
        false
      }
    }
  }

  fn pid(&self) -> Option<u32> {
    self.child.id()
  }

  fn shutdown(&mut self, grace: Duration) -> BoxFuture<'_, ()> {
    async move {
      if grace.is_zero() {
        if let Err(e) = self.child.kill().await {
          log::debug!("mpv kill failed: {}", e);
        }
        return;
      }
      match tokio::time::timeout(grace, self.child.wait()).await {
        Ok(Ok(status)) => log::debug!("mpv process exited with {}", status),
        Ok(Err(e)) => log::warn!("wait() failed for mpv process: {}", e),
        Err(_) => {
          log::warn!("mpv process did not exit within {:?}, killing", grace);
          if let Err(e) = self.child.kill().await {
            log::error!("mpv kill failed: {}", e);
          }
        }
      }
    }
    .boxed()
  }
}

/// Launcher that spawns the configured (or auto-detected) mpv binary.
pub struct SystemLauncher {
  player_path: Option<PathBuf>,
}

impl SystemLauncher {
  pub fn new(player_path: Option<PathBuf>) -> Self {
    Self { player_path }
  }
}

impl ProcessLauncher for SystemLauncher {
  fn launch(
    &self,
    spec: &PoolSpec,
    process_id: u32,
    socket_path: &Path,
  ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
    let player_exe = self
      .player_path
      .clone()
      .or_else(find_player)
      .ok_or(ProcessError::NotFound)?;

    log::info!(
      "Spawning {} player {} ({:?}) with IPC socket {}",
      spec.pool_name,
      process_id,
      player_exe,
      socket_path.display()
    );

    let mut cmd = Command::new(&player_exe);
    for arg in &spec.player_args {
      cmd.arg(arg);
    }
    cmd.arg(format!("--input-ipc-server={}", socket_path.display()));

    let child = cmd
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()?;

    Ok(Box::new(PlayerProcess { child }))
  }
}

/// Find the mpv executable in PATH or common locations.
pub fn find_player() -> Option<PathBuf> {
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv"];
  for path in common_paths {
    let p = PathBuf::from(path);
    if p.exists() {
      return Some(p);
    }
  }

  None
}

/// Poll for the IPC socket file the player creates on startup. Existence of
/// the file is the readiness signal; a short settle delay follows it.
pub(crate) async fn wait_for_socket(socket_path: &Path, timeout: Duration) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if socket_path.exists() {
      tokio::time::sleep(SOCKET_SETTLE_DELAY).await;
      return true;
    }
    tokio::time::sleep(SOCKET_WAIT_POLL).await;
  }
  false
}
