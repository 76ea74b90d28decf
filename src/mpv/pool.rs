//! Fixed-size pool of mpv processes with exclusive borrowing and recovery.
//!
//! Each member pairs a player process with its IPC controller. Callers borrow
//! a controller with [`MpvProcessPool::get_available_controller`], drive the
//! process exclusively, and hand it back with
//! [`MpvProcessPool::release_controller`]. Dead members are restarted in
//! place, by allocation when it trips over them and by the periodic health
//! check otherwise.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use super::controller::{MpvController, DEFAULT_CONNECT_TIMEOUT};
use super::ipc::IpcError;
use super::launch::PoolSpec;
use super::process::{wait_for_socket, ProcessError, ProcessHandle, ProcessLauncher, SystemLauncher};
use crate::config::PoolConfig;

/// Pause before re-scanning after a health check restarted members, so the
/// fresh processes stabilize.
const RETRY_SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Grace period for a player to exit on its own during cleanup.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PoolError {
  #[error("failed to create socket directory {path}: {source}")]
  SocketDir {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("player process {process_id} failed to launch: {source}")]
  Launch {
    process_id: u32,
    #[source]
    source: ProcessError,
  },
  #[error("player process {process_id} never created its IPC socket at {path}")]
  SocketTimeout { process_id: u32, path: String },
  #[error("failed to connect to player process {process_id}: {source}")]
  Connect {
    process_id: u32,
    #[source]
    source: IpcError,
  },
}

/// Allocation state of one pool member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
  Idle,
  Busy,
}

/// One slot: a running process, its controller and allocation bookkeeping.
struct PoolMember {
  process: Box<dyn ProcessHandle>,
  controller: Arc<MpvController>,
  status: MemberStatus,
  content_type: Option<String>,
  label: Option<String>,
}

/// Per-slot snapshot for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MemberReport {
  pub running: bool,
  pub connected: bool,
  pub status: Option<MemberStatus>,
  pub content_type: Option<String>,
  pub label: Option<String>,
}

/// Outcome of one health-check sweep.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  /// Unix timestamp of the sweep.
  pub checked_at: u64,
  pub total_processes: u32,
  pub healthy: u32,
  pub restarted: u32,
  pub failed: u32,
  /// Per-member outcome strings.
  pub processes: BTreeMap<u32, String>,
}

impl HealthReport {
  fn new(total_processes: u32) -> Self {
    let checked_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    Self {
      checked_at,
      total_processes,
      healthy: 0,
      restarted: 0,
      failed: 0,
      processes: BTreeMap::new(),
    }
  }
}

/// Pool of mpv processes sharing one launch configuration.
pub struct MpvProcessPool {
  spec: PoolSpec,
  socket_dir: PathBuf,
  socket_wait: Duration,
  launcher: Box<dyn ProcessLauncher>,
  members: Mutex<HashMap<u32, PoolMember>>,
  suspended: AtomicBool,
}

impl MpvProcessPool {
  /// Build a pool that spawns real player processes.
  pub fn new(spec: PoolSpec, config: &PoolConfig) -> Self {
    Self::with_launcher(
      spec,
      config.socket_dir.clone(),
      Duration::from_secs(config.socket_wait_timeout_secs),
      Box::new(SystemLauncher::new(config.player_path.clone())),
    )
  }

  /// Build a pool with a custom launcher (dependency injection seam).
  pub fn with_launcher(
    spec: PoolSpec,
    socket_dir: PathBuf,
    socket_wait: Duration,
    launcher: Box<dyn ProcessLauncher>,
  ) -> Self {
    Self {
      spec,
      socket_dir,
      socket_wait,
      launcher,
      members: Mutex::new(HashMap::new()),
      suspended: AtomicBool::new(false),
    }
  }

  pub fn pool_name(&self) -> &str {
    &self.spec.pool_name
  }

  pub fn pool_size(&self) -> u32 {
    self.spec.pool_size
  }

  /// Mark the pool suspended: allocation and health checks skip it until
  /// resumed (used while an external consumer owns the display device).
  pub fn suspend(&self) {
    self.suspended.store(true, Ordering::SeqCst);
    log::info!("{} pool suspended", self.spec.pool_name);
  }

  pub fn resume(&self) {
    self.suspended.store(false, Ordering::SeqCst);
    log::info!("{} pool resumed", self.spec.pool_name);
  }

  pub fn is_suspended(&self) -> bool {
    self.suspended.load(Ordering::SeqCst)
  }

  /// Whether any members are populated.
  pub async fn is_initialized(&self) -> bool {
    !self.members.lock().await.is_empty()
  }

  fn socket_path(&self, process_id: u32) -> PathBuf {
    self
      .socket_dir
      .join(format!("{}-pool-{}", self.spec.pool_name, process_id))
  }

  /// Start every member. All-or-nothing: if any member fails to come up,
  /// everything already started is torn down and the error is returned.
  pub async fn initialize(&self) -> Result<(), PoolError> {
    log::info!(
      "Starting {} pool initialization ({} processes)...",
      self.spec.pool_name,
      self.spec.pool_size
    );

    std::fs::create_dir_all(&self.socket_dir).map_err(|source| PoolError::SocketDir {
      path: self.socket_dir.display().to_string(),
      source,
    })?;

    let mut members = self.members.lock().await;
    for process_id in 1..=self.spec.pool_size {
      if let Err(e) = self.start_process(&mut members, process_id).await {
        log::error!(
          "Failed to start {} process {}: {}",
          self.spec.pool_name,
          process_id,
          e
        );
        self.teardown(&mut members).await;
        return Err(e);
      }
    }

    log::info!(
      "{} pool initialized with {} processes",
      self.spec.pool_name,
      self.spec.pool_size
    );
    Ok(())
  }

  /// Launch one member and register it. Nothing is registered on failure.
  async fn start_process(
    &self,
    members: &mut HashMap<u32, PoolMember>,
    process_id: u32,
  ) -> Result<(), PoolError> {
    let socket_path = self.socket_path(process_id);
    if socket_path.exists() {
      let _ = std::fs::remove_file(&socket_path);
    }

    let mut process = self
      .launcher
      .launch(&self.spec, process_id, &socket_path)
      .map_err(|source| PoolError::Launch { process_id, source })?;

    if !wait_for_socket(&socket_path, self.socket_wait).await {
      process.shutdown(Duration::ZERO).await;
      return Err(PoolError::SocketTimeout {
        process_id,
        path: socket_path.display().to_string(),
      });
    }

    let controller = Arc::new(MpvController::new(socket_path, process_id));
    if let Err(source) = controller.connect(DEFAULT_CONNECT_TIMEOUT).await {
      process.shutdown(Duration::ZERO).await;
      return Err(PoolError::Connect { process_id, source });
    }

    members.insert(
      process_id,
      PoolMember {
        process,
        controller: controller.clone(),
        status: MemberStatus::Idle,
        content_type: None,
        label: None,
      },
    );

    for name in &self.spec.observed_properties {
      let response = controller.observe_property(name).await;
      if !response.is_success() {
        log::warn!(
          "mpv {}: failed to observe property {}: {}",
          process_id,
          name,
          response.error
        );
      }
    }

    log::info!("MPV process {} started and connected", process_id);
    Ok(())
  }

  /// Replace a dead member: the old controller object is discarded outright,
  /// never reconnected, since a half-dead socket must not be reused.
  async fn restart_process(
    &self,
    members: &mut HashMap<u32, PoolMember>,
    process_id: u32,
  ) -> Result<(), PoolError> {
    if let Some(mut member) = members.remove(&process_id) {
      member.controller.disconnect();
      member.process.shutdown(Duration::ZERO).await;
    }

    let socket_path = self.socket_path(process_id);
    if socket_path.exists() {
      let _ = std::fs::remove_file(&socket_path);
    }

    self.start_process(members, process_id).await
  }

  /// Borrow an idle member's controller, restarting a dead idle member in
  /// place if allocation trips over one. When every member is busy, one
  /// health-check pass runs and allocation retries once if it repaired
  /// anything. Returns `None` only when no member can be made available.
  pub async fn get_available_controller(&self) -> Option<Arc<MpvController>> {
    if self.is_suspended() {
      log::info!("{} pool suspended - refusing allocation", self.spec.pool_name);
      return None;
    }
    if !self.is_initialized().await {
      log::warn!("{} pool not initialized", self.spec.pool_name);
      return None;
    }

    if let Some(controller) = self.try_acquire().await {
      return Some(controller);
    }

    log::warn!(
      "No available controllers in {} pool, running health check and retrying...",
      self.spec.pool_name
    );
    let report = self.health_check().await;
    if report.restarted > 0 {
      log::info!(
        "Health check restarted {} processes, retrying allocation...",
        report.restarted
      );
      tokio::time::sleep(RETRY_SETTLE_DELAY).await;
      if let Some(controller) = self.try_acquire().await {
        return Some(controller);
      }
    }

    let members = self.members.lock().await;
    let busy = members.values().filter(|m| m.status == MemberStatus::Busy).count();
    log::error!(
      "No controllers available in {} pool ({} busy, {} idle)",
      self.spec.pool_name,
      busy,
      members.len() - busy
    );
    None
  }

  /// Single allocation scan. The idle check, the liveness cross-check and
  /// the busy flip happen under the member-table lock with no await between
  /// them, so two concurrent callers can never win the same member.
  async fn try_acquire(&self) -> Option<Arc<MpvController>> {
    let mut members = self.members.lock().await;

    let mut ids: Vec<u32> = members.keys().copied().collect();
    ids.sort_unstable();

    for process_id in ids {
      let alive = match members.get_mut(&process_id) {
        Some(member) if member.status == MemberStatus::Idle => member.process.is_running(),
        _ => continue,
      };

      if !alive {
        // Status bookkeeping lagged behind reality (e.g. external kill).
        log::warn!("MPV process {} is dead, restarting before handout", process_id);
        if let Err(e) = self.restart_process(&mut members, process_id).await {
          log::error!(
            "Failed to restart {} process {}: {}",
            self.spec.pool_name,
            process_id,
            e
          );
          continue;
        }
      }

      if let Some(member) = members.get_mut(&process_id) {
        member.status = MemberStatus::Busy;
        member.controller.set_in_use(true);
        return Some(member.controller.clone());
      }
    }

    None
  }

  /// Return a borrowed controller, flipping its member back to idle. The only
  /// path back to idle; callers must release on their error paths too.
  /// Releasing an already-idle or superseded controller is a no-op.
  pub async fn release_controller(&self, controller: &Arc<MpvController>) {
    controller.set_in_use(false);

    let mut members = self.members.lock().await;
    if let Some(member) = members.get_mut(&controller.process_id()) {
      // A restarted member owns a new controller; a stale handle must not
      // flip the slot under its new holder.
      if Arc::ptr_eq(&member.controller, controller) {
        member.status = MemberStatus::Idle;
        member.content_type = None;
        member.label = None;
        log::info!(
          "Released MPV controller {} back to {} pool",
          controller.process_id(),
          self.spec.pool_name
        );
      }
    }
  }

  /// Record what a busy member is playing, for status reporting only.
  pub async fn set_content(&self, process_id: u32, content_type: &str, label: &str) {
    let mut members = self.members.lock().await;
    if let Some(member) = members.get_mut(&process_id) {
      member.content_type = Some(content_type.to_string());
      member.label = Some(label.to_string());
    }
  }

  /// Controller for a specific member, regardless of allocation state.
  pub async fn get_controller(&self, process_id: u32) -> Option<Arc<MpvController>> {
    self
      .members
      .lock()
      .await
      .get(&process_id)
      .map(|member| member.controller.clone())
  }

  /// Snapshot of every configured slot, populated or not.
  pub async fn get_process_status(&self) -> BTreeMap<u32, MemberReport> {
    let mut members = self.members.lock().await;
    let mut status = BTreeMap::new();
    for process_id in 1..=self.spec.pool_size {
      let report = match members.get_mut(&process_id) {
        Some(member) => MemberReport {
          running: member.process.is_running(),
          connected: member.controller.is_connected(),
          status: Some(member.status),
          content_type: member.content_type.clone(),
          label: member.label.clone(),
        },
        None => MemberReport {
          running: false,
          connected: false,
          status: None,
          content_type: None,
          label: None,
        },
      };
      status.insert(process_id, report);
    }
    status
  }

  /// Sweep every configured slot and repair what it can: dead or missing
  /// processes are restarted, live processes with a dropped connection get a
  /// reconnect first and a restart only if that fails. Busy members with a
  /// live process are left alone. One bad member never aborts the sweep.
  pub async fn health_check(&self) -> HealthReport {
    let mut members = self.members.lock().await;
    let mut report = HealthReport::new(self.spec.pool_size);

    for process_id in 1..=self.spec.pool_size {
      let alive = members
        .get_mut(&process_id)
        .map(|member| member.process.is_running())
        .unwrap_or(false);

      if !alive {
        log::warn!("MPV process {} is dead, attempting restart...", process_id);
        match self.restart_process(&mut members, process_id).await {
          Ok(()) => {
            report.restarted += 1;
            report.processes.insert(process_id, "restarted".to_string());
            log::info!("Successfully restarted MPV process {}", process_id);
          }
          Err(e) => {
            report.failed += 1;
            report
              .processes
              .insert(process_id, format!("restart_failed: {}", e));
            log::error!("Failed to restart MPV process {}: {}", process_id, e);
          }
        }
        continue;
      }

      let connected = members
        .get(&process_id)
        .map(|member| member.controller.is_connected())
        .unwrap_or(false);

      if connected {
        report.healthy += 1;
        report.processes.insert(process_id, "healthy".to_string());
        continue;
      }

      log::warn!(
        "MPV controller {} disconnected, attempting reconnect...",
        process_id
      );
      let reconnected = match members.get(&process_id) {
        Some(member) => member
          .controller
          .connect(DEFAULT_CONNECT_TIMEOUT)
          .await
          .is_ok(),
        None => false,
      };

      if reconnected {
        report.healthy += 1;
        report.processes.insert(process_id, "reconnected".to_string());
        log::info!("Reconnected to MPV process {}", process_id);
      } else {
        log::warn!("Reconnect failed for process {}, restarting...", process_id);
        match self.restart_process(&mut members, process_id).await {
          Ok(()) => {
            report.restarted += 1;
            report
              .processes
              .insert(process_id, "restarted_after_reconnect_fail".to_string());
          }
          Err(e) => {
            report.failed += 1;
            report
              .processes
              .insert(process_id, format!("restart_failed_after_reconnect_fail: {}", e));
          }
        }
      }
    }

    if report.restarted > 0 || report.failed > 0 {
      log::info!(
        "{} pool health check: {} healthy, {} restarted, {} failed",
        self.spec.pool_name,
        report.healthy,
        report.restarted,
        report.failed
      );
    }

    report
  }

  /// Quit, kill and forget every member. Each step is best-effort so one
  /// stuck process cannot block cleanup of the rest.
  pub async fn cleanup(&self) {
    let mut members = self.members.lock().await;
    self.teardown(&mut members).await;
  }

  async fn teardown(&self, members: &mut HashMap<u32, PoolMember>) {
    for (process_id, member) in members.iter_mut() {
      let response = member.controller.quit().await;
      if !response.is_success() {
        log::debug!("mpv {}: quit returned {}", process_id, response.error);
      }
      member.controller.disconnect();
    }

    for member in members.values_mut() {
      member.process.shutdown(SHUTDOWN_GRACE).await;
    }

    for process_id in 1..=self.spec.pool_size {
      let socket_path = self.socket_path(process_id);
      if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
      }
    }

    members.clear();
    log::info!("{} pool cleaned up", self.spec.pool_name);
  }
}
