//! Background health monitor for the player pools.
//!
//! One loop for the lifetime of the host process: every interval it sweeps
//! each pool, reinitializes pools that collapsed to zero members, and runs
//! the per-member health check otherwise. Suspended pools are skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::pool::MpvProcessPool;

pub struct HealthMonitor {
  pools: Vec<Arc<MpvProcessPool>>,
  interval: Duration,
  cancel_token: CancellationToken,
}

impl HealthMonitor {
  pub fn new(pools: Vec<Arc<MpvProcessPool>>, interval: Duration) -> Self {
    Self {
      pools,
      interval,
      cancel_token: CancellationToken::new(),
    }
  }

  /// Request a clean stop of the monitor loop.
  pub fn shutdown(&self) {
    self.cancel_token.cancel();
  }

  /// Run until cancelled. A failing pass is logged and the loop carries on.
  pub async fn run(&self) {
    log::info!(
      "MPV pool health monitor started (monitoring {} pools)",
      self.pools.len()
    );

    loop {
      tokio::select! {
        _ = self.cancel_token.cancelled() => {
          log::info!("MPV pool health monitor stopped");
          break;
        }
        _ = tokio::time::sleep(self.interval) => {}
      }

      for pool in &self.pools {
        Self::check_pool(pool).await;
      }
    }
  }

  async fn check_pool(pool: &MpvProcessPool) {
    if pool.is_suspended() {
      log::info!("{} pool suspended - skipping health check", pool.pool_name());
      return;
    }

    // A pool with zero members has nothing a member sweep could repair; it
    // needs a full initialization.
    if pool.pool_size() > 0 && !pool.is_initialized().await {
      log::error!(
        "{} pool has no members, attempting to reinitialize...",
        pool.pool_name()
      );
      match pool.initialize().await {
        Ok(()) => log::info!(
          "{} pool reinitialized with {} processes",
          pool.pool_name(),
          pool.pool_size()
        ),
        Err(e) => log::error!("Failed to reinitialize {} pool: {}", pool.pool_name(), e),
      }
      return;
    }

    let report = pool.health_check().await;
    // Quiet when everything is healthy.
    if report.restarted > 0 || report.failed > 0 {
      log::warn!(
        "{} pool health: {} healthy, {} restarted, {} failed",
        pool.pool_name(),
        report.healthy,
        report.restarted,
        report.failed
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::launch::PoolSpec;
  use crate::mpv::testing::{test_pool_dir, MockLauncher};

  fn monitored_pool(pool_name: &str, pool_size: u32) -> (Arc<MpvProcessPool>, Arc<MockLauncher>) {
    let launcher = Arc::new(MockLauncher::new());
    let spec = PoolSpec {
      pool_name: pool_name.to_string(),
      pool_size,
      player_args: Vec::new(),
      observed_properties: Vec::new(),
    };
    let pool = MpvProcessPool::with_launcher(
      spec,
      test_pool_dir(),
      Duration::from_millis(400),
      Box::new(launcher.clone()),
    );
    (Arc::new(pool), launcher)
  }

  #[tokio::test]
  async fn reinitializes_collapsed_pool() {
    let (pool, launcher) = monitored_pool("mon-init", 2);
    assert!(!pool.is_initialized().await);

    HealthMonitor::check_pool(&pool).await;

    assert!(pool.is_initialized().await);
    assert_eq!(launcher.launch_count(), 2);
  }

  #[tokio::test]
  async fn skips_suspended_pool() {
    let (pool, launcher) = monitored_pool("mon-susp", 1);
    pool.initialize().await.unwrap();
    pool.suspend();
    launcher.kill(1);

    HealthMonitor::check_pool(&pool).await;

    // Nothing was restarted while suspended.
    assert_eq!(launcher.launch_count(), 1);
    assert!(!launcher.is_alive(1));
  }

  #[tokio::test]
  async fn repairs_dead_member_in_passing() {
    let (pool, launcher) = monitored_pool("mon-repair", 1);
    pool.initialize().await.unwrap();
    launcher.kill(1);

    HealthMonitor::check_pool(&pool).await;

    assert_eq!(launcher.launch_count(), 2);
    assert!(launcher.is_alive(1));
  }

  #[tokio::test]
  async fn run_stops_on_cancellation() {
    let (pool, _launcher) = monitored_pool("mon-stop", 1);
    pool.initialize().await.unwrap();

    let monitor = Arc::new(HealthMonitor::new(
      vec![pool.clone()],
      Duration::from_millis(50),
    ));
    let task = {
      let monitor = monitor.clone();
      tokio::spawn(async move { monitor.run().await })
    };

    // Let it take at least one pass, then stop it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.shutdown();
    tokio::time::timeout(Duration::from_secs(2), task)
      .await
      .expect("monitor did not stop on cancellation")
      .unwrap();
  }
}
