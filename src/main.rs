//! Daemon entry point: bring up the audio and video pools, keep them healthy
//! until shutdown, then tear everything down.

use std::sync::Arc;
use std::time::Duration;

use canvas_mpv::{HealthMonitor, MpvProcessPool, PoolConfig, PoolSpec};

#[tokio::main]
async fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let config_path = std::env::args().nth(1);
  let config = match PoolConfig::load(config_path.as_deref()) {
    Ok(config) => config,
    Err(e) => {
      log::error!("Invalid configuration: {}", e);
      std::process::exit(1);
    }
  };

  let audio_pool = Arc::new(MpvProcessPool::new(PoolSpec::audio(&config), &config));
  let video_pool = Arc::new(MpvProcessPool::new(PoolSpec::video(&config), &config));

  if let Err(e) = audio_pool.initialize().await {
    log::error!("Audio pool initialization failed: {}", e);
    std::process::exit(1);
  }
  if let Err(e) = video_pool.initialize().await {
    log::error!("Video pool initialization failed: {}", e);
    audio_pool.cleanup().await;
    std::process::exit(1);
  }

  let monitor = Arc::new(HealthMonitor::new(
    vec![audio_pool.clone(), video_pool.clone()],
    Duration::from_secs(config.health_check_interval_secs),
  ));
  let monitor_task = {
    let monitor = monitor.clone();
    tokio::spawn(async move { monitor.run().await })
  };

  log::info!("canvas-mpv running; press ctrl-c to stop");
  if let Err(e) = tokio::signal::ctrl_c().await {
    log::error!("Failed to listen for shutdown signal: {}", e);
  }

  monitor.shutdown();
  let _ = monitor_task.await;

  audio_pool.cleanup().await;
  video_pool.cleanup().await;
}
