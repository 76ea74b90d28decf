//! Audio streaming on top of the audio player pool.
//!
//! Borrows one controller per active stream and returns it on stop and on
//! every failure path; a borrowed controller that is never released would
//! leave its pool member permanently busy.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::mpv::{MpvController, MpvProcessPool};

#[derive(Error, Debug)]
pub enum AudioError {
  #[error("no available player process in the audio pool")]
  NoPlayerAvailable,
  #[error("failed to load stream: {0}")]
  LoadFailed(String),
}

struct AudioState {
  controller: Option<Arc<MpvController>>,
  current_stream: Option<String>,
  volume: i64,
}

/// Manages audio playback using the audio player pool.
pub struct AudioManager {
  pool: Arc<MpvProcessPool>,
  state: Mutex<AudioState>,
}

impl AudioManager {
  pub fn new(pool: Arc<MpvProcessPool>) -> Self {
    Self {
      pool,
      state: Mutex::new(AudioState {
        controller: None,
        current_stream: None,
        volume: 80,
      }),
    }
  }

  /// Start streaming `stream_url`, replacing any current stream.
  pub async fn start_stream(
    &self,
    stream_url: &str,
    volume: Option<i64>,
  ) -> Result<(), AudioError> {
    self.stop_stream().await;

    let mut state = self.state.lock().await;
    if let Some(volume) = volume {
      state.volume = volume.clamp(0, 100);
    }

    let controller = self
      .pool
      .get_available_controller()
      .await
      .ok_or(AudioError::NoPlayerAvailable)?;

    log::info!(
      "Starting audio stream on mpv process {}: {} (volume {})",
      controller.process_id(),
      stream_url,
      state.volume
    );

    let response = controller.loadfile(stream_url, "replace").await;
    if !response.is_success() {
      log::error!("Failed to load audio stream {}: {}", stream_url, response.error);
      self.pool.release_controller(&controller).await;
      return Err(AudioError::LoadFailed(response.error));
    }

    let response = controller.set_property("volume", state.volume).await;
    if !response.is_success() {
      log::warn!(
        "Failed to set volume on mpv process {}: {}",
        controller.process_id(),
        response.error
      );
    }

    self
      .pool
      .set_content(controller.process_id(), "audio", stream_url)
      .await;

    state.controller = Some(controller);
    state.current_stream = Some(stream_url.to_string());
    Ok(())
  }

  /// Stop the current stream and return its player to the pool.
  pub async fn stop_stream(&self) {
    let mut state = self.state.lock().await;
    let Some(controller) = state.controller.take() else {
      return;
    };
    state.current_stream = None;

    log::info!("Stopping audio stream on mpv process {}", controller.process_id());
    let response = controller.stop().await;
    if !response.is_success() {
      log::warn!("Stop command failed: {}", response.error);
    }
    self.pool.release_controller(&controller).await;
  }

  /// Adjust volume, applying it immediately when a stream is active.
  pub async fn set_volume(&self, volume: i64) {
    let mut state = self.state.lock().await;
    state.volume = volume.clamp(0, 100);
    if let Some(controller) = &state.controller {
      let response = controller.set_property("volume", state.volume).await;
      if !response.is_success() {
        log::warn!("Failed to set volume: {}", response.error);
      }
    }
  }

  /// URL of the active stream, if any.
  pub async fn current_stream(&self) -> Option<String> {
    self.state.lock().await.current_stream.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::testing::{test_pool_dir, MockLauncher};
  use crate::mpv::{MemberStatus, PoolSpec};
  use std::time::Duration;

  fn audio_pool(pool_name: &str, pool_size: u32) -> Arc<MpvProcessPool> {
    let launcher = Arc::new(MockLauncher::new());
    let spec = PoolSpec {
      pool_name: pool_name.to_string(),
      pool_size,
      player_args: Vec::new(),
      observed_properties: Vec::new(),
    };
    Arc::new(MpvProcessPool::with_launcher(
      spec,
      test_pool_dir(),
      Duration::from_millis(400),
      Box::new(launcher),
    ))
  }

  #[tokio::test]
  async fn stream_lifecycle_borrows_and_releases() {
    let pool = audio_pool("am-life", 1);
    pool.initialize().await.unwrap();
    let manager = AudioManager::new(pool.clone());

    manager.start_stream("http://radio.example/live", Some(70)).await.unwrap();
    assert_eq!(
      manager.current_stream().await.as_deref(),
      Some("http://radio.example/live")
    );
    let status = pool.get_process_status().await;
    assert_eq!(status[&1].status, Some(MemberStatus::Busy));
    assert_eq!(status[&1].content_type.as_deref(), Some("audio"));

    manager.stop_stream().await;
    assert!(manager.current_stream().await.is_none());
    let status = pool.get_process_status().await;
    assert_eq!(status[&1].status, Some(MemberStatus::Idle));
  }

  #[tokio::test]
  async fn replacing_a_stream_reuses_the_released_player() {
    let pool = audio_pool("am-replace", 1);
    pool.initialize().await.unwrap();
    let manager = AudioManager::new(pool.clone());

    manager.start_stream("http://radio.example/a", None).await.unwrap();
    manager.start_stream("http://radio.example/b", None).await.unwrap();
    assert_eq!(
      manager.current_stream().await.as_deref(),
      Some("http://radio.example/b")
    );
  }

  #[tokio::test]
  async fn exhausted_pool_is_reported() {
    let pool = audio_pool("am-full", 1);
    pool.initialize().await.unwrap();

    // Another caller holds the only member.
    let held = pool.get_available_controller().await.unwrap();

    let manager = AudioManager::new(pool.clone());
    let result = manager.start_stream("http://radio.example/live", None).await;
    assert!(matches!(result, Err(AudioError::NoPlayerAvailable)));

    pool.release_controller(&held).await;
  }
}
