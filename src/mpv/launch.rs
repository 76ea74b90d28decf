//! Pool specializations: launch configuration for audio and video players.
//!
//! The audio and video pools share every bit of allocation, health-check and
//! IPC behavior; they differ only in the command line handed to the launcher
//! and in their default size.

use crate::config::PoolConfig;

/// Launch configuration for one pool.
#[derive(Debug, Clone)]
pub struct PoolSpec {
  /// Pool name, used for logging and to namespace socket paths.
  pub pool_name: String,
  /// Fixed number of player processes.
  pub pool_size: u32,
  /// Player arguments; the launcher appends the IPC-server flag.
  pub player_args: Vec<String>,
  /// Properties every member observes right after (re)start, so callers
  /// don't each have to register them.
  pub observed_properties: Vec<String>,
}

impl PoolSpec {
  /// Audio-only playback through the system mixer, no video output. Sized
  /// for overlapping short-lived borrows (metadata refresh next to playback).
  pub fn audio(config: &PoolConfig) -> Self {
    Self {
      pool_name: "audio-mpv".to_string(),
      pool_size: config.audio_pool_size,
      player_args: vec![
        "--vo=null".to_string(),
        format!("--audio-device={}", config.audio_device),
        "--quiet".to_string(),
        "--no-input-default-bindings".to_string(),
        "--no-osc".to_string(),
        "--idle=yes".to_string(),
        "--no-terminal".to_string(),
        "--really-quiet".to_string(),
      ],
      observed_properties: config.observed_properties.clone(),
    }
  }

  /// Video playback straight to the DRM display with hardware decode. The
  /// display is a singular resource, hence the size-1 default.
  pub fn video(config: &PoolConfig) -> Self {
    Self {
      pool_name: "video-mpv".to_string(),
      pool_size: config.video_pool_size,
      player_args: vec![
        "--vo=drm".to_string(),
        format!("--drm-device={}", config.drm_device),
        format!("--drm-connector={}", config.drm_connector),
        format!("--audio-device={}", config.audio_device),
        format!("--hwdec={}", config.hwdec),
        "--quiet".to_string(),
        "--no-input-default-bindings".to_string(),
        "--no-osc".to_string(),
        "--idle=yes".to_string(),
        "--no-terminal".to_string(),
        "--really-quiet".to_string(),
      ],
      observed_properties: config.observed_properties.clone(),
    }
  }
}
