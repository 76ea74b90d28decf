//! Pool and player configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the player pools and their supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
  /// Directory for IPC sockets.
  #[serde(default = "default_socket_dir")]
  pub socket_dir: PathBuf,

  /// ALSA/Pulse audio device passed to every player.
  #[serde(default = "default_audio_device")]
  pub audio_device: String,

  /// DRM render device for the video pool.
  #[serde(default = "default_drm_device")]
  pub drm_device: String,

  /// DRM connector driving the HDMI output.
  #[serde(default = "default_drm_connector")]
  pub drm_connector: String,

  /// Hardware decoder for the video pool.
  #[serde(default = "default_hwdec")]
  pub hwdec: String,

  /// Number of audio player processes.
  #[serde(default = "default_audio_pool_size")]
  pub audio_pool_size: u32,

  /// Number of video player processes.
  #[serde(default = "default_video_pool_size")]
  pub video_pool_size: u32,

  /// Seconds between health-monitor passes.
  #[serde(default = "default_health_check_interval")]
  pub health_check_interval_secs: u64,

  /// Seconds to wait for a freshly spawned player to create its IPC socket.
  #[serde(default = "default_socket_wait_timeout")]
  pub socket_wait_timeout_secs: u64,

  /// Custom player executable path (None = auto-detect).
  #[serde(default)]
  pub player_path: Option<PathBuf>,

  /// Properties every pool member observes on (re)start.
  #[serde(default = "default_observed_properties")]
  pub observed_properties: Vec<String>,
}

fn default_socket_dir() -> PathBuf {
  PathBuf::from("/tmp")
}

fn default_audio_device() -> String {
  std::env::var("AUDIO_DEVICE").unwrap_or_else(|_| "alsa/sysdefault:CARD=3".to_string())
}

fn default_drm_device() -> String {
  "/dev/dri/card0".to_string()
}

fn default_drm_connector() -> String {
  "HDMI-A-1".to_string()
}

fn default_hwdec() -> String {
  "v4l2m2m".to_string()
}

fn default_audio_pool_size() -> u32 {
  2
}

fn default_video_pool_size() -> u32 {
  1
}

fn default_health_check_interval() -> u64 {
  30
}

fn default_socket_wait_timeout() -> u64 {
  10
}

fn default_observed_properties() -> Vec<String> {
  ["time-pos", "duration", "volume", "pause", "speed"]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      socket_dir: default_socket_dir(),
      audio_device: default_audio_device(),
      drm_device: default_drm_device(),
      drm_connector: default_drm_connector(),
      hwdec: default_hwdec(),
      audio_pool_size: default_audio_pool_size(),
      video_pool_size: default_video_pool_size(),
      health_check_interval_secs: default_health_check_interval(),
      socket_wait_timeout_secs: default_socket_wait_timeout(),
      player_path: None,
      observed_properties: default_observed_properties(),
    }
  }
}

impl PoolConfig {
  /// Load configuration from a JSON file, or defaults when no path is given.
  pub fn load(path: Option<&str>) -> Result<Self, String> {
    let config = match path {
      Some(path) => {
        let contents =
          std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path, e))?;
        serde_json::from_str(&contents).map_err(|e| format!("cannot parse {}: {}", path, e))?
      }
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.audio_pool_size < 1 {
      return Err("Audio pool size must be at least 1".to_string());
    }
    if self.video_pool_size < 1 {
      return Err("Video pool size must be at least 1".to_string());
    }
    if self.health_check_interval_secs < 5 || self.health_check_interval_secs > 3600 {
      return Err("Health check interval must be between 5 and 3600 seconds".to_string());
    }
    if self.socket_wait_timeout_secs < 1 || self.socket_wait_timeout_secs > 60 {
      return Err("Socket wait timeout must be between 1 and 60 seconds".to_string());
    }
    if self.audio_device.trim().is_empty() {
      return Err("Audio device cannot be empty".to_string());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    assert!(PoolConfig::default().validate().is_ok());
  }

  #[test]
  fn rejects_zero_pool_size() {
    let config = PoolConfig {
      audio_pool_size: 0,
      ..PoolConfig::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn partial_json_fills_defaults() {
    let config: PoolConfig = serde_json::from_str(r#"{"audio_pool_size": 4}"#).unwrap();
    assert_eq!(config.audio_pool_size, 4);
    assert_eq!(config.video_pool_size, 1);
    assert_eq!(config.observed_properties.len(), 5);
  }
}
