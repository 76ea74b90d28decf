//! MPV process pools with JSON IPC control for a Raspberry Pi HDMI display
//! controller. Audio and video playback run in fixed-size pools of player
//! processes; callers borrow a controller, drive it exclusively, and release
//! it, while a background monitor restarts anything that died.

mod audio;
mod config;
mod mpv;

pub use audio::{AudioError, AudioManager};
pub use config::PoolConfig;
pub use mpv::{
  find_player, response_codes, HealthMonitor, HealthReport, IpcError, MemberReport, MemberStatus,
  MpvController, MpvEvent, MpvMessage, MpvProcessPool, MpvRequest, MpvResponse, PoolError,
  PoolSpec, ProcessError, ProcessHandle, ProcessLauncher, SystemLauncher,
};
