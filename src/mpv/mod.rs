//! MPV pool module - spawns and supervises pools of external MPV players
//! controlled via JSON IPC.
//!
//! Architecture:
//! - `protocol.rs` - JSON command/response/event types and serialization
//! - `ipc.rs` - Async IPC connection over Unix sockets
//! - `controller.rs` - Per-process controller with request correlation and retry
//! - `process.rs` - Player process spawning and liveness
//! - `launch.rs` - Audio/video pool specializations
//! - `pool.rs` - Fixed-size process pool with allocate/release and recovery
//! - `monitor.rs` - Background health monitor

mod controller;
mod ipc;
mod launch;
mod monitor;
mod pool;
mod process;
mod protocol;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::MpvController;
pub use ipc::IpcError;
pub use launch::PoolSpec;
pub use monitor::HealthMonitor;
pub use pool::{HealthReport, MemberReport, MemberStatus, MpvProcessPool, PoolError};
pub use process::{find_player, ProcessError, ProcessHandle, ProcessLauncher, SystemLauncher};
pub use protocol::{response_codes, MpvEvent, MpvMessage, MpvRequest, MpvResponse};
