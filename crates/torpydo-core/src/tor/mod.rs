//! Tor integration.
//!
//! Torpydo drives an external Tor daemon: it writes the daemon's
//! configuration, spawns and kills the process, and manages hidden services
//! through the ControlPort. Tor itself is treated as a black box.
//!
//! Host-wide operations ([`ProcessHost::terminate_by_name`]) and the
//! daemon's hidden-service set are global to the machine, not scoped to one
//! user. Nothing here serializes concurrent callers racing on them.

mod config;
mod controller;
mod launch;
mod service;

pub use config::{
    default_data_directory, hash_password, prompt_control_password, TorConfig,
    STDOUT_NOTICE_LOG,
};
pub use controller::{ControlSession, HiddenService, ProtocolInfo, TorAuth};
pub use launch::{ChildProcess, LaunchOptions, ProcessHost, SystemHost, TorProcess, TOR_PROCESS_NAME};
pub use service::{ControlOptions, HiddenServiceControl, PortController};

/// Default SOCKS5 proxy port for Tor.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default control port for Tor.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Default time to wait for a spawned daemon to bootstrap (seconds).
pub const BOOTSTRAP_TIMEOUT_SECS: u64 = 90;

/// Default connect/read timeout on the control port (seconds).
pub const CONTROL_TIMEOUT_SECS: u64 = 30;
