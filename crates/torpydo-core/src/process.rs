//! Registry of Tor daemons spawned for one user.

use crate::error::{Error, Result};
use crate::tor::{ProcessHost, SystemHost, TorConfig, TorProcess, TOR_PROCESS_NAME};
use std::path::Path;
use std::time::Duration;

/// Tracks the Tor processes a user has started.
///
/// The registry exclusively owns its handles; they are never serialized.
pub struct ProcessRegistry {
    host: Box<dyn ProcessHost>,
    processes: Vec<Box<dyn TorProcess>>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new(Box::new(SystemHost))
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("pids", &self.pids())
            .finish()
    }
}

impl ProcessRegistry {
    /// Create an empty registry on top of `host`.
    pub fn new(host: Box<dyn ProcessHost>) -> Self {
        Self {
            host,
            processes: Vec::new(),
        }
    }

    /// Number of tracked processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Pids of the tracked processes, in start order.
    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().map(|p| p.pid()).collect()
    }

    /// Start a Tor daemon and track it.
    ///
    /// On a port conflict, `force` kills every Tor process on the host and
    /// retries once; without it the [`Error::Bind`] is returned.
    pub fn start(
        &mut self,
        config: &TorConfig,
        binary: &Path,
        timeout: Duration,
        force: bool,
    ) -> Result<u32> {
        let process = match self.host.spawn(config, binary, timeout) {
            Ok(process) => process,
            Err(Error::Bind(reason)) if force => {
                tracing::warn!(reason = %reason, "Port busy; killing tor host-wide and retrying");
                self.host.terminate_by_name(TOR_PROCESS_NAME)?;
                self.host.spawn(config, binary, timeout)?
            }
            Err(e) => return Err(e),
        };

        let pid = process.pid();
        self.processes.push(process);
        tracing::info!(pid, tracked = self.processes.len(), "Tracking tor process");
        Ok(pid)
    }

    /// Terminate every tracked process and clear the list.
    ///
    /// With `nuke`, also kill every Tor process on the host. All handles are
    /// attempted even if one fails; the first failure is returned.
    pub fn stop_all(&mut self, nuke: bool) -> Result<()> {
        let mut first_error = None;

        for mut process in self.processes.drain(..) {
            let pid = process.pid();
            if let Err(e) = process.terminate() {
                tracing::warn!(pid, error = %e, "Failed to terminate tor process");
                first_error.get_or_insert(e);
            }
        }

        if nuke {
            if let Err(e) = self.host.terminate_by_name(TOR_PROCESS_NAME) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Pids of every Tor process on the host, tracked or not.
    pub fn list_host(&self) -> Result<Vec<u32>> {
        self.host.list_by_name(TOR_PROCESS_NAME)
    }
}
