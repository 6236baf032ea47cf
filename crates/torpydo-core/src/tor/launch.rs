//! Spawning and killing Tor daemons.
//!
//! [`ProcessHost`] abstracts the operating system's process table so the
//! registry logic can be exercised without a Tor binary.

use super::config::TorConfig;
use crate::error::{Error, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Process name used for host-wide sweeps.
pub const TOR_PROCESS_NAME: &str = "tor";

/// Options for starting Tor.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Tor executable, looked up on `PATH` if relative.
    pub tor_binary: PathBuf,
    /// How long to wait for `Bootstrapped 100%`.
    pub bootstrap_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            tor_binary: PathBuf::from(TOR_PROCESS_NAME),
            bootstrap_timeout: Duration::from_secs(super::BOOTSTRAP_TIMEOUT_SECS),
        }
    }
}

/// A spawned Tor daemon.
pub trait TorProcess: Send {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Whether the process has not exited yet.
    fn is_alive(&mut self) -> bool;

    /// Kill the process if it is still alive. Calling this on an exited
    /// process does nothing.
    fn terminate(&mut self) -> Result<()>;
}

/// Access to the host's process table.
pub trait ProcessHost: Send {
    /// Spawn Tor with `config` and wait until it has bootstrapped.
    ///
    /// Fails with [`Error::Bind`] on a port conflict and [`Error::Launch`]
    /// for anything else.
    fn spawn(
        &self,
        config: &TorConfig,
        binary: &Path,
        timeout: Duration,
    ) -> Result<Box<dyn TorProcess>>;

    /// Pids of every process on the host with exactly this name.
    fn list_by_name(&self, name: &str) -> Result<Vec<u32>>;

    /// Kill every process on the host with exactly this name. Returns how
    /// many were found.
    fn terminate_by_name(&self, name: &str) -> Result<usize>;
}

/// [`ProcessHost`] backed by the real operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

/// Tor daemon started by [`SystemHost`].
pub struct ChildProcess {
    child: Child,
}

impl TorProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => {}
            // Exited between the check and the kill.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.child.wait()?;
        tracing::debug!(pid = self.child.id(), "Terminated tor process");
        Ok(())
    }
}

/// What a line of Tor's stdout means for startup.
#[derive(Debug, PartialEq, Eq)]
enum StartupLine {
    Bootstrapped,
    BindFailure,
    Fatal,
    Progress,
}

fn classify_line(line: &str) -> StartupLine {
    if line.contains("Bootstrapped 100%") {
        StartupLine::Bootstrapped
    } else if line.contains("Address already in use") || line.contains("Could not bind") {
        StartupLine::BindFailure
    } else if line.contains("[err]") {
        StartupLine::Fatal
    } else {
        StartupLine::Progress
    }
}

impl ProcessHost for SystemHost {
    fn spawn(
        &self,
        config: &TorConfig,
        binary: &Path,
        timeout: Duration,
    ) -> Result<Box<dyn TorProcess>> {
        let mut child = Command::new(binary)
            .args(["-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Launch(format!("cannot run {}: {}", binary.display(), e)))?;

        tracing::info!(pid = child.id(), binary = %binary.display(), "Spawned tor");

        // torrc is read from stdin; closing it ends the file.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(config.to_torrc().as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Launch(format!("failed to pass torrc: {}", e)));
            }
        }

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Launch("tor stdout unavailable".into()));
            }
        };

        // Keep draining stdout for the life of the process so tor never
        // blocks on a full pipe.
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let _ = tx.send(line);
            }
        });

        let deadline = Instant::now() + timeout;
        let failure = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(line) => {
                    tracing::trace!(line = %line, "tor");
                    match classify_line(&line) {
                        StartupLine::Bootstrapped => {
                            tracing::info!(pid = child.id(), "Tor bootstrapped");
                            return Ok(Box::new(ChildProcess { child }));
                        }
                        StartupLine::BindFailure => break Error::Bind(line),
                        StartupLine::Fatal => break Error::Launch(line),
                        StartupLine::Progress => {}
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    break Error::Launch(format!(
                        "no bootstrap within {}s",
                        timeout.as_secs()
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let status = child.wait()?;
                    break Error::Launch(format!("tor exited early with {}", status));
                }
            }
        };

        let _ = child.kill();
        let _ = child.wait();
        tracing::warn!(error = %failure, "Tor failed to start");
        Err(failure)
    }

    fn list_by_name(&self, name: &str) -> Result<Vec<u32>> {
        let output = Command::new("pgrep").args(["-x", name]).output()?;
        // pgrep exits 1 when nothing matched
        if !output.status.success() && output.status.code() != Some(1) {
            return Err(Error::Launch(format!("pgrep failed with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn terminate_by_name(&self, name: &str) -> Result<usize> {
        let found = self.list_by_name(name)?;
        if found.is_empty() {
            return Ok(0);
        }
        let status = Command::new("pkill").args(["-KILL", "-x", name]).status()?;
        if !status.success() && status.code() != Some(1) {
            return Err(Error::Launch(format!("pkill failed with {}", status)));
        }
        tracing::warn!(count = found.len(), name, "Killed processes host-wide");
        Ok(found.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("Jan 01 [notice] Bootstrapped 100% (done): Done"),
            StartupLine::Bootstrapped
        );
        assert_eq!(
            classify_line(
                "[warn] Could not bind to 127.0.0.1:9050: Address already in use. Is Tor already running?"
            ),
            StartupLine::BindFailure
        );
        assert_eq!(
            classify_line("[err] Reading config failed--see warnings above."),
            StartupLine::Fatal
        );
        assert_eq!(
            classify_line("[notice] Bootstrapped 45% (requesting_descriptors)"),
            StartupLine::Progress
        );
    }

    #[test]
    fn test_spawn_missing_binary() {
        let config = TorConfig::new(std::env::temp_dir().join("torpydo-missing"), 19050, 19051);
        let result = SystemHost.spawn(
            &config,
            Path::new("/nonexistent/bin/tor"),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::Launch(_))));
    }

    #[test]
    fn test_options_default() {
        let options = LaunchOptions::default();
        assert_eq!(options.tor_binary, PathBuf::from("tor"));
        assert_eq!(options.bootstrap_timeout, Duration::from_secs(90));
    }
}
