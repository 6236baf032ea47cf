//! Configuration handed to a locally spawned Tor daemon.

use crate::error::{Error, Result};
use crate::logging::Redacted;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Log line Tor must emit on stdout so bootstrap progress can be followed.
pub const STDOUT_NOTICE_LOG: &str = "notice stdout";

/// Tor daemon configuration owned by a user.
///
/// Persisted with the user; rendered to a torrc when Tor is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorConfig {
    /// Tor `DataDirectory`.
    pub data_directory: PathBuf,
    /// Output of `tor --hash-password`, if password auth is used.
    pub hashed_control_password: Option<String>,
    /// Tor `SocksPort`.
    pub socks_port: u16,
    /// Tor `ControlPort`.
    pub control_port: u16,
    /// Tor `Log` lines, e.g. `notice file /var/log/tor.log`.
    pub log: Vec<String>,
    /// Any other torrc options.
    pub extra: BTreeMap<String, String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self::new(
            default_data_directory(),
            super::DEFAULT_SOCKS_PORT,
            super::DEFAULT_CONTROL_PORT,
        )
    }
}

impl TorConfig {
    /// Configuration without a control password (cookie or null auth).
    pub fn new(data_directory: impl Into<PathBuf>, socks_port: u16, control_port: u16) -> Self {
        Self {
            data_directory: data_directory.into(),
            hashed_control_password: None,
            socks_port,
            control_port,
            log: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Generate a configuration for a custom Tor process.
    ///
    /// Creates the data directory if it is missing and hashes `password`
    /// with the Tor binary.
    pub fn generate(
        data_directory: impl Into<PathBuf>,
        socks_port: u16,
        control_port: u16,
        password: &str,
        tor_binary: &Path,
    ) -> Result<Self> {
        let data_directory = data_directory.into();
        std::fs::create_dir_all(&data_directory)?;

        let mut config = Self::new(data_directory, socks_port, control_port);
        config.hashed_control_password = Some(hash_password(tor_binary, password)?);

        tracing::info!(
            data_directory = %config.data_directory.display(),
            socks_port,
            control_port,
            "Generated tor configuration"
        );
        Ok(config)
    }

    /// Ordered torrc options. Always includes a stdout notice log.
    pub fn options(&self) -> Vec<(String, String)> {
        let mut options = vec![
            (
                "DataDirectory".to_string(),
                self.data_directory.display().to_string(),
            ),
            ("SocksPort".to_string(), self.socks_port.to_string()),
            ("ControlPort".to_string(), self.control_port.to_string()),
        ];
        if let Some(hash) = &self.hashed_control_password {
            options.push(("HashedControlPassword".to_string(), hash.clone()));
        }

        let mut has_stdout = false;
        for line in &self.log {
            has_stdout |= line.to_ascii_lowercase().contains("stdout");
            options.push(("Log".to_string(), line.clone()));
        }
        if !has_stdout {
            options.push(("Log".to_string(), STDOUT_NOTICE_LOG.to_string()));
        }

        for (key, value) in &self.extra {
            options.push((key.clone(), value.clone()));
        }
        options
    }

    /// Render as torrc text.
    pub fn to_torrc(&self) -> String {
        self.options()
            .into_iter()
            .map(|(key, value)| format!("{} {}\n", key, value))
            .collect()
    }
}

/// `$HOME/.tordata`, or `.tordata` relative to the working directory.
pub fn default_data_directory() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".tordata")
}

/// Hash a control-port password with `tor --hash-password`.
pub fn hash_password(tor_binary: &Path, password: &str) -> Result<String> {
    tracing::debug!(password = %Redacted(password), "Hashing control password");

    let output = Command::new(tor_binary)
        .args(["--quiet", "--hash-password", password])
        .output()
        .map_err(|e| Error::Launch(format!("cannot run {}: {}", tor_binary.display(), e)))?;

    if !output.status.success() {
        return Err(Error::Launch(format!(
            "tor --hash-password exited with {}",
            output.status
        )));
    }

    parse_hashed_password(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| Error::Launch("tor --hash-password produced no hash".into()))
}

fn parse_hashed_password(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("16:"))
        .last()
        .map(String::from)
}

/// Read a control password from the terminal, optionally asking twice.
pub fn prompt_control_password(confirm: bool) -> Result<String> {
    let first = rpassword::prompt_password("Tor control password: ")?;
    if confirm {
        let second = rpassword::prompt_password("Please enter password again: ")?;
        if first != second {
            return Err(Error::PasswordMismatch);
        }
    }
    Ok(first)
}
