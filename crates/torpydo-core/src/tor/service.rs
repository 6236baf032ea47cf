//! Hidden service registration through the control port.
//!
//! [`HiddenServiceControl`] is the seam the user aggregate talks to. The
//! production implementation opens one authenticated [`ControlSession`] per
//! call and drops it before returning.

use super::controller::{ControlSession, HiddenService, TorAuth};
use crate::error::{Error, Result};
use crate::logging::Redacted;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Options for control-port sessions.
#[derive(Clone)]
pub struct ControlOptions {
    /// How to authenticate.
    pub auth: TorAuth,
    /// Control password tried by [`TorAuth::Auto`] when Tor only accepts
    /// hashed passwords.
    pub password: Option<Zeroizing<String>>,
    /// Connect and per-read timeout.
    pub timeout: Duration,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            auth: TorAuth::Auto,
            password: None,
            timeout: Duration::from_secs(super::CONTROL_TIMEOUT_SECS),
        }
    }
}

impl std::fmt::Debug for ControlOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlOptions")
            .field("auth", &self.auth)
            .field("password", &self.password.as_ref().map(Redacted))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ControlOptions {
    /// Authenticate with the password whose hash is in the torrc.
    pub fn with_password(password: &str) -> Self {
        Self {
            auth: TorAuth::Password(Zeroizing::new(password.to_string())),
            ..Self::default()
        }
    }
}

/// Operations the user needs from a Tor controller.
pub trait HiddenServiceControl {
    /// Create or attach to the hidden service stored in `dir_name` under
    /// the daemon's data directory.
    fn create_hidden_service(
        &self,
        control_port: u16,
        dir_name: &str,
        remote_port: u16,
        local_port: u16,
    ) -> Result<HiddenService>;

    /// Remove a registered hidden service. With `clean`, delete its
    /// directory afterwards.
    fn remove_hidden_service(
        &self,
        control_port: u16,
        service: &HiddenService,
        clean: bool,
    ) -> Result<()>;

    /// Request new circuits (NEWNYM).
    fn new_identity(&self, control_port: u16) -> Result<()>;
}

/// Controller talking to a real Tor daemon over its control port.
#[derive(Debug, Clone, Default)]
pub struct PortController {
    options: ControlOptions,
}

impl PortController {
    /// Create a controller with the given session options.
    pub fn new(options: ControlOptions) -> Self {
        Self { options }
    }

    /// Open an authenticated session.
    pub fn session(&self, control_port: u16) -> Result<ControlSession> {
        let mut session = ControlSession::connect(control_port, self.options.timeout)?;
        match &self.options.auth {
            TorAuth::Auto => {
                let password = self.options.password.as_deref().map(String::as_str);
                session.authenticate_auto(password)?;
            }
            auth => session.authenticate(auth)?,
        }
        Ok(session)
    }
}

impl HiddenServiceControl for PortController {
    fn create_hidden_service(
        &self,
        control_port: u16,
        dir_name: &str,
        remote_port: u16,
        local_port: u16,
    ) -> Result<HiddenService> {
        let mut session = self.session(control_port)?;
        let data_dir = session
            .get_conf("DataDirectory")?
            .ok_or_else(|| Error::Tor("DataDirectory is not set".into()))?;
        let path = PathBuf::from(data_dir).join(dir_name);
        session.create_hidden_service(&path, remote_port, local_port)
    }

    fn remove_hidden_service(
        &self,
        control_port: u16,
        service: &HiddenService,
        clean: bool,
    ) -> Result<()> {
        let mut session = self.session(control_port)?;
        if !session.remove_hidden_service(&service.path)? {
            tracing::warn!(
                dir = %service.path.display(),
                "Tor had no such hidden service configured"
            );
        }
        drop(session);

        if clean {
            remove_dir_if_present(&service.path)?;
        }
        Ok(())
    }

    fn new_identity(&self, control_port: u16) -> Result<()> {
        let mut session = self.session(control_port)?;
        session.signal("NEWNYM")?;
        tracing::info!("Requested new tor circuits");
        Ok(())
    }
}

/// Delete a directory tree; a missing directory is not an error.
pub(crate) fn remove_dir_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
