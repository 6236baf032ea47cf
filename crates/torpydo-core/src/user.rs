//! The user aggregate.
//!
//! A [`User`] owns a Tor configuration, the Tor daemons it started, the
//! hidden services it registered and its contact book. Its logical state can
//! be frozen into bytes (optionally encrypted) and restored later; live
//! process handles never cross that boundary.
//!
//! ## States
//!
//! - `Idle`: no tracked Tor process. Serialization allowed.
//! - `Running`: at least one tracked process. Serialization needs `force`,
//!   which first kills Tor (host-wide) and returns to `Idle`.
//!
//! Contacts and services can be changed in either state.

use crate::contacts::{ContactBook, ContactStatus};
use crate::crypto::{self, SealedBox};
use crate::error::{Error, Result};
use crate::process::ProcessRegistry;
use crate::services::ServiceDirectory;
use crate::tor::{
    ControlOptions, HiddenService, HiddenServiceControl, LaunchOptions, PortController,
    ProcessHost, SystemHost, TorConfig, DEFAULT_CONTROL_PORT, DEFAULT_SOCKS_PORT,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use zeroize::Zeroizing;

/// Current version of the persisted user schema.
pub const USER_SCHEMA_VERSION: u16 = 1;

/// Process-lifecycle state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// No tracked Tor process.
    Idle,
    /// One or more tracked Tor processes.
    Running,
}

/// Persisted logical state of a user.
///
/// Field order is the wire order; add fields only together with a version
/// bump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Schema version, [`USER_SCHEMA_VERSION`] when written by this crate.
    pub version: u16,
    /// Identity name.
    pub username: String,
    /// Contact username to public key.
    pub contacts: BTreeMap<String, Vec<u8>>,
    /// Tor daemon configuration.
    pub tor_config: TorConfig,
    /// Service name to registration handle.
    pub services: BTreeMap<String, HiddenService>,
}

impl UserRecord {
    /// Canonical byte encoding.
    pub fn encode(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(bincode::serialize(self)?))
    }

    /// Decode and check the schema version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record: Self = bincode::deserialize(bytes)?;
        if record.version != USER_SCHEMA_VERSION {
            return Err(Error::Encoding(format!(
                "unsupported user schema version {}",
                record.version
            )));
        }
        Ok(record)
    }
}

/// Name of the invoking operator's account.
pub fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "torpydo".to_string())
}

/// A local identity managing Tor, hidden services and contacts.
pub struct User {
    username: String,
    contacts: ContactBook,
    tor_config: TorConfig,
    processes: ProcessRegistry,
    services: ServiceDirectory,
    controller: Box<dyn HiddenServiceControl>,
    launch: LaunchOptions,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("contacts", &self.contacts.len())
            .field("tor_config", &self.tor_config)
            .field("processes", &self.processes)
            .field("services", &self.services)
            .finish()
    }
}

impl User {
    /// Create a user with the given Tor configuration.
    pub fn new(username: impl Into<String>, tor_config: TorConfig) -> Self {
        Self {
            username: username.into(),
            contacts: ContactBook::new(),
            tor_config,
            processes: ProcessRegistry::new(Box::new(SystemHost)),
            services: ServiceDirectory::new(),
            controller: Box::new(PortController::default()),
            launch: LaunchOptions::default(),
        }
    }

    /// Create a user named after the current account, with a freshly
    /// generated Tor configuration protected by `password`.
    ///
    /// The controller authenticates with the same password.
    pub fn generate(username: Option<&str>, password: &str) -> Result<Self> {
        let launch = LaunchOptions::default();
        let config = TorConfig::generate(
            crate::tor::default_data_directory(),
            DEFAULT_SOCKS_PORT,
            DEFAULT_CONTROL_PORT,
            password,
            &launch.tor_binary,
        )?;
        let username = username.map_or_else(default_username, String::from);
        Ok(Self::new(username, config)
            .with_launch_options(launch)
            .with_control_password(password))
    }

    /// Rebuild a user from persisted state. Nothing is running afterwards.
    pub fn from_record(record: UserRecord) -> Self {
        let mut user = Self::new(record.username, record.tor_config);
        user.contacts = ContactBook::from_map(record.contacts);
        user.services = ServiceDirectory::from_map(record.services);
        user
    }

    /// Snapshot of the logical state.
    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            version: USER_SCHEMA_VERSION,
            username: self.username.clone(),
            contacts: self.contacts.as_map().clone(),
            tor_config: self.tor_config.clone(),
            services: self.services.as_map().clone(),
        }
    }

    /// Use a different process host. Only meaningful before Tor is started.
    pub fn with_process_host(mut self, host: Box<dyn ProcessHost>) -> Self {
        self.processes = ProcessRegistry::new(host);
        self
    }

    /// Use a different hidden-service controller.
    pub fn with_controller(mut self, controller: Box<dyn HiddenServiceControl>) -> Self {
        self.controller = controller;
        self
    }

    /// Talk to Tor's control port with `password`, e.g. after loading a
    /// user whose configuration has a hashed control password.
    pub fn with_control_password(self, password: &str) -> Self {
        self.with_controller(Box::new(PortController::new(
            ControlOptions::with_password(password),
        )))
    }

    /// Use different Tor launch options.
    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    /// Identity name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Contact book.
    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    /// Tor configuration.
    pub fn tor_config(&self) -> &TorConfig {
        &self.tor_config
    }

    /// Registered hidden services.
    pub fn services(&self) -> &ServiceDirectory {
        &self.services
    }

    /// Pids of tracked Tor processes.
    pub fn process_ids(&self) -> Vec<u32> {
        self.processes.pids()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UserState {
        if self.processes.is_empty() {
            UserState::Idle
        } else {
            UserState::Running
        }
    }

    /// Whether any Tor process is tracked.
    pub fn is_running(&self) -> bool {
        self.state() == UserState::Running
    }

    /// Add a contact. Conflicts are reported, not raised.
    pub fn add_contact(&mut self, username: &str, key: &[u8]) -> ContactStatus {
        self.contacts.add(username, key)
    }

    /// Start a Tor daemon with `config`, or with this user's own
    /// configuration when `None`.
    ///
    /// With `force`, a port conflict kills every Tor process on the host and
    /// retries once.
    pub fn run_tor(&mut self, config: Option<&TorConfig>, force: bool) -> Result<u32> {
        let config = config.unwrap_or(&self.tor_config);
        self.processes.start(
            config,
            &self.launch.tor_binary,
            self.launch.bootstrap_timeout,
            force,
        )
    }

    /// Stop every tracked Tor process; with `nuke`, every Tor process on the
    /// host.
    pub fn kill_tor(&mut self, nuke: bool) -> Result<()> {
        self.processes.stop_all(nuke)
    }

    /// Register a hidden service forwarding `remote_port` to `local_port`.
    ///
    /// Without a name, the service is named after the user.
    pub fn create_service(
        &mut self,
        name: Option<&str>,
        remote_port: u16,
        local_port: u16,
    ) -> Result<&HiddenService> {
        let name = name.unwrap_or(&self.username).to_string();
        self.services.create(
            self.controller.as_ref(),
            self.tor_config.control_port,
            &name,
            remote_port,
            local_port,
        )
    }

    /// Remove a registered hidden service; with `clean`, delete its
    /// directory too.
    ///
    /// Fails with [`Error::NotFound`] if nothing is registered under the
    /// name (the user's own name when `None`).
    pub fn remove_service(&mut self, name: Option<&str>, clean: bool) -> Result<HiddenService> {
        let name = name.unwrap_or(&self.username).to_string();
        self.services.remove(
            self.controller.as_ref(),
            self.tor_config.control_port,
            &name,
            clean,
        )
    }

    /// Register every stored service again on the running daemon, e.g.
    /// after loading a saved user. Returns how many were re-created.
    pub fn reattach_services(&mut self) -> Result<usize> {
        let stored: Vec<(String, HiddenService)> = self
            .services
            .iter()
            .map(|(name, service)| (name.to_string(), service.clone()))
            .collect();

        for (name, service) in &stored {
            self.services.create(
                self.controller.as_ref(),
                self.tor_config.control_port,
                name,
                service.remote_port,
                service.local_port,
            )?;
        }
        tracing::info!(count = stored.len(), "Reattached hidden services");
        Ok(stored.len())
    }

    /// Ask Tor for new circuits.
    pub fn new_identity(&self) -> Result<()> {
        self.controller.new_identity(self.tor_config.control_port)
    }

    /// Delete the Tor data directory.
    pub fn nuke(&self) -> Result<()> {
        std::fs::remove_dir_all(&self.tor_config.data_directory)?;
        tracing::warn!(
            data_directory = %self.tor_config.data_directory.display(),
            "Deleted tor data directory"
        );
        Ok(())
    }

    fn ensure_idle(&mut self, force: bool) -> Result<()> {
        if self.is_running() {
            if !force {
                return Err(Error::Busy);
            }
            tracing::warn!("Forcing serialization; stopping tor");
            self.processes.stop_all(true)?;
        }
        Ok(())
    }

    /// Serialize the logical state.
    ///
    /// Without a key path the plain encoding is returned. With one, the key
    /// is read from that file and the result is an encoded [`SealedBox`].
    /// Fails with [`Error::Busy`] while Tor runs unless `force` is set.
    pub fn serialize(&mut self, key_path: Option<&Path>, force: bool) -> Result<Vec<u8>> {
        self.ensure_idle(force)?;
        match key_path {
            None => Ok(self.to_record().encode()?.to_vec()),
            Some(path) => {
                let key = crypto::load_key(path)?;
                self.serialize_with_key(&key, force)
            }
        }
    }

    /// Serialize and encrypt under raw key bytes.
    pub fn serialize_with_key(&mut self, key: &[u8], force: bool) -> Result<Vec<u8>> {
        self.ensure_idle(force)?;
        let plain = self.to_record().encode()?;
        let sealed = crypto::encrypt(&plain, key)?;
        tracing::debug!(username = %self.username, "Serialized user");
        sealed.to_bytes()
    }

    /// Inverse of [`User::serialize`]: `key` must be given iff the bytes are
    /// encrypted.
    pub fn deserialize(bytes: &[u8], key: Option<&[u8]>) -> Result<Self> {
        let record = match key {
            None => UserRecord::decode(bytes)?,
            Some(key) => {
                let sealed = SealedBox::from_bytes(bytes)?;
                let plain = crypto::decrypt(&sealed, key)?;
                UserRecord::decode(&plain)?
            }
        };
        tracing::debug!(username = %record.username, "Deserialized user");
        Ok(Self::from_record(record))
    }
}
