//! Hidden services registered by a user, keyed by short name.

use crate::error::{Error, Result};
use crate::tor::{HiddenService, HiddenServiceControl};
use std::collections::BTreeMap;

/// Suffix appended to a service name to form its on-disk directory.
pub const SERVICE_DIR_SUFFIX: &str = ".tordir";

/// On-disk directory name for a service.
pub fn service_dir_name(name: &str) -> String {
    format!("{}{}", name, SERVICE_DIR_SUFFIX)
}

/// Mapping from service name to its registration handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDirectory {
    services: BTreeMap<String, HiddenService>,
}

impl ServiceDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(services: BTreeMap<String, HiddenService>) -> Self {
        Self { services }
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<String, HiddenService> {
        &self.services
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<&HiddenService> {
        self.services.get(name)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Iterate over `(name, handle)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HiddenService)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Ask the controller for a hidden service forwarding `remote_port` to
    /// `local_port` and store its handle under `name`.
    ///
    /// Registering an existing name replaces the stored handle.
    pub fn create(
        &mut self,
        controller: &dyn HiddenServiceControl,
        control_port: u16,
        name: &str,
        remote_port: u16,
        local_port: u16,
    ) -> Result<&HiddenService> {
        let dir_name = service_dir_name(name);
        let service =
            controller.create_hidden_service(control_port, &dir_name, remote_port, local_port)?;

        tracing::info!(
            name,
            hostname = service.hostname.as_deref().unwrap_or("<pending>"),
            remote_port,
            local_port,
            "Registered hidden service"
        );

        self.services.insert(name.to_string(), service);
        self.services
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("service {}", name)))
    }

    /// Remove the service registered as `name` through the controller.
    ///
    /// Fails with [`Error::NotFound`] if `name` is unknown. The entry is only
    /// dropped once the controller has accepted the removal.
    pub fn remove(
        &mut self,
        controller: &dyn HiddenServiceControl,
        control_port: u16,
        name: &str,
        clean: bool,
    ) -> Result<HiddenService> {
        let service = self
            .services
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("service {} does not exist", name)))?;

        controller.remove_hidden_service(control_port, service, clean)?;

        let removed = self
            .services
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("service {}", name)))?;
        tracing::info!(name, "Unregistered hidden service");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeController {
        removed: RefCell<Vec<PathBuf>>,
        fail_remove: bool,
    }

    impl HiddenServiceControl for FakeController {
        fn create_hidden_service(
            &self,
            _control_port: u16,
            dir_name: &str,
            remote_port: u16,
            local_port: u16,
        ) -> Result<HiddenService> {
            Ok(HiddenService {
                path: PathBuf::from("/data").join(dir_name),
                hostname: Some("example.onion".into()),
                remote_port,
                local_port,
            })
        }

        fn remove_hidden_service(&self, _: u16, service: &HiddenService, _: bool) -> Result<()> {
            if self.fail_remove {
                return Err(Error::Tor("552 unrecognized".into()));
            }
            self.removed.borrow_mut().push(service.path.clone());
            Ok(())
        }

        fn new_identity(&self, _: u16) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_service_dir_name() {
        assert_eq!(service_dir_name("chat"), "chat.tordir");
    }

    #[test]
    fn test_create_keys_by_base_name() {
        let controller = FakeController::default();
        let mut dir = ServiceDirectory::new();

        let service = dir.create(&controller, 9051, "chat", 80, 5000).expect("create");
        assert_eq!(service.path, PathBuf::from("/data/chat.tordir"));
        assert!(dir.contains("chat"));
        assert!(!dir.contains("chat.tordir"));
    }

    #[test]
    fn test_remove_registered() {
        let controller = FakeController::default();
        let mut dir = ServiceDirectory::new();
        dir.create(&controller, 9051, "chat", 80, 5000).expect("create");

        let removed = dir.remove(&controller, 9051, "chat", true).expect("remove");
        assert_eq!(removed.local_port, 5000);
        assert!(dir.is_empty());
        assert_eq!(controller.removed.borrow().len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let controller = FakeController::default();
        let mut dir = ServiceDirectory::new();
        dir.create(&controller, 9051, "chat", 80, 5000).expect("create");

        let before = dir.clone();
        assert!(matches!(
            dir.remove(&controller, 9051, "ghost", true),
            Err(Error::NotFound(_))
        ));
        assert_eq!(dir, before);
        assert!(controller.removed.borrow().is_empty());
    }

    #[test]
    fn test_failed_removal_keeps_entry() {
        let controller = FakeController {
            fail_remove: true,
            ..Default::default()
        };
        let mut dir = ServiceDirectory::new();
        dir.create(&controller, 9051, "chat", 80, 5000).expect("create");

        assert!(dir.remove(&controller, 9051, "chat", false).is_err());
        assert!(dir.contains("chat"));
    }
}
