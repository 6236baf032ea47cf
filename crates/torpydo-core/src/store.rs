//! Saving and loading users as a key file plus an encrypted user file.
//!
//! - `<username>_key.bin`: raw key bytes, protected only by file permissions
//! - `<username>.bin`: encoded sealed record of the user state

use crate::crypto::{self, DEFAULT_KEY_LENGTH};
use crate::error::{Error, Result};
use crate::user::User;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Where a user was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedUser {
    /// Encrypted user state.
    pub user_path: PathBuf,
    /// Raw symmetric key.
    pub key_path: PathBuf,
}

/// Default file pair for `username`, relative to `dir`.
pub fn default_paths(dir: impl AsRef<Path>, username: &str) -> SavedUser {
    let dir = dir.as_ref();
    SavedUser {
        user_path: dir.join(format!("{}.bin", username)),
        key_path: dir.join(format!("{}_key.bin", username)),
    }
}

/// `<path>.tmp`, next to `path` so a rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `bytes` to a fresh file, readable by the owner only on Unix.
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Stage both files, then move them over the previous pair.
fn replace_pair(paths: &SavedUser, user_bytes: &[u8], key: &[u8]) -> Result<()> {
    let user_tmp = temp_path(&paths.user_path);
    let key_tmp = temp_path(&paths.key_path);

    let staged = write_private(&user_tmp, user_bytes)
        .and_then(|()| write_private(&key_tmp, key))
        .and_then(|()| std::fs::rename(&key_tmp, &paths.key_path).map_err(Error::from))
        .and_then(|()| std::fs::rename(&user_tmp, &paths.user_path).map_err(Error::from));

    if staged.is_err() {
        let _ = std::fs::remove_file(&user_tmp);
        let _ = std::fs::remove_file(&key_tmp);
    }
    staged
}

/// Save `user` encrypted.
///
/// Without `key` a fresh 16-byte key is generated; without paths the
/// default `<username>.bin` / `<username>_key.bin` in the working directory
/// are used. Fails with [`Error::Busy`] while the user has Tor running.
///
/// The record is encrypted before any file is touched, so a rejected key
/// leaves a previous save intact.
pub fn save_user(
    user: &mut User,
    key: Option<&[u8]>,
    user_path: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<SavedUser> {
    if user.is_running() {
        return Err(Error::Busy);
    }

    let defaults = default_paths(".", user.username());
    let paths = SavedUser {
        user_path: user_path.map_or(defaults.user_path, Path::to_path_buf),
        key_path: key_path.map_or(defaults.key_path, Path::to_path_buf),
    };

    let generated;
    let key = match key {
        Some(key) => key,
        None => {
            generated = crypto::generate_key(DEFAULT_KEY_LENGTH);
            &generated[..]
        }
    };

    let bytes = user.serialize_with_key(key, false)?;
    replace_pair(&paths, &bytes, key)?;

    tracing::info!(
        username = %user.username(),
        user_path = %paths.user_path.display(),
        key_path = %paths.key_path.display(),
        "Saved user"
    );
    Ok(paths)
}

/// Load a user saved by [`save_user`]. Nothing is running afterwards.
pub fn load_user(user_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<User> {
    let bytes = std::fs::read(user_path.as_ref())?;
    let key = crypto::load_key(key_path)?;
    let user = User::deserialize(&bytes, Some(key.as_slice()))?;

    tracing::info!(
        username = %user.username(),
        user_path = %user_path.as_ref().display(),
        "Loaded user"
    );
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tor::TorConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "torpydo-store-test-{}-{}",
            std::process::id(),
            id
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn test_default_paths() {
        let paths = default_paths("/data", "alice");
        assert_eq!(paths.user_path, PathBuf::from("/data/alice.bin"));
        assert_eq!(paths.key_path, PathBuf::from("/data/alice_key.bin"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = temp_dir();
        let paths = default_paths(&dir, "alice");
        let mut user = User::new("alice", TorConfig::new(dir.join("tordata"), 9050, 9051));
        user.add_contact("bob", b"k1");

        let saved = save_user(
            &mut user,
            None,
            Some(paths.user_path.as_path()),
            Some(paths.key_path.as_path()),
        )
        .expect("save");
        assert_eq!(saved, paths);
        assert_eq!(std::fs::read(&paths.key_path).expect("key").len(), 16);

        let loaded = load_user(&paths.user_path, &paths.key_path).expect("load");
        assert_eq!(loaded.to_record(), user.to_record());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_dir();
        let path = dir.join("k.bin");
        write_private(&path, b"0123456789abcdef").expect("write");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_with_other_key_fails() {
        let dir = temp_dir();
        let paths = default_paths(&dir, "alice");
        let mut user = User::new("alice", TorConfig::new(dir.join("tordata"), 9050, 9051));
        save_user(
            &mut user,
            None,
            Some(paths.user_path.as_path()),
            Some(paths.key_path.as_path()),
        )
        .expect("save");

        let other = dir.join("other_key.bin");
        std::fs::write(&other, crypto::generate_key(16).as_slice()).expect("write key");
        assert!(matches!(
            load_user(&paths.user_path, &other),
            Err(Error::Authentication)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_rejected_key_keeps_previous_save() {
        let dir = temp_dir();
        let paths = default_paths(&dir, "alice");
        let mut user = User::new("alice", TorConfig::new(dir.join("tordata"), 9050, 9051));
        user.add_contact("bob", b"k1");
        save_user(
            &mut user,
            None,
            Some(paths.user_path.as_path()),
            Some(paths.key_path.as_path()),
        )
        .expect("first save");
        let key_before = std::fs::read(&paths.key_path).expect("key");
        let user_before = std::fs::read(&paths.user_path).expect("user");

        user.add_contact("carol", b"k2");
        assert!(matches!(
            save_user(
                &mut user,
                Some(&[1u8; 10]),
                Some(paths.user_path.as_path()),
                Some(paths.key_path.as_path()),
            ),
            Err(Error::InvalidKey(_))
        ));

        assert_eq!(std::fs::read(&paths.key_path).expect("key"), key_before);
        assert_eq!(std::fs::read(&paths.user_path).expect("user"), user_before);
        let loaded = load_user(&paths.user_path, &paths.key_path).expect("load first save");
        assert!(loaded.contacts().contains("bob"));
        assert!(!loaded.contacts().contains("carol"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = temp_dir();
        let paths = default_paths(&dir, "alice");
        let mut user = User::new("alice", TorConfig::new(dir.join("tordata"), 9050, 9051));
        for _ in 0..2 {
            save_user(
                &mut user,
                None,
                Some(paths.user_path.as_path()),
                Some(paths.key_path.as_path()),
            )
            .expect("save");
        }

        let mut names: Vec<_> = std::fs::read_dir(&dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice.bin", "alice_key.bin"]);
        load_user(&paths.user_path, &paths.key_path).expect("load latest save");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
