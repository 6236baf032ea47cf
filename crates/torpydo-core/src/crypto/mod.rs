//! Symmetric encryption of opaque payloads.
//!
//! - **AES-GCM** (128/192/256 by key length): authenticated encryption
//! - Fresh 96-bit nonce per record, detached 128-bit tag
//!
//! Every entry point takes raw key bytes. Reading a key from disk is a
//! separate, explicit step ([`load_key`]).

mod aead;

pub use aead::{decrypt, encrypt, Nonce, SealedBox, KEY_SIZES, NONCE_SIZE, TAG_SIZE};

use crate::error::{Error, Result};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use zeroize::Zeroizing;

/// Default generated key length in bytes (AES-128).
pub const DEFAULT_KEY_LENGTH: usize = 16;

/// Generate `length` cryptographically secure random bytes for use as a key.
pub fn generate_key(length: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; length]);
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Read raw key bytes from a file.
///
/// A missing file is [`Error::NotFound`]; other read failures are
/// [`Error::Io`]. The length is not checked here.
pub fn load_key(path: impl AsRef<Path>) -> Result<Zeroizing<Vec<u8>>> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(key) => Ok(Zeroizing::new(key)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("key file {}", path.display())))
        }
        Err(e) => Err(e.into()),
    }
}

/// Encrypt the contents of a file.
pub fn encrypt_file(path: impl AsRef<Path>, key: &[u8]) -> Result<SealedBox> {
    let plaintext = Zeroizing::new(std::fs::read(path)?);
    encrypt(&plaintext, key)
}

/// Decrypt an outer-encoded sealed record stored in a file.
pub fn decrypt_file(path: impl AsRef<Path>, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = std::fs::read(path)?;
    decrypt(&SealedBox::from_bytes(&bytes)?, key)
}

/// Encode a structured value and encrypt it.
pub fn encrypt_structured<T: Serialize>(value: &T, key: &[u8]) -> Result<SealedBox> {
    let plaintext = Zeroizing::new(bincode::serialize(value)?);
    encrypt(&plaintext, key)
}

/// Decrypt a sealed record and decode the structured value inside.
pub fn decrypt_structured<T: DeserializeOwned>(sealed: &SealedBox, key: &[u8]) -> Result<T> {
    let plaintext = decrypt(sealed, key)?;
    Ok(bincode::deserialize(&plaintext)?)
}
