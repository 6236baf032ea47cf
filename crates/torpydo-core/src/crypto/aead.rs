//! Authenticated encryption using AES-GCM.
//!
//! The tag is kept detached from the ciphertext so the sealed record has the
//! `{nonce, tag, ciphertext}` shape the persisted artifact uses. The record is
//! only ever consumed as a whole.

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{consts::U12, AeadInPlace, KeyInit},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce as GcmNonce, Tag,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Size of nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Accepted AES key lengths in bytes.
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// A nonce for AEAD encryption.
///
/// Drawn from the OS RNG on every call to [`encrypt`]; never reused for a key
/// in practice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a new random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Encrypted record: nonce, detached tag and ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    /// Nonce used for this record.
    pub nonce: [u8; NONCE_SIZE],
    /// Authentication tag over the ciphertext.
    pub tag: [u8; TAG_SIZE],
    /// Encrypted payload.
    pub ciphertext: Vec<u8>,
}

impl SealedBox {
    /// Outer encoding of the record, as written to `<username>.bin`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode an outer record. Truncated or trailing data is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        use bincode::Options;
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
            .deserialize(bytes)
            .map_err(|e| Error::Encoding(format!("malformed sealed record: {}", e)))
    }
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| Error::InvalidKey(format!("unsupported key length {}", key.len()));
        match key.len() {
            16 => Ok(Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            24 => Ok(Cipher::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            32 => Ok(Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            n => Err(Error::InvalidKey(format!("unsupported key length {}", n))),
        }
    }

    fn seal(&self, nonce: &Nonce, buffer: &mut Vec<u8>) -> Result<[u8; TAG_SIZE]> {
        let nonce = GcmNonce::from_slice(nonce.as_bytes());
        let tag = match self {
            Cipher::Aes128(c) => c.encrypt_in_place_detached(nonce, b"", buffer),
            Cipher::Aes192(c) => c.encrypt_in_place_detached(nonce, b"", buffer),
            Cipher::Aes256(c) => c.encrypt_in_place_detached(nonce, b"", buffer),
        }
        .map_err(|_| Error::Encoding("encryption failed".into()))?;

        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    fn open(&self, nonce: &[u8; NONCE_SIZE], tag: &[u8; TAG_SIZE], buffer: &mut Vec<u8>) -> Result<()> {
        let nonce = GcmNonce::from_slice(nonce);
        let tag = Tag::from_slice(tag);
        match self {
            Cipher::Aes128(c) => c.decrypt_in_place_detached(nonce, b"", buffer, tag),
            Cipher::Aes192(c) => c.decrypt_in_place_detached(nonce, b"", buffer, tag),
            Cipher::Aes256(c) => c.decrypt_in_place_detached(nonce, b"", buffer, tag),
        }
        .map_err(|_| Error::Authentication)
    }
}

/// Encrypt plaintext under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<SealedBox> {
    let cipher = Cipher::new(key)?;
    let nonce = Nonce::random();

    let mut buffer = plaintext.to_vec();
    let tag = cipher.seal(&nonce, &mut buffer)?;

    Ok(SealedBox {
        nonce: *nonce.as_bytes(),
        tag,
        ciphertext: buffer,
    })
}

/// Decrypt and verify a sealed record.
///
/// Fails with [`Error::Authentication`] on any tag mismatch, and for a key
/// of unusable length, which cannot be the key the record was sealed with.
/// The buffer is wiped before returning so no unauthenticated bytes escape.
pub fn decrypt(sealed: &SealedBox, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Cipher::new(key).map_err(|_| Error::Authentication)?;
    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher.open(&sealed.nonce, &sealed.tag, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [42u8; 16];
        let plaintext = b"Hello, Torpydo!";

        let sealed = encrypt(plaintext, &key).expect("encrypt");
        assert_eq!(sealed.ciphertext.len(), plaintext.len());
        assert_ne!(&sealed.ciphertext[..], &plaintext[..]);

        let decrypted = decrypt(&sealed, &key).expect("decrypt");
        assert_eq!(&decrypted[..], plaintext);
    }

    #[test]
    fn test_all_key_sizes() {
        for size in KEY_SIZES {
            let key = vec![9u8; size];
            let sealed = encrypt(b"payload", &key).expect("encrypt");
            assert_eq!(&decrypt(&sealed, &key).expect("decrypt")[..], b"payload");
        }
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(encrypt(b"x", &[0u8; 15]), Err(Error::InvalidKey(_))));
        assert!(matches!(encrypt(b"x", &[]), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_decrypt_with_unusable_key_length() {
        let sealed = encrypt(b"secret", &[42u8; 16]).expect("encrypt");
        for len in [0, 1, 15, 17, 31, 33, 64] {
            assert!(matches!(
                decrypt(&sealed, &vec![42u8; len]),
                Err(Error::Authentication)
            ));
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret", &[42u8; 16]).expect("encrypt");
        assert!(matches!(
            decrypt(&sealed, &[43u8; 16]),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = [42u8; 16];
        let mut sealed = encrypt(b"secret", &key).expect("encrypt");
        sealed.tag[0] ^= 0x01;
        assert!(matches!(decrypt(&sealed, &key), Err(Error::Authentication)));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = [42u8; 16];
        let mut sealed = encrypt(b"secret", &key).expect("encrypt");
        sealed.nonce[11] ^= 0x80;
        assert!(matches!(decrypt(&sealed, &key), Err(Error::Authentication)));
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = [1u8; 16];
        let a = encrypt(b"same", &key).expect("encrypt");
        let b = encrypt(b"same", &key).expect("encrypt");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; 32];
        let sealed = encrypt(b"", &key).expect("encrypt");
        assert!(sealed.ciphertext.is_empty());
        assert!(decrypt(&sealed, &key).expect("decrypt").is_empty());
    }

    #[test]
    fn test_sealed_box_outer_encoding() {
        let sealed = encrypt(b"record", &[5u8; 16]).expect("encrypt");
        let bytes = sealed.to_bytes().expect("encode");
        assert_eq!(SealedBox::from_bytes(&bytes).expect("decode"), sealed);

        assert!(matches!(
            SealedBox::from_bytes(&bytes[..bytes.len() - 1]),
            Err(Error::Encoding(_))
        ));
    }
}
