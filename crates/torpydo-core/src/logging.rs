//! Logging setup and redaction helpers.
//!
//! Key material and passwords never reach log output in clear. Wrap them in
//! one of the types below before handing them to a `tracing` macro.

use sha2::{Digest, Sha256};
use std::fmt;
use tracing_subscriber::EnvFilter;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Short SHA-256 fingerprint of public key bytes, for telling entries apart
/// in logs without printing the key.
pub struct KeyFingerprint<'a>(pub &'a [u8]);

impl<'a> fmt::Display for KeyFingerprint<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = Sha256::digest(self.0);
        write!(f, "{}", hex::encode(&digest[..8]))
    }
}

impl<'a> fmt::Debug for KeyFingerprint<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Build the filter used by [`init`]. `RUST_LOG` takes precedence.
pub fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "torpydo_core=debug"
    } else {
        "torpydo_core=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install a global fmt subscriber for applications embedding this crate.
///
/// Returns `false` if a global subscriber was already set.
pub fn init(verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .is_ok()
}
