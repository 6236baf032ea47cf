//! Error types for Torpydo.
//!
//! Every fallible operation returns one named kind. Decryption failures are
//! deliberately generic so they cannot act as an oracle.

use thiserror::Error;

/// Core error type for Torpydo operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Serialization requested while Tor processes are still tracked.
    #[error("tor processes are still running; stop them or force serialization")]
    Busy,

    /// A configured SOCKS or control port is already bound on the host.
    #[error("cannot bind port: {0}")]
    Bind(String),

    /// Tor failed to start for any reason other than a port conflict.
    #[error("failed to launch tor: {0}")]
    Launch(String),

    /// A named entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The authentication tag did not verify.
    #[error("authentication failed")]
    Authentication,

    /// Key material has an unusable length or form.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The two entries of an interactively confirmed password differ.
    #[error("passwords don't match")]
    PasswordMismatch,

    /// Encoding/decoding of a persisted record failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The Tor control port reported an error or misbehaved.
    #[error("tor control error: {0}")]
    Tor(String),

    /// Filesystem or socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configured timeout elapsed.
    #[error("operation timed out")]
    Timeout,

    /// Proxied HTTP request failed.
    #[error("network error: {0}")]
    Network(String),
}

/// Result type alias using Torpydo's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller can recover by retrying with force or stopping
    /// processes first.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Busy | Error::Bind(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e.to_string())
        }
    }
}
