//! # Torpydo Core Library
//!
//! Manages a local identity on the Tor network: the Tor daemons it starts,
//! the onion services it exposes, the public keys of its contacts, and an
//! encrypted on-disk form of all of that.
//!
//! ## Security Model
//!
//! - Persisted state is sealed with AES-GCM; a wrong key or any modified
//!   byte fails with a single generic authentication error
//! - Key files are written owner-readable only
//! - Key material never reaches the logs, only fingerprints
//! - Live process handles are never persisted
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         store (save / load user)        │
//! ├─────────────────────────────────────────┤
//! │                  user                   │
//! ├──────────────┬──────────────┬───────────┤
//! │   process    │   services   │ contacts  │
//! ├──────────────┴──────────────┼───────────┤
//! │    tor (launch, control)    │  crypto   │
//! └─────────────────────────────┴───────────┘
//! ```
//!
//! All operations are blocking. Host-wide process operations (force retry,
//! nuke) affect every Tor process on the machine and are not coordinated
//! between concurrent callers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod contacts;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod net;
pub mod process;
pub mod services;
pub mod store;
pub mod tor;
pub mod user;

pub use contacts::{ContactBook, ContactStatus};
pub use error::{Error, Result};
pub use process::ProcessRegistry;
pub use services::ServiceDirectory;
pub use store::{load_user, save_user, SavedUser};
pub use user::{User, UserRecord, UserState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
