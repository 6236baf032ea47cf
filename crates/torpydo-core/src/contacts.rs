//! Contact book: username to public key, write-once per username.

use crate::logging::KeyFingerprint;
use std::collections::BTreeMap;

/// Outcome of [`ContactBook::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    /// New entry stored.
    Added,
    /// Same username and key already present; nothing changed.
    Duplicate,
    /// Username already bound to a different key; the existing entry is
    /// kept.
    Conflict,
}

/// Append-mostly mapping from contact username to public key bytes.
///
/// There is no removal: once a username is bound to a key, that binding
/// stays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactBook {
    contacts: BTreeMap<String, Vec<u8>>,
}

impl ContactBook {
    /// Create an empty contact book.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(contacts: BTreeMap<String, Vec<u8>>) -> Self {
        Self { contacts }
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.contacts
    }

    /// Bind `username` to `key` unless it is already bound.
    pub fn add(&mut self, username: &str, key: &[u8]) -> ContactStatus {
        match self.contacts.get(username) {
            Some(existing) if existing.as_slice() == key => {
                tracing::warn!(username, "Duplicate contact entry");
                ContactStatus::Duplicate
            }
            Some(existing) => {
                tracing::warn!(
                    username,
                    stored = %KeyFingerprint(existing),
                    offered = %KeyFingerprint(key),
                    "Inconsistent contact entry; keeping stored key"
                );
                ContactStatus::Conflict
            }
            None => {
                tracing::info!(
                    username,
                    key = %KeyFingerprint(key),
                    "New contact entry"
                );
                self.contacts.insert(username.to_string(), key.to_vec());
                ContactStatus::Added
            }
        }
    }

    /// Key bound to `username`.
    pub fn get(&self, username: &str) -> Option<&[u8]> {
        self.contacts.get(username).map(Vec::as_slice)
    }

    /// Whether `username` is known.
    pub fn contains(&self, username: &str) -> bool {
        self.contacts.contains_key(username)
    }

    /// Iterate over `(username, key)` pairs, sorted by username.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.contacts
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of contacts.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether the book is empty.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_new() {
        let mut book = ContactBook::new();
        assert_eq!(book.add("alice", b"K"), ContactStatus::Added);
        assert_eq!(book.get("alice"), Some(&b"K"[..]));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mut book = ContactBook::new();
        book.add("alice", b"K");
        assert_eq!(book.add("alice", b"K"), ContactStatus::Duplicate);
        assert_eq!(book.get("alice"), Some(&b"K"[..]));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_conflict_keeps_original() {
        let mut book = ContactBook::new();
        book.add("alice", b"K1");
        assert_eq!(book.add("alice", b"K2"), ContactStatus::Conflict);
        assert_eq!(book.get("alice"), Some(&b"K1"[..]));
    }

    #[test]
    fn test_iter_sorted() {
        let mut book = ContactBook::new();
        book.add("carol", b"3");
        book.add("alice", b"1");
        book.add("bob", b"2");
        let names: Vec<_> = book.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }
}
