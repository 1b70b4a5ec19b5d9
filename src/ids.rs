//! Mapping from external element identifiers to document UNIDs.
//!
//! Identifiers that already look like a UNID are used verbatim. Anything
//! else is hashed with key-hash version 1: XXH3-128 over
//! [`KEY_HASH_DOMAIN`] followed by the key bytes, rendered as 32 upper-case
//! hex digits. Changing the domain string or the hash is a format change
//! and must bump [`KEY_HASH_VERSION`].
//!
//! Graph lookups accept any [`ElementKey`]: strings, [`Unid`]s, or a
//! [`Key`] wrapping some other serializable value, which hashes its JSON
//! encoding.

use std::fmt;

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{GraphError, Result};
use crate::types::Unid;

/// Version of the key derivation below.
pub const KEY_HASH_VERSION: u32 = 1;

/// Domain separator prefixed to every hashed key.
pub const KEY_HASH_DOMAIN: &[u8] = b"docgraph/key/v1\0";

/// How an external identifier maps onto the document key space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedKey {
    /// The identifier already was a UNID.
    Native(Unid),
    /// The identifier was hashed; `key` is the original text.
    Derived {
        /// Derived document key.
        unid: Unid,
        /// Source identifier.
        key: String,
    },
}

impl ResolvedKey {
    /// The document key either way.
    pub fn unid(&self) -> &Unid {
        match self {
            ResolvedKey::Native(unid) => unid,
            ResolvedKey::Derived { unid, .. } => unid,
        }
    }

    /// The source identifier when the key was derived.
    pub fn source_key(&self) -> Option<&str> {
        match self {
            ResolvedKey::Native(_) => None,
            ResolvedKey::Derived { key, .. } => Some(key),
        }
    }
}

/// Returns true if `raw` is already in UNID form.
pub fn is_unid(raw: &str) -> bool {
    Unid::parse(raw).is_some()
}

/// Hashes an arbitrary string key into the UNID space.
pub fn derive_unid(key: &str) -> Unid {
    hash_bytes(key.as_bytes())
}

/// Hashes any serializable key. Strings hash exactly like [`derive_unid`];
/// other values hash their JSON encoding.
pub fn derive_unid_from<T: Serialize + ?Sized>(key: &T) -> Result<Unid> {
    let text = match key_text(key)? {
        KeyText::Text(text) | KeyText::Json(text) => text,
    };
    Ok(derive_unid(&text))
}

enum KeyText {
    Text(String),
    Json(String),
}

fn key_text<T: Serialize + ?Sized>(key: &T) -> Result<KeyText> {
    let unserializable =
        |e: serde_json::Error| GraphError::InvalidArgument(format!("unserializable key: {e}"));
    match serde_json::to_value(key).map_err(unserializable)? {
        serde_json::Value::String(text) => Ok(KeyText::Text(text)),
        other => Ok(KeyText::Json(
            serde_json::to_string(&other).map_err(unserializable)?,
        )),
    }
}

/// An identifier that can name a graph element.
pub trait ElementKey: fmt::Debug {
    /// Maps the identifier onto the document key space. `Ok(None)` when it
    /// cannot name an element.
    fn resolve_key(&self) -> Result<Option<ResolvedKey>>;
}

impl ElementKey for str {
    fn resolve_key(&self) -> Result<Option<ResolvedKey>> {
        Ok(resolve(self))
    }
}

impl ElementKey for String {
    fn resolve_key(&self) -> Result<Option<ResolvedKey>> {
        Ok(resolve(self))
    }
}

impl ElementKey for Unid {
    fn resolve_key(&self) -> Result<Option<ResolvedKey>> {
        Ok(Some(ResolvedKey::Native(self.clone())))
    }
}

impl<K: ElementKey + ?Sized> ElementKey for &K {
    fn resolve_key(&self) -> Result<Option<ResolvedKey>> {
        (**self).resolve_key()
    }
}

/// A serializable value used as an element identifier, e.g. `Key(42)` or
/// `Key(("order", 7))`.
///
/// Values that serialize to a JSON string resolve like that string; any
/// other value is always derived from its JSON text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Key<T>(pub T);

impl<T: Serialize + fmt::Debug> ElementKey for Key<T> {
    fn resolve_key(&self) -> Result<Option<ResolvedKey>> {
        match key_text(&self.0)? {
            KeyText::Text(text) => Ok(resolve(&text)),
            KeyText::Json(key) => Ok(Some(ResolvedKey::Derived {
                unid: derive_unid(&key),
                key,
            })),
        }
    }
}

/// Resolves an external identifier. Returns `None` for identifiers that
/// cannot name an element (empty or whitespace only).
pub fn resolve(raw: &str) -> Option<ResolvedKey> {
    if raw.trim().is_empty() {
        return None;
    }
    Some(match Unid::parse(raw) {
        Some(unid) => ResolvedKey::Native(unid),
        None => ResolvedKey::Derived {
            unid: derive_unid(raw),
            key: raw.to_owned(),
        },
    })
}

/// Synthesizes the identifier of an edge that was added without one.
pub fn edge_key(out_id: &str, label: &str, in_id: &str) -> String {
    let mut key = String::with_capacity(out_id.len() + label.len() + in_id.len());
    key.push_str(out_id);
    key.push_str(label);
    key.push_str(in_id);
    key
}

fn hash_bytes(bytes: &[u8]) -> Unid {
    let mut buf = Vec::with_capacity(KEY_HASH_DOMAIN.len() + bytes.len());
    buf.extend_from_slice(KEY_HASH_DOMAIN);
    buf.extend_from_slice(bytes);
    Unid::from_bytes(xxh3_128(&buf).to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_stable_unids() {
        let a = derive_unid("A");
        assert_eq!(a, derive_unid("A"));
        assert_ne!(a, derive_unid("B"));
        assert!(is_unid(a.as_str()));
    }

    #[test]
    fn native_unids_pass_through() {
        let raw = "00112233445566778899aabbccddeeff";
        match resolve(raw) {
            Some(ResolvedKey::Native(unid)) => assert_eq!(unid.as_str(), raw.to_uppercase()),
            other => panic!("expected native key, got {other:?}"),
        }
    }

    #[test]
    fn blank_keys_do_not_resolve() {
        assert!(resolve("").is_none());
        assert!(resolve("   ").is_none());
    }

    #[test]
    fn serializable_string_matches_plain_string() {
        assert_eq!(derive_unid_from("A").unwrap(), derive_unid("A"));
        assert_ne!(derive_unid_from(&42u32).unwrap(), derive_unid("A"));
        assert_eq!(
            derive_unid_from(&(1, "x")).unwrap(),
            derive_unid_from(&(1, "x")).unwrap()
        );
    }

    #[test]
    fn serializable_keys_resolve_through_json() {
        let number = Key(42u32).resolve_key().unwrap().unwrap();
        assert_eq!(number.source_key(), Some("42"));
        assert_eq!(number.unid(), &derive_unid_from(&42u32).unwrap());

        let text = Key("A").resolve_key().unwrap().unwrap();
        assert_eq!(text, "A".resolve_key().unwrap().unwrap());

        let tuple = Key(("order", 7)).resolve_key().unwrap().unwrap();
        assert_eq!(tuple.source_key(), Some(r#"["order",7]"#));

        let unid = derive_unid("A");
        assert_eq!(
            unid.resolve_key().unwrap(),
            Some(ResolvedKey::Native(unid.clone()))
        );
        assert!(Key("  ").resolve_key().unwrap().is_none());
    }

    #[test]
    fn edge_key_concatenates_out_label_in() {
        assert_eq!(edge_key("a", "knows", "b"), "aknowsb");
    }
}
