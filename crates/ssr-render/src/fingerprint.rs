//! Package fingerprints: the cache key for execution contexts.
//!
//! A [`Fingerprint`] is the lowercase hex SHA-256 digest of a canonical
//! serialization of the ordered `(identifier, source)` pairs. Every field is
//! length-prefixed, so moving bytes between an identifier and its source (or
//! between neighbouring packages) changes the key.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::Package;

/// Deterministic cache key derived from a package list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of `packages`.
///
/// Pure: equal lists (by value) always produce equal fingerprints, whatever
/// their allocation or construction history.
pub fn fingerprint(packages: &[Package]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((packages.len() as u64).to_le_bytes());
    for package in packages {
        update_field(&mut hasher, package.identifier.as_bytes());
        update_field(&mut hasher, package.source.as_bytes());
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages(pairs: &[(&str, &str)]) -> Vec<Package> {
        pairs.iter().map(|(id, src)| Package::new(*id, *src)).collect()
    }

    #[test]
    fn test_same_list_same_fingerprint() {
        let a = packages(&[("core.py", "x = 1"), ("app.py", "y = x")]);
        let b = packages(&[("core.py", "x = 1"), ("app.py", "y = x")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_is_64_hex_digits() {
        let fp = fingerprint(&packages(&[("a.py", "pass")]));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_identifier_change_changes_fingerprint() {
        let original = packages(&[("core.py", "x = 1")]);
        let renamed = packages(&[("core-2.py", "x = 1")]);
        assert_ne!(fingerprint(&original), fingerprint(&renamed));
    }

    #[test]
    fn test_source_change_changes_fingerprint() {
        let a = packages(&[("core.py", "x = 1")]);
        let b = packages(&[("core.py", "x = 2")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_order_matters() {
        let a = packages(&[("a.py", "1"), ("b.py", "2")]);
        let b = packages(&[("b.py", "2"), ("a.py", "1")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = packages(&[("ab", "c")]);
        let b = packages(&[("a", "bc")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));

        let split = packages(&[("x", "12"), ("y", "3")]);
        let merged = packages(&[("x", "1"), ("2y", "3")]);
        assert_ne!(fingerprint(&split), fingerprint(&merged));
    }

    #[test]
    fn test_empty_list_differs_from_empty_package() {
        assert_ne!(fingerprint(&[]), fingerprint(&packages(&[("", "")])));
    }
}
