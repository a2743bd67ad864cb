//! Shared secret guarding the render entry point.
//!
//! Rendering executes whatever package code the caller supplies, so callers
//! must prove they know a secret provisioned on the server. The secret is read
//! once at startup; a missing or empty file is fatal.

use std::fmt;
use std::path::Path;

use subtle::ConstantTimeEq;

use crate::error::SecretError;

pub struct SharedSecret {
    value: String,
}

impl SharedSecret {
    /// Read the secret from `path`, trimming surrounding whitespace.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SecretError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SecretError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let value = raw.trim();
        if value.is_empty() {
            return Err(SecretError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            value: value.to_string(),
        })
    }

    /// Constant-time comparison against a caller-supplied value.
    pub fn matches(&self, candidate: &str) -> bool {
        self.value.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}
