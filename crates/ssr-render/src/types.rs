//! Foundational public types for the ssr-render library.
//!
//! This module defines the data model shared by every layer:
//! - [`Package`]: one `(identifier, source)` entry of an ordered package list
//! - [`CacheBehavior`]: whether context resolution reads and/or writes the cache
//! - [`RenderRequest`] / [`RenderResult`] / [`StyleOutput`]: the render call surface
//! - [`RenderSettings`]: process-level configuration for a [`Renderer`](crate::Renderer)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default context cache capacity: 100 MiB.
pub const DEFAULT_CACHE_CAPACITY_BYTES: usize = 100 * 1024 * 1024;

/// Environment variable overriding [`RenderSettings::cache_capacity_bytes`].
pub const CACHE_BYTES_ENV: &str = "SSR_CONTEXT_CACHE_BYTES";

/// Environment variable overriding [`RenderSettings::default_cache_behavior`].
pub const CACHE_BEHAVIOR_ENV: &str = "SSR_CACHE_BEHAVIOR";

/// One source package: a stable identifier plus the source text evaluated
/// into an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub identifier: String,
    pub source: String,
}

impl Package {
    pub fn new(identifier: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            source: source.into(),
        }
    }
}

/// Cache policy for resolving an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBehavior {
    /// Read the cache; on a miss build and write.
    #[default]
    Default,
    /// Skip the read, always build, still write.
    BypassRead,
    /// Neither read nor write.
    Ignore,
}

impl CacheBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheBehavior::Default => "default",
            CacheBehavior::BypassRead => "bypass-read",
            CacheBehavior::Ignore => "ignore",
        }
    }

    pub(crate) fn reads(self) -> bool {
        matches!(self, CacheBehavior::Default)
    }

    pub(crate) fn writes(self) -> bool {
        !matches!(self, CacheBehavior::Ignore)
    }
}

impl fmt::Display for CacheBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`CacheBehavior`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache behavior '{0}' (expected default, bypass-read or ignore)")]
pub struct ParseCacheBehaviorError(pub String);

impl FromStr for CacheBehavior {
    type Err = ParseCacheBehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "yes" => Ok(CacheBehavior::Default),
            // "no" is the legacy spelling used by older callers.
            "bypass-read" | "bypass_read" | "no" => Ok(CacheBehavior::BypassRead),
            "ignore" => Ok(CacheBehavior::Ignore),
            other => Err(ParseCacheBehaviorError(other.to_string())),
        }
    }
}

/// A single render call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Ordered package list; order and identifiers are part of the cache key.
    pub packages: Vec<Package>,
    /// Path of the entry module registered by one of the packages.
    pub entry: String,
    /// Input data handed to the entry module and echoed back in the result.
    #[serde(default)]
    pub input: Value,
    /// Extra global bindings, injected before packages load and again before
    /// every render against the context.
    #[serde(default)]
    pub globals: Map<String, Value>,
    /// Per-call override of the renderer's default cache behavior.
    #[serde(default)]
    pub cache_behavior: Option<CacheBehavior>,
}

impl RenderRequest {
    pub fn new(packages: Vec<Package>, entry: impl Into<String>, input: Value) -> Self {
        Self {
            packages,
            entry: entry.into(),
            input,
            globals: Map::new(),
            cache_behavior: None,
        }
    }

    pub fn with_globals(mut self, globals: Map<String, Value>) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_cache_behavior(mut self, behavior: CacheBehavior) -> Self {
        self.cache_behavior = Some(behavior);
        self
    }
}

/// Style rules generated while rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleOutput {
    /// Concatenated CSS rules, in injection order.
    pub content: String,
    /// Class names applied during the render, in first-use order, without duplicates.
    pub applied_class_names: Vec<String>,
}

/// The outcome of a successful render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    pub markup: String,
    pub style: StyleOutput,
    /// The request's input data, unmodified.
    pub echoed_input: Value,
}

/// Process-level configuration for a [`Renderer`](crate::Renderer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Byte budget of the context cache. Fixed for the renderer's lifetime.
    pub cache_capacity_bytes: usize,
    /// Behavior applied to requests that carry no override.
    pub default_cache_behavior: CacheBehavior,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
            default_cache_behavior: CacheBehavior::Default,
        }
    }
}

impl RenderSettings {
    /// Build settings from `SSR_CONTEXT_CACHE_BYTES` and `SSR_CACHE_BEHAVIOR`.
    ///
    /// Absent variables keep the defaults; unparseable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(raw) = lookup(CACHE_BYTES_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(bytes) => settings.cache_capacity_bytes = bytes,
                Err(err) => tracing::warn!(
                    "ignoring {CACHE_BYTES_ENV}={raw:?}: {err}; using {} bytes",
                    settings.cache_capacity_bytes
                ),
            }
        }

        if let Some(raw) = lookup(CACHE_BEHAVIOR_ENV) {
            match raw.parse::<CacheBehavior>() {
                Ok(behavior) => settings.default_cache_behavior = behavior,
                Err(err) => tracing::warn!("ignoring {CACHE_BEHAVIOR_ENV}: {err}"),
            }
        }

        settings
    }
}
