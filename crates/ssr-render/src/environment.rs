//! Capability interface for isolated execution environments.
//!
//! An [`EnvironmentFactory`] creates fresh [`Environment`]s; the
//! [`ContextFactory`](crate::ContextFactory) drives them through the build
//! sequence (polyfills, globals, packages). Implementations must isolate
//! environments from one another: no environment may observe or mutate
//! another's state.
//!
//! The production implementation is [`PyEnvironment`](crate::PyEnvironment),
//! one RustPython interpreter per environment.

use serde_json::Value;

use crate::error::RenderError;
use crate::types::StyleOutput;

/// Output of one entry-module invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub markup: String,
    pub style: StyleOutput,
}

/// A single isolated environment.
///
/// Methods take `&self`: environments are shared by reference once cached and
/// are mutated only through the code they execute.
pub trait Environment {
    /// Install baseline compatibility shims. Called before any package code.
    fn install_polyfills(&self) -> Result<(), RenderError>;

    /// Bind `name` to `value` as a global visible to all code loaded afterwards.
    fn inject_global(&self, name: &str, value: &Value) -> Result<(), RenderError>;

    /// Unbind a global previously set by [`inject_global`](Self::inject_global).
    /// Unbinding a name that is not bound is not an error.
    fn remove_global(&self, name: &str) -> Result<(), RenderError>;

    /// Evaluate one package's source. Calls are order-sensitive: later sources
    /// may reference globals defined by earlier ones.
    fn load_source(&self, identifier: &str, source: &str) -> Result<(), RenderError>;

    /// Resolve `entry` and call it with `input`, returning the markup and the
    /// style rules generated during the call.
    fn invoke(&self, entry: &str, input: &Value) -> Result<Invocation, RenderError>;
}

/// Creates fresh, empty environments.
pub trait EnvironmentFactory {
    type Env: Environment;

    fn new_environment(&self) -> Result<Self::Env, RenderError>;
}
