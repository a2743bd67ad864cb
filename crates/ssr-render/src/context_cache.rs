//! Cache-policy layer between the renderer and the context factory.
//!
//! [`ContextCache::resolve`] maps a package list to an execution context,
//! building one only when the cache behavior and cache contents require it.
//! Contexts are keyed by [`fingerprint`] and accounted by their footprint.

use std::rc::Rc;

use serde_json::{Map, Value};

use crate::cache::{ByteBoundedCache, CacheStats};
use crate::context::{ContextFactory, ExecutionContext};
use crate::environment::EnvironmentFactory;
use crate::error::RenderError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::types::{CacheBehavior, Package};

/// Shared handle to a cached context. Contexts never leave the render worker,
/// so reference counting does not need to be atomic.
pub type SharedContext<E> = Rc<ExecutionContext<E>>;

pub struct ContextCache<F: EnvironmentFactory> {
    factory: ContextFactory<F>,
    cache: ByteBoundedCache<Fingerprint, SharedContext<F::Env>>,
}

impl<F> ContextCache<F>
where
    F: EnvironmentFactory,
    F::Env: 'static,
{
    /// Wrap `factory` with a cache holding at most `capacity_bytes` of
    /// context footprint.
    pub fn new(factory: F, capacity_bytes: usize) -> Self {
        Self::from_factory(ContextFactory::new(factory), capacity_bytes)
    }

    /// Like [`new`](Self::new), for a factory whose build counter is already
    /// shared elsewhere.
    pub fn from_factory(factory: ContextFactory<F>, capacity_bytes: usize) -> Self {
        Self {
            factory,
            cache: ByteBoundedCache::with_capacity(capacity_bytes),
        }
    }

    /// Return a context for `packages` under `behavior`.
    ///
    /// - `Ignore`: always build; the cache is neither read nor written.
    /// - `Default`: reuse a cached context, otherwise build and store.
    /// - `BypassRead`: always build and store, replacing any cached context.
    ///
    /// Build failures are returned as-is and leave the cache untouched.
    pub fn resolve(
        &mut self,
        packages: &[Package],
        globals: &Map<String, Value>,
        behavior: CacheBehavior,
    ) -> Result<SharedContext<F::Env>, RenderError> {
        let key = fingerprint(packages);

        if behavior.reads() {
            if let Some(context) = self.cache.get(&key) {
                tracing::debug!("reusing context {}", key.short());
                return Ok(Rc::clone(context));
            }
        }

        let context = Rc::new(self.factory.build(packages, globals)?);
        if behavior.writes() {
            let size = context.footprint_bytes();
            self.cache.put(key, Rc::clone(&context), Some(size))?;
        }
        Ok(context)
    }

    /// Drop every cached context. The capacity is kept.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.cache.stats()
    }

    pub fn contexts_built(&self) -> usize {
        self.factory.contexts_built()
    }
}
