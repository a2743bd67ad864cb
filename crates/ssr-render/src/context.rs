//! Execution contexts and the factory that builds them.
//!
//! [`ContextFactory::build`] turns a package list into a ready
//! [`ExecutionContext`]: a fresh environment with polyfills installed, extra
//! globals injected and every package loaded in order. A failure at any step
//! aborts the build and no context is returned.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::environment::{Environment, EnvironmentFactory, Invocation};
use crate::error::RenderError;
use crate::types::Package;

/// An environment with a package list loaded into it.
pub struct ExecutionContext<E> {
    env: E,
    footprint_bytes: usize,
    package_count: usize,
    /// Names bound by the build or the most recent render.
    injected: RefCell<BTreeSet<String>>,
}

impl<E: Environment> ExecutionContext<E> {
    /// Estimated memory footprint used for cache accounting: the total bytes
    /// of identifiers and source text loaded.
    pub fn footprint_bytes(&self) -> usize {
        self.footprint_bytes
    }

    pub fn package_count(&self) -> usize {
        self.package_count
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Replace the injected globals with `globals`, then invoke `entry` with
    /// `input`.
    ///
    /// Names injected earlier but absent from `globals` are unbound first, so
    /// a reused context sees exactly the current request's globals.
    pub fn render(
        &self,
        entry: &str,
        input: &Value,
        globals: &Map<String, Value>,
    ) -> Result<Invocation, RenderError> {
        let mut injected = self.injected.borrow_mut();
        for stale in injected.iter().filter(|name| !globals.contains_key(name.as_str())) {
            self.env.remove_global(stale)?;
        }
        injected.clear();
        for (name, value) in globals {
            self.env.inject_global(name, value)?;
            injected.insert(name.clone());
        }
        drop(injected);
        self.env.invoke(entry, input)
    }
}

/// Estimated footprint of a package list, in bytes.
pub fn footprint_bytes(packages: &[Package]) -> usize {
    packages
        .iter()
        .map(|p| p.identifier.len() + p.source.len())
        .sum()
}

/// Builds [`ExecutionContext`]s and counts how many it has constructed.
pub struct ContextFactory<F> {
    environments: F,
    built: Arc<AtomicUsize>,
}

impl<F: EnvironmentFactory> ContextFactory<F> {
    pub fn new(environments: F) -> Self {
        Self {
            environments,
            built: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of environments constructed so far, including failed builds.
    pub fn contexts_built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    /// Shared handle to the construction counter.
    pub fn build_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.built)
    }

    /// Build a context: polyfills, then `globals`, then each package in order.
    pub fn build(
        &self,
        packages: &[Package],
        globals: &Map<String, Value>,
    ) -> Result<ExecutionContext<F::Env>, RenderError> {
        let start = Instant::now();
        let env = self.environments.new_environment()?;
        self.built.fetch_add(1, Ordering::SeqCst);

        env.install_polyfills()?;
        for (name, value) in globals {
            env.inject_global(name, value)?;
        }
        for package in packages {
            env.load_source(&package.identifier, &package.source)
                .inspect_err(|err| {
                    tracing::debug!("package {} failed to load: {err}", package.identifier)
                })?;
        }

        let footprint = footprint_bytes(packages);
        tracing::debug!(
            "built context: {} packages, {} bytes, {:?}",
            packages.len(),
            footprint,
            start.elapsed()
        );
        Ok(ExecutionContext {
            env,
            footprint_bytes: footprint,
            package_count: packages.len(),
            injected: RefCell::new(globals.keys().cloned().collect()),
        })
    }
}
