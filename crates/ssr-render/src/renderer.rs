//! The render entry point: a single worker thread fronted by an async API.
//!
//! ## Design
//!
//! [`Renderer`] spawns one dedicated OS thread (`ssr-render-worker`) that owns
//! the [`ContextCache`] and every interpreter in it. Interpreters are not
//! `Send`, so they never leave that thread. Callers send commands over an
//! `mpsc` channel and await a `oneshot` reply.
//!
//! Commands run one at a time, to completion, in the order they were sent.
//! Configuration commands travel on the same queue, so a
//! [`set_default_cache_behavior`](Renderer::set_default_cache_behavior) call
//! affects exactly the renders sent after it.
//!
//! A panic inside a job is caught on the worker and reported to that caller
//! as [`RenderError::WorkerPanicked`]; the worker keeps serving.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::cache::CacheStats;
use crate::context::ContextFactory;
use crate::context_cache::ContextCache;
use crate::environment::EnvironmentFactory;
use crate::error::RenderError;
use crate::types::{CacheBehavior, RenderRequest, RenderResult, RenderSettings};
use crate::vm::PyEnvironmentFactory;

// ── Commands ─────────────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T, RenderError>>;

enum Command {
    Render {
        request: RenderRequest,
        reply: Reply<RenderResult>,
    },
    SetDefaultBehavior(CacheBehavior),
    ResetGlobals,
    ResetCache,
    Stats(oneshot::Sender<RendererStats>),
    Shutdown,
}

/// Snapshot of renderer state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RendererStats {
    /// Context cache occupancy.
    pub cache: Option<CacheStats>,
    /// Execution contexts constructed since the renderer started.
    pub contexts_built: usize,
    /// Behavior applied to requests without an override.
    pub default_cache_behavior: CacheBehavior,
}

// ── Worker ───────────────────────────────────────────────────────────────────

struct Worker<F: EnvironmentFactory> {
    cache: ContextCache<F>,
    configured_behavior: CacheBehavior,
    default_behavior: CacheBehavior,
}

impl<F> Worker<F>
where
    F: EnvironmentFactory,
    F::Env: 'static,
{
    fn run(mut self, commands: mpsc::Receiver<Command>) {
        tracing::info!(
            "render worker started (default cache behavior: {})",
            self.default_behavior
        );
        while let Ok(command) = commands.recv() {
            match command {
                Command::Render { request, reply } => {
                    let result = self.render_guarded(&request);
                    // The caller may have stopped waiting; nothing to do then.
                    let _ = reply.send(result);
                }
                Command::SetDefaultBehavior(behavior) => {
                    tracing::debug!("default cache behavior set to {behavior}");
                    self.default_behavior = behavior;
                }
                Command::ResetGlobals => {
                    self.default_behavior = self.configured_behavior;
                }
                Command::ResetCache => self.cache.reset(),
                Command::Stats(reply) => {
                    let _ = reply.send(RendererStats {
                        cache: self.cache.stats(),
                        contexts_built: self.cache.contexts_built(),
                        default_cache_behavior: self.default_behavior,
                    });
                }
                Command::Shutdown => break,
            }
        }
        tracing::debug!("render worker stopped");
    }

    fn render_guarded(&mut self, request: &RenderRequest) -> Result<RenderResult, RenderError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.render(request))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::warn!("render of {} panicked: {message}", request.entry);
            Err(RenderError::WorkerPanicked { message })
        })
    }

    fn render(&mut self, request: &RenderRequest) -> Result<RenderResult, RenderError> {
        let behavior = request.cache_behavior.unwrap_or(self.default_behavior);
        let context = self
            .cache
            .resolve(&request.packages, &request.globals, behavior)?;
        let invocation = context.render(&request.entry, &request.input, &request.globals)?;
        Ok(RenderResult {
            markup: invocation.markup,
            style: invocation.style,
            echoed_input: request.input.clone(),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Renders components against cached execution contexts.
///
/// Cheap to share by reference across tasks; all calls are serialized on the
/// worker thread. Dropping the renderer stops the worker after it finishes
/// the commands already queued.
pub struct Renderer {
    commands: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
    contexts_built: Arc<AtomicUsize>,
}

impl Renderer {
    /// Start a renderer backed by RustPython environments.
    pub fn new(settings: RenderSettings) -> Result<Self, RenderError> {
        Self::with_factory(settings, PyEnvironmentFactory::new())
    }

    /// Start a renderer backed by `environments`.
    pub fn with_factory<F>(settings: RenderSettings, environments: F) -> Result<Self, RenderError>
    where
        F: EnvironmentFactory + Send + 'static,
        F::Env: 'static,
    {
        let factory = ContextFactory::new(environments);
        let contexts_built = factory.build_counter();
        let (commands, receiver) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("ssr-render-worker".to_string())
            .spawn(move || {
                Worker {
                    cache: ContextCache::from_factory(factory, settings.cache_capacity_bytes),
                    configured_behavior: settings.default_cache_behavior,
                    default_behavior: settings.default_cache_behavior,
                }
                .run(receiver)
            })
            .map_err(|err| RenderError::environment(format!("cannot spawn render worker: {err}")))?;

        Ok(Self {
            commands,
            worker: Some(worker),
            contexts_built,
        })
    }

    /// Render `request.entry` with `request.input` in the context for
    /// `request.packages`.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderResult, RenderError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Render { request, reply })?;
        response.await.map_err(|_| RenderError::WorkerUnavailable)?
    }

    /// Blocking form of [`render`](Self::render) for callers outside an async
    /// runtime. Panics if called from within one.
    pub fn render_blocking(&self, request: RenderRequest) -> Result<RenderResult, RenderError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Render { request, reply })?;
        response
            .blocking_recv()
            .map_err(|_| RenderError::WorkerUnavailable)?
    }

    /// Change the behavior used by requests without an override.
    pub fn set_default_cache_behavior(&self, behavior: CacheBehavior) -> Result<(), RenderError> {
        self.send(Command::SetDefaultBehavior(behavior))
    }

    /// Restore the default cache behavior this renderer was started with.
    pub fn reset_globals(&self) -> Result<(), RenderError> {
        self.send(Command::ResetGlobals)
    }

    /// Drop every cached context.
    pub fn reset_cache(&self) -> Result<(), RenderError> {
        self.send(Command::ResetCache)
    }

    pub async fn stats(&self) -> Result<RendererStats, RenderError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        response.await.map_err(|_| RenderError::WorkerUnavailable)
    }

    /// Execution contexts constructed so far. Readable without a round trip
    /// to the worker.
    pub fn contexts_built(&self) -> usize {
        self.contexts_built.load(Ordering::SeqCst)
    }

    fn send(&self, command: Command) -> Result<(), RenderError> {
        self.commands
            .send(command)
            .map_err(|_| RenderError::WorkerUnavailable)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("render worker exited with a panic");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
