// ssr-render: server-side component rendering over cached, isolated RustPython
// execution contexts.

pub mod cache;
pub mod context;
pub mod context_cache;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod output;
pub mod renderer;
pub mod secret;
pub mod types;
pub mod vm;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{ByteBoundedCache, CacheObserver, CacheStats, NoopObserver, TracingObserver};
pub use context::{ContextFactory, ExecutionContext};
pub use context_cache::{ContextCache, SharedContext};
pub use environment::{Environment, EnvironmentFactory, Invocation};
pub use error::{CacheError, ErrorKind, RenderError, SecretError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use renderer::{Renderer, RendererStats};
pub use secret::SharedSecret;
pub use types::{
    CacheBehavior, Package, ParseCacheBehaviorError, RenderRequest, RenderResult, RenderSettings,
    StyleOutput, CACHE_BEHAVIOR_ENV, CACHE_BYTES_ENV, DEFAULT_CACHE_CAPACITY_BYTES,
};
pub use vm::{PyEnvironment, PyEnvironmentFactory};
