//! Thread-safe capture buffers shared between Rust and the interpreter.
//!
//! [`StyleBuffer`] collects the CSS rules injected through `css(...)` during a
//! render. [`ConsoleLog`] stands in for `sys.stdout` / `sys.stderr` and forwards
//! complete lines from package code to `tracing`.
//!
//! Both are cheap to clone: clones share state through `Arc<Mutex<_>>`, so the
//! native functions registered in the VM can own a handle while the
//! environment keeps another to read results back.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::types::StyleOutput;

/// Number of hex digits of the body hash appended to a style key.
const CLASS_HASH_LEN: usize = 6;

/// Class name for a style rule: `<key>_<first 6 hex digits of sha256(body)>`.
///
/// Equal bodies under the same key always map to the same class, so the rule
/// is emitted once however many components use it.
pub fn class_name(key: &str, body: &str) -> String {
    let digest = hex::encode(Sha256::digest(body.as_bytes()));
    format!("{key}_{}", &digest[..CLASS_HASH_LEN])
}

// ── StyleBuffer ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct StyleBufferInner {
    content: String,
    class_names: Vec<String>,
    seen: HashSet<String>,
}

/// Accumulates style rules for the render in progress.
#[derive(Clone, Default)]
pub struct StyleBuffer {
    inner: Arc<Mutex<StyleBufferInner>>,
}

impl StyleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rule and return the class name to apply.
    ///
    /// The first injection of a class appends `.class{body}` to the content;
    /// repeats only return the name.
    pub fn inject(&self, key: &str, body: &str) -> String {
        let class = class_name(key, body);
        let mut inner = self.inner.lock().expect("StyleBuffer mutex poisoned");
        if inner.seen.insert(class.clone()) {
            inner.content.push('.');
            inner.content.push_str(&class);
            inner.content.push('{');
            inner.content.push_str(body);
            inner.content.push('}');
            inner.class_names.push(class.clone());
        }
        class
    }

    /// Drain the collected rules, leaving the buffer empty for the next render.
    pub fn take(&self) -> StyleOutput {
        let mut inner = self.inner.lock().expect("StyleBuffer mutex poisoned");
        let drained = std::mem::take(&mut *inner);
        StyleOutput {
            content: drained.content,
            applied_class_names: drained.class_names,
        }
    }

    /// Discard anything collected so far.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("StyleBuffer mutex poisoned");
        *inner = StyleBufferInner::default();
    }
}

// ── ConsoleLog ───────────────────────────────────────────────────────────────

/// Which interpreter stream a [`ConsoleLog`] replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// Line-buffered sink for interpreter output.
///
/// `print()` issues separate writes for the text and the newline, so partial
/// writes are held until a newline (or an explicit flush) completes the line.
#[derive(Clone)]
pub struct ConsoleLog {
    stream: ConsoleStream,
    pending: Arc<Mutex<String>>,
}

impl ConsoleLog {
    pub fn new(stream: ConsoleStream) -> Self {
        Self {
            stream,
            pending: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Append `data`, logging every line it completes. Returns the byte count
    /// accepted, as Python's `write` does.
    pub fn write(&self, data: &str) -> usize {
        for line in self.push(data) {
            self.emit(&line);
        }
        data.len()
    }

    /// Log any incomplete trailing line.
    pub fn flush(&self) {
        let rest = {
            let mut pending = self.pending.lock().expect("ConsoleLog mutex poisoned");
            std::mem::take(&mut *pending)
        };
        if !rest.is_empty() {
            self.emit(&rest);
        }
    }

    fn push(&self, data: &str) -> Vec<String> {
        let mut pending = self.pending.lock().expect("ConsoleLog mutex poisoned");
        pending.push_str(data);
        let mut lines = Vec::new();
        while let Some(pos) = pending.find('\n') {
            let line: String = pending.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    fn emit(&self, line: &str) {
        match self.stream {
            ConsoleStream::Stdout => tracing::debug!(target: "ssr_render::console", "{line}"),
            ConsoleStream::Stderr => tracing::warn!(target: "ssr_render::console", "{line}"),
        }
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
