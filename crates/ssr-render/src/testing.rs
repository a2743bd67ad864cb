//! In-memory environments for exercising cache policy and the renderer
//! without booting an interpreter.
//!
//! A [`FakeEnv`] records every call it receives. Loading a source registers
//! its identifier as an entry path; sources containing [`FAIL_MARKER`] fail to
//! load. Invoking an entry renders the current globals and the input into a
//! deterministic markup string.

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde_json::Value;

use crate::environment::{Environment, EnvironmentFactory, Invocation};
use crate::error::RenderError;
use crate::types::StyleOutput;

/// Sources containing this text fail with [`RenderError::PackageLoad`].
pub(crate) const FAIL_MARKER: &str = "raise";

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeFactory;

impl EnvironmentFactory for FakeFactory {
    type Env = FakeEnv;

    fn new_environment(&self) -> Result<FakeEnv, RenderError> {
        Ok(FakeEnv::default())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeEnv {
    journal: RefCell<Vec<String>>,
    globals: RefCell<BTreeMap<String, Value>>,
    entries: RefCell<Vec<String>>,
}

impl FakeEnv {
    pub(crate) fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    fn record(&self, event: String) {
        self.journal.borrow_mut().push(event);
    }
}

fn normalize(path: &str) -> String {
    let mut path = path.replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

impl Environment for FakeEnv {
    fn install_polyfills(&self) -> Result<(), RenderError> {
        self.record("polyfills".to_string());
        Ok(())
    }

    fn inject_global(&self, name: &str, value: &Value) -> Result<(), RenderError> {
        self.record(format!("global {name}"));
        self.globals.borrow_mut().insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove_global(&self, name: &str) -> Result<(), RenderError> {
        self.record(format!("unset {name}"));
        self.globals.borrow_mut().remove(name);
        Ok(())
    }

    fn load_source(&self, identifier: &str, source: &str) -> Result<(), RenderError> {
        self.record(format!("load {identifier}"));
        if source.contains(FAIL_MARKER) {
            return Err(RenderError::PackageLoad {
                identifier: identifier.to_string(),
                message: "Exception: load failed".to_string(),
                traceback: String::new(),
            });
        }
        self.entries.borrow_mut().push(normalize(identifier));
        Ok(())
    }

    fn invoke(&self, entry: &str, input: &Value) -> Result<Invocation, RenderError> {
        let path = normalize(entry);
        if !self.entries.borrow().contains(&path) {
            return Err(RenderError::EntryNotFound {
                path: entry.to_string(),
            });
        }
        if input.get("panic").and_then(Value::as_bool) == Some(true) {
            panic!("component panicked");
        }
        if input.get("explode").and_then(Value::as_bool) == Some(true) {
            return Err(RenderError::Execution {
                entry: entry.to_string(),
                message: "explode requested".to_string(),
                traceback: String::new(),
            });
        }

        let attrs: String = self
            .globals
            .borrow()
            .iter()
            .map(|(name, value)| {
                let value = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                format!(" {name}=\"{value}\"")
            })
            .collect();
        Ok(Invocation {
            markup: format!("<{path}{attrs}>{input}</{path}>"),
            style: StyleOutput::default(),
        })
    }
}
