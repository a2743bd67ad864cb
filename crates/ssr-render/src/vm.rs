//! RustPython-backed execution environments.
//!
//! Every [`PyEnvironment`] owns its own `Interpreter`, so builtins, `sys` and
//! module state are never shared between environments. Inside an interpreter
//! all package code runs in one persistent scope; packages communicate through
//! the globals they define there and through the module registry installed by
//! the runtime prelude.
//!
//! # Scope layout
//!
//! The prelude binds these names in the shared scope before any package runs:
//!
//! - `define(path)`: decorator registering a component under a module path
//! - `require(path)`: fetch a registered component, raising if absent
//! - `StyleSheet.create({...})` and `css(*styles)`: scoped style rules
//!
//! Module paths are normalized (`\` becomes `/`, leading `./` is dropped) so
//! `"./components/a.py"` and `"components\\a.py"` name the same module.
//!
//! # Output
//!
//! `sys.stdout` and `sys.stderr` are replaced with line-buffered writers that
//! log through `tracing` (target `ssr_render::console`). Nothing package code
//! prints reaches the process's real stdout.
//!
//! This file contains no `unsafe` code.

use rustpython_vm::{
    builtins::PyBaseExceptionRef, compiler::Mode, function::FuncArgs, scope::Scope, AsObject,
    Interpreter, PyObjectRef, PyResult, VirtualMachine,
};
use serde_json::Value;

use crate::environment::{Environment, EnvironmentFactory, Invocation};
use crate::error::RenderError;
use crate::output::{ConsoleLog, ConsoleStream, StyleBuffer};

/// `__name__` of the shared package scope.
const SCOPE_NAME: &str = "__ssr__";

/// Global holding the module registry object.
const REGISTRY_NAME: &str = "__ssr_modules__";

/// Native hook called by `css(...)`.
const STYLE_HOOK_NAME: &str = "__ssr_inject_style__";

/// Shims installed into `builtins` when the interpreter lacks them.
const POLYFILLS: &str = r#"
import builtins
import sys


def includes(collection, item, start=0):
    if isinstance(collection, str):
        return str(item) in collection[start:]
    items = list(collection)
    if start < 0:
        start = max(len(items) + start, 0)
    for candidate in items[start:]:
        if candidate == item:
            return True
        if candidate != candidate and item != item:
            return True
    return False


def assign(target, *sources):
    if target is None:
        raise TypeError("cannot assign to None")
    for source in sources:
        if source is not None:
            target.update(source)
    return target


class _Console:
    def log(self, *args):
        print(*args)

    info = log
    debug = log

    def warn(self, *args):
        print(*args, file=sys.stderr)

    error = warn


for _name, _value in (("includes", includes), ("assign", assign), ("console", _Console())):
    if not hasattr(builtins, _name):
        setattr(builtins, _name, _value)
"#;

/// Module registry, styling and entry helpers, run in the shared scope.
const PRELUDE: &str = r#"
class _ModuleRegistry:
    def __init__(self):
        self._modules = {}

    @staticmethod
    def normalize(path):
        path = str(path).replace("\\", "/")
        while path.startswith("./"):
            path = path[2:]
        return path

    def define(self, path):
        key = self.normalize(path)

        def register(component):
            self._modules[key] = component
            return component

        return register

    def require(self, path):
        key = self.normalize(path)
        if key not in self._modules:
            raise ImportError("module is not defined: " + key)
        return self._modules[key]

    def lookup(self, path):
        return self._modules.get(self.normalize(path))

    def invoke(self, component, props):
        return component(props)

    def non_markup_type(self, value):
        if isinstance(value, str):
            return None
        return type(value).__name__


__ssr_modules__ = _ModuleRegistry()
define = __ssr_modules__.define
require = __ssr_modules__.require


def _kebab(name):
    out = []
    for ch in str(name):
        if ch == "_":
            out.append("-")
        elif ch.isupper():
            out.append("-" + ch.lower())
        else:
            out.append(ch)
    return "".join(out)


class _Style:
    def __init__(self, name, body):
        self.name = name
        self.body = body


class _Sheet(dict):
    def __getattr__(self, name):
        try:
            return self[name]
        except KeyError:
            raise AttributeError(name)


class StyleSheet:
    @staticmethod
    def create(definitions):
        sheet = _Sheet()
        for name, declarations in definitions.items():
            body = "".join(
                _kebab(prop) + ":" + str(value) + " !important;"
                for prop, value in declarations.items()
            )
            sheet[name] = _Style(name, body)
        return sheet


def css(*styles):
    names = []
    for style in styles:
        if not style:
            continue
        names.append(__ssr_inject_style__(style.name, style.body))
    return " ".join(names)
"#;

// ── Factory ──────────────────────────────────────────────────────────────────

/// Creates one fresh RustPython interpreter per environment.
#[derive(Debug, Clone)]
pub struct PyEnvironmentFactory {
    search_paths: Vec<String>,
}

impl PyEnvironmentFactory {
    /// A factory whose interpreters can import the host's pure-Python stdlib,
    /// when one is installed.
    pub fn new() -> Self {
        Self {
            search_paths: python_stdlib_paths(),
        }
    }
}

impl Default for PyEnvironmentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentFactory for PyEnvironmentFactory {
    type Env = PyEnvironment;

    fn new_environment(&self) -> Result<PyEnvironment, RenderError> {
        let mut settings = rustpython_vm::Settings::default();
        settings.path_list.extend(self.search_paths.iter().cloned());

        let interp = Interpreter::with_init(settings, |vm| {
            vm.add_native_modules(rustpython_stdlib::get_module_inits());
        });

        let styles = StyleBuffer::new();
        let stdout = ConsoleLog::new(ConsoleStream::Stdout);
        let stderr = ConsoleLog::new(ConsoleStream::Stderr);

        let scope = interp.enter(|vm| -> Result<Scope, RenderError> {
            vm.sys_module
                .set_attr("stdout", build_writer_object(vm, stdout.clone()), vm)
                .and_then(|()| {
                    vm.sys_module
                        .set_attr("stderr", build_writer_object(vm, stderr.clone()), vm)
                })
                .map_err(|exc| describe_exception(vm, &exc).into_environment_error())?;

            let scope = vm.new_scope_with_builtins();
            let hook = build_style_hook(vm, styles.clone());
            scope
                .globals
                .set_item("__name__", vm.ctx.new_str(SCOPE_NAME).into(), vm)
                .and_then(|()| scope.globals.set_item(STYLE_HOOK_NAME, hook, vm))
                .map_err(|exc| describe_exception(vm, &exc).into_environment_error())?;

            exec_source(vm, &scope, PRELUDE, "<ssr-prelude>")
                .map_err(ExecFailure::into_environment_error)?;
            Ok(scope)
        })?;

        Ok(PyEnvironment {
            interp,
            scope,
            styles,
            stdout,
            stderr,
        })
    }
}

// ── Environment ──────────────────────────────────────────────────────────────

/// An isolated interpreter with a persistent package scope.
pub struct PyEnvironment {
    interp: Interpreter,
    scope: Scope,
    styles: StyleBuffer,
    stdout: ConsoleLog,
    stderr: ConsoleLog,
}

impl PyEnvironment {
    fn flush_console(&self) {
        self.stdout.flush();
        self.stderr.flush();
    }

    fn registry(&self, vm: &VirtualMachine) -> Result<PyObjectRef, RenderError> {
        self.scope
            .globals
            .get_item(REGISTRY_NAME, vm)
            .map_err(|exc| describe_exception(vm, &exc).into_environment_error())
    }

    fn call_entry(&self, vm: &VirtualMachine, entry: &str, input: &Value) -> Result<String, RenderError> {
        let registry = self.registry(vm)?;
        let raised = |exc: PyBaseExceptionRef| describe_exception(vm, &exc).into_execution_error(entry);

        let component = vm
            .call_method(&registry, "lookup", (vm.ctx.new_str(entry),))
            .map_err(raised)?;
        if vm.is_none(&component) {
            return Err(RenderError::EntryNotFound {
                path: entry.to_owned(),
            });
        }

        let props = json_to_py(vm, input)
            .map_err(|exc| describe_exception(vm, &exc).into_environment_error())?;
        let result = vm
            .call_method(&registry, "invoke", (component, props))
            .map_err(raised)?;

        let found = vm
            .call_method(&registry, "non_markup_type", (result.clone(),))
            .map_err(raised)?;
        if !vm.is_none(&found) {
            let found = found
                .str(vm)
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();
            return Err(RenderError::InvalidMarkup {
                entry: entry.to_owned(),
                found,
            });
        }

        result
            .str(vm)
            .map(|s| s.as_str().to_owned())
            .map_err(raised)
    }
}

impl Environment for PyEnvironment {
    fn install_polyfills(&self) -> Result<(), RenderError> {
        self.interp.enter(|vm| {
            // Throwaway scope: only the builtins it sets survive.
            let scratch = vm.new_scope_with_builtins();
            exec_source(vm, &scratch, POLYFILLS, "<ssr-polyfills>")
                .map_err(ExecFailure::into_environment_error)
        })
    }

    fn inject_global(&self, name: &str, value: &Value) -> Result<(), RenderError> {
        self.interp.enter(|vm| {
            json_to_py(vm, value)
                .and_then(|obj| self.scope.globals.set_item(name, obj, vm))
                .map_err(|exc| describe_exception(vm, &exc).into_environment_error())
        })
    }

    fn remove_global(&self, name: &str) -> Result<(), RenderError> {
        self.interp.enter(|vm| {
            let globals = &self.scope.globals;
            globals
                .get_item_opt(name, vm)
                .and_then(|bound| match bound {
                    Some(_) => globals.del_item(name, vm),
                    None => Ok(()),
                })
                .map_err(|exc| describe_exception(vm, &exc).into_environment_error())
        })
    }

    fn load_source(&self, identifier: &str, source: &str) -> Result<(), RenderError> {
        let result = self.interp.enter(|vm| {
            exec_source(vm, &self.scope, source, identifier)
                .map_err(|failure| failure.into_load_error(identifier))
        });
        self.flush_console();
        result
    }

    fn invoke(&self, entry: &str, input: &Value) -> Result<Invocation, RenderError> {
        self.styles.reset();
        let result = self.interp.enter(|vm| self.call_entry(vm, entry, input));
        self.flush_console();
        let markup = result.inspect_err(|_| self.styles.reset())?;
        Ok(Invocation {
            markup,
            style: self.styles.take(),
        })
    }
}

// ── Private helpers ──────────────────────────────────────────────────────────

/// Common locations of a host Python 3 stdlib. Native modules from
/// `rustpython_stdlib` shadow any extension modules found there.
fn python_stdlib_paths() -> Vec<String> {
    let candidates = [
        "/usr/local/lib/python3.12",
        "/usr/local/lib/python3.11",
        "/usr/lib/python3.12",
        "/usr/lib/python3.11",
        "/usr/lib/python3",
    ];
    candidates
        .iter()
        .filter(|p| std::path::Path::new(p).is_dir())
        .map(|p| p.to_string())
        .collect()
}

/// A failed compile or run, already rendered to strings.
#[derive(Debug)]
enum ExecFailure {
    Syntax { message: String, line: u32, col: u32 },
    Raised { message: String, traceback: String },
}

impl ExecFailure {
    fn into_load_error(self, identifier: &str) -> RenderError {
        match self {
            ExecFailure::Syntax { message, line, col } => RenderError::Syntax {
                identifier: identifier.to_owned(),
                message,
                line,
                col,
            },
            ExecFailure::Raised { message, traceback } => RenderError::PackageLoad {
                identifier: identifier.to_owned(),
                message,
                traceback,
            },
        }
    }

    fn into_execution_error(self, entry: &str) -> RenderError {
        match self {
            ExecFailure::Syntax { message, .. } => RenderError::Execution {
                entry: entry.to_owned(),
                message,
                traceback: String::new(),
            },
            ExecFailure::Raised { message, traceback } => RenderError::Execution {
                entry: entry.to_owned(),
                message,
                traceback,
            },
        }
    }

    fn into_environment_error(self) -> RenderError {
        match self {
            ExecFailure::Syntax { message, .. } => RenderError::environment(message),
            ExecFailure::Raised { message, traceback } => {
                RenderError::environment(format!("{message}\n{traceback}"))
            }
        }
    }
}

fn exec_source(
    vm: &VirtualMachine,
    scope: &Scope,
    source: &str,
    filename: &str,
) -> Result<(), ExecFailure> {
    let code = vm
        .compile(source, Mode::Exec, filename.to_owned())
        .map_err(|err| {
            let (row, col) = err.python_location();
            ExecFailure::Syntax {
                message: err.to_string(),
                line: row as u32,
                col: col as u32,
            }
        })?;
    vm.run_code_obj(code, scope.clone())
        .map(drop)
        .map_err(|exc| describe_exception(vm, &exc))
}

/// Message via `str(exc)`, plus the formatted traceback.
fn describe_exception(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> ExecFailure {
    let message = exc
        .as_object()
        .str(vm)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|_| "unknown error".to_owned());
    let mut traceback = String::new();
    let _ = vm.write_exception(&mut traceback, exc);
    ExecFailure::Raised { message, traceback }
}

/// Convert JSON input into plain Python values: dicts, lists, str, int,
/// float, bool and None.
fn json_to_py(vm: &VirtualMachine, value: &Value) -> PyResult<PyObjectRef> {
    let obj = match value {
        Value::Null => vm.ctx.none(),
        Value::Bool(b) => vm.ctx.new_bool(*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                vm.ctx.new_int(i).into()
            } else if let Some(u) = n.as_u64() {
                vm.ctx.new_int(u).into()
            } else {
                vm.ctx.new_float(n.as_f64().unwrap_or(f64::NAN)).into()
            }
        }
        Value::String(s) => vm.ctx.new_str(s.as_str()).into(),
        Value::Array(items) => {
            let elements = items
                .iter()
                .map(|item| json_to_py(vm, item))
                .collect::<PyResult<Vec<_>>>()?;
            vm.ctx.new_list(elements).into()
        }
        Value::Object(map) => {
            let dict = vm.ctx.new_dict();
            for (key, item) in map {
                dict.set_item(key.as_str(), json_to_py(vm, item)?, vm)?;
            }
            dict.into()
        }
    };
    Ok(obj)
}

/// The native half of `css(...)`: records a rule and returns its class name.
fn build_style_hook(vm: &VirtualMachine, styles: StyleBuffer) -> PyObjectRef {
    vm.new_function(
        STYLE_HOOK_NAME,
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let key = string_arg(&args, 0, vm)?;
            let body = string_arg(&args, 1, vm)?;
            Ok(vm.ctx.new_str(styles.inject(&key, &body)).into())
        },
    )
    .into()
}

fn string_arg(args: &FuncArgs, index: usize, vm: &VirtualMachine) -> PyResult<String> {
    let obj = args.args.get(index).ok_or_else(|| {
        vm.new_type_error(format!("{STYLE_HOOK_NAME}() takes 2 arguments"))
    })?;
    Ok(obj.str(vm)?.as_str().to_owned())
}

/// Build a minimal file-like object with `write(s)` and `flush()` that feeds
/// a [`ConsoleLog`].
fn build_writer_object(vm: &VirtualMachine, log: ConsoleLog) -> PyObjectRef {
    let flush_log = log.clone();

    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();
            Ok(vm.ctx.new_int(log.write(&data)).into())
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            flush_log.flush();
            Ok(vm.ctx.none())
        },
    );

    // A module works as a writable namespace for the two callables.
    let ns = vm.new_module("<writer>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}

// ── Tests ────────────────────────────────────────────────────────────────────
