//! [`Engine`]: the embedding facade. Everything a host program needs —
//! compiling, running, registering its own functions, reading back globals —
//! goes through one of these instead of touching [`crate::compiler`] or
//! [`crate::vm`] directly.
//!
//! # Example
//!
//! ```
//! use runic::Engine;
//!
//! let mut engine = Engine::new();
//! engine.run("post(\"x\", 1 + 2)").unwrap();
//! assert_eq!(engine.get("x").unwrap().as_number(), Some(3.0));
//! ```

use crate::error::Result;
use crate::host::{HostContext, HostRegistry, Signature};
use crate::value::Value;
use crate::vm::{Limits, Vm};

/// The result of [`Engine::capture`]: whatever the program printed via the
/// built-in `print` function, collected instead of routed to a real sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub lines: Vec<String>,
}

/// An isolated script runtime: one [`Vm`] plus the [`HostRegistry`] of
/// functions scripts it runs are allowed to call.
pub struct Engine {
    vm: Vm,
    host: HostRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// A fresh engine with nothing but the built-ins registered (`print`,
    /// `post`, `get`, `len`, `append`, `remove`, `assert`, `dump`, `str`,
    /// `join`, `error`).
    pub fn new() -> Self {
        Engine {
            vm: Vm::new(),
            host: HostRegistry::new(),
        }
    }

    /// Registers a single host function under `name`. `max_args < 0` means
    /// unbounded, matching the built-in `print`/`join`.
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        min_args: i32,
        max_args: i32,
        f: impl Fn(&[Value], &mut HostContext) -> Result<Value> + 'static,
    ) {
        let sig = signature(min_args, max_args);
        self.host.register_fn(name, sig, f);
    }

    /// Registers a table of related functions against one dispatch closure,
    /// distinguished by the `function_id` each entry carries. `entries` is
    /// `(name, function_id, min_args, max_args)`.
    pub fn register_host_group(
        &mut self,
        entries: &[(&str, u8, i32, i32)],
        f: impl Fn(u8, &[Value], &mut HostContext) -> Result<Value> + 'static,
    ) {
        let table: Vec<(&str, u8, Signature)> = entries
            .iter()
            .map(|(name, function_id, min, max)| (*name, *function_id, signature(*min, *max)))
            .collect();
        self.host.register_group(&table, f);
    }

    /// Caps the instruction count and/or call-stack depth a subsequent
    /// [`Engine::run`]/[`Engine::capture`]/[`Engine::call`] is allowed to
    /// spend, returning an error instead of looping or recursing forever.
    pub fn set_limits(&mut self, limits: Limits) {
        self.vm.set_limits(limits);
    }

    /// Compiles and runs `source` to completion. Printed output goes to the
    /// engine's internal buffer (drain it with [`Engine::take_output`], or
    /// use [`Engine::capture`] to get it back directly).
    ///
    /// There is no "value of the program": a program is a block of
    /// statements, not a single expression, and statements other than a bare
    /// expression (assignments, loops, function definitions) have no result
    /// worth surfacing. Read globals back with [`Engine::get`] instead.
    pub fn run(&mut self, source: &str) -> Result<()> {
        let bytecode = crate::compiler::compile(source, &self.host)?;
        self.vm.load(bytecode)?;
        self.vm.run(&self.host)
    }

    /// Runs `source` and returns everything it printed, instead of leaving it
    /// in the engine's internal buffer.
    pub fn capture(&mut self, source: &str) -> Result<Output> {
        self.vm.take_output();
        self.run(source)?;
        Ok(Output {
            lines: self.vm.take_output(),
        })
    }

    /// Drains and returns whatever `print` has accumulated since the last
    /// call to this method.
    pub fn take_output(&mut self) -> Vec<String> {
        self.vm.take_output()
    }

    /// Calls a script-defined function value from host code, as if a script
    /// had called it — used to invoke a callback a script handed to a host
    /// function via `post`/an argument.
    pub fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value> {
        self.vm.call_script_function(function, args, &self.host)
    }

    /// Sets a global the way the script-visible `post(name, value)` does.
    pub fn post(&mut self, name: impl Into<String>, value: Value) {
        self.vm.post(name.into(), value);
    }

    /// Reads a global the way the script-visible `get(name)` does, erroring
    /// the same way if it has never been set.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.vm.get_global(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.vm.has_global(name)
    }

    pub fn undefine(&mut self, name: &str) {
        self.vm.undefine_global(name);
    }
}

fn signature(min_args: i32, max_args: i32) -> Signature {
    if max_args < 0 {
        Signature::at_least(min_args)
    } else {
        Signature::range(min_args, max_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_and_get_round_trip_a_value() {
        let mut engine = Engine::new();
        engine.post("x", Value::Number(41.0));
        assert_eq!(engine.get("x").unwrap(), Value::Number(41.0));
    }

    #[test]
    fn capture_collects_printed_output() {
        let mut engine = Engine::new();
        let output = engine.capture("print(\"hi\", 1 + 1)").unwrap();
        assert_eq!(output.lines, vec!["hi 2".to_string()]);
    }

    #[test]
    fn get_of_an_undefined_global_is_an_error() {
        let engine = Engine::new();
        assert!(engine.get("missing").is_err());
        assert!(!engine.has("missing"));
    }

    #[test]
    fn a_registered_host_function_is_callable_from_script() {
        let mut engine = Engine::new();
        engine.register_fn("double", 1, 1, |args, _ctx| {
            Ok(Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0))
        });
        let output = engine.capture("print(double(21))").unwrap();
        assert_eq!(output.lines, vec!["42".to_string()]);
    }

    #[test]
    fn calling_back_into_a_script_function_from_the_host() {
        let mut engine = Engine::new();
        engine.run("def add_one(n)\n return n + 1\nend\npost(\"add_one\", add_one)\n").unwrap();
        let f = engine.get("add_one").unwrap();
        let result = engine.call(&f, &[Value::Number(9.0)]).unwrap();
        assert_eq!(result, Value::Number(10.0));
    }
}
