//! Host-function calling convention: an integer `(group, function)` pair maps
//! to a registered Rust closure. The compiler checks arity against
//! [`Signature`] at compile time; the VM dispatches by `(group, function)` at
//! `CALL_HF`.
//!
//! Built-in functions (`print`, `post`, `get`, `len`, `append`, `remove`,
//! `assert`, `dump`, `str`, `join`, `error`) all live in group 0. Every
//! function an embedder registers via `Engine::register_fn` gets its own
//! single-function group, so `CALL_HF` addressing is uniform either way.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Compile-time arity contract for a host function. `max_args = -1` means
/// unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub min_args: i32,
    pub max_args: i32,
}

impl Signature {
    pub const fn exact(n: i32) -> Self {
        Signature {
            min_args: n,
            max_args: n,
        }
    }

    pub const fn range(min: i32, max: i32) -> Self {
        Signature {
            min_args: min,
            max_args: max,
        }
    }

    pub const fn at_least(min: i32) -> Self {
        Signature {
            min_args: min,
            max_args: -1,
        }
    }

    pub fn accepts(&self, n: usize) -> bool {
        let n = n as i32;
        n >= self.min_args && (self.max_args == -1 || n <= self.max_args)
    }

    pub fn describe(&self) -> String {
        if self.max_args == -1 {
            format!("at least {} argument(s)", self.min_args)
        } else if self.min_args == self.max_args {
            format!("exactly {} argument(s)", self.min_args)
        } else {
            format!("between {} and {} arguments", self.min_args, self.max_args)
        }
    }
}

/// Mutable state a host function can touch: the VM's print buffer and its
/// global-variable map (the `post`/`get` namespace, §6).
pub struct HostContext<'a> {
    pub globals: &'a mut HashMap<String, Value>,
    pub output: &'a mut Vec<String>,
}

pub type GroupFn = Rc<dyn Fn(&[Value], &mut HostContext) -> Result<Value>>;

/// Name -> (group id, function id, arity contract). The VM only needs
/// `(group, function)` to dispatch; the compiler only needs the name and
/// the signature.
#[derive(Default)]
pub struct HostRegistry {
    by_name: HashMap<String, (u8, u8, Signature)>,
    groups: Vec<Vec<GroupFn>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        let mut registry = HostRegistry {
            by_name: HashMap::new(),
            groups: vec![Vec::new()],
        };
        crate::builtins::register(&mut registry);
        registry
    }

    /// Registers `name` as function `function_id` of `group_id`. Intended
    /// for grouping several related builtins under one dispatch table; most
    /// callers want [`HostRegistry::register_fn`] instead.
    pub fn register_in_group(
        &mut self,
        name: impl Into<String>,
        group_id: u8,
        function_id: u8,
        sig: Signature,
        f: GroupFn,
    ) {
        while self.groups.len() <= group_id as usize {
            self.groups.push(Vec::new());
        }
        let group = &mut self.groups[group_id as usize];
        while group.len() <= function_id as usize {
            group.push(Rc::new(|_, _| Ok(Value::Nil)));
        }
        group[function_id as usize] = f;
        self.by_name.insert(name.into(), (group_id, function_id, sig));
    }

    /// Registers a brand new single-function group. Used for everything an
    /// embedder adds via `Engine::register_fn`.
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        sig: Signature,
        f: impl Fn(&[Value], &mut HostContext) -> Result<Value> + 'static,
    ) {
        let group_id = self.groups.len() as u8;
        self.groups.push(vec![Rc::new(f)]);
        self.by_name.insert(name.into(), (group_id, 0, sig));
    }

    /// Registers a whole table of names against one dispatch closure,
    /// distinguished by `function_id` — the idiom this codebase's own
    /// builtin group follows internally, exposed here for embedders that
    /// want several related host functions to share state via closures.
    pub fn register_group(
        &mut self,
        entries: &[(&str, u8, Signature)],
        f: impl Fn(u8, &[Value], &mut HostContext) -> Result<Value> + 'static,
    ) {
        let group_id = self.groups.len() as u8;
        self.groups.push(Vec::new());
        let shared = Rc::new(f);
        for (name, function_id, sig) in entries {
            let shared = shared.clone();
            let fid = *function_id;
            let wrapped: GroupFn = Rc::new(move |args, ctx| shared(fid, args, ctx));
            self.register_in_group(*name, group_id, fid, *sig, wrapped);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<(u8, u8, Signature)> {
        self.by_name.get(name).copied()
    }

    pub fn call(
        &self,
        group_id: u8,
        function_id: u8,
        args: &[Value],
        ctx: &mut HostContext,
    ) -> Result<Value> {
        let f = self
            .groups
            .get(group_id as usize)
            .and_then(|g| g.get(function_id as usize))
            .ok_or_else(|| Error::runtime("call to an unregistered host function"))?
            .clone();
        f(args, ctx)
    }
}
