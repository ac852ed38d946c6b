//! `runic`: a lightweight, embeddable scripting language.
//!
//! A program is lexed, parsed into an AST and constant-folded, compiled to a
//! flat bytecode buffer, then executed by a stack-and-activation-record
//! virtual machine. Hosts embed it through [`Engine`]: register Rust
//! functions scripts can call, run source, and read results back out.
//!
//! ```
//! use runic::Engine;
//!
//! let mut engine = Engine::new();
//! let output = engine.capture("print(\"hello\", 1 + 2)").unwrap();
//! assert_eq!(output.lines, vec!["hello 3".to_string()]);
//! ```

mod ast;
mod builtins;
mod bytecode;
mod compiler;
mod diagnostic;
mod error;
mod host;
mod lexer;
mod operators;
mod parser;
mod sandbox;
mod value;
mod vm;

pub use diagnostic::{Diagnostic, Label, Span};
pub use error::{Error, Result};
pub use host::{HostContext, Signature};
pub use sandbox::{Engine, Output};
pub use value::Value;
pub use vm::{Limits, VmState};

/// Parses and compiles `source` without executing it, returning rich
/// [`Diagnostic`]s on failure instead of a plain [`Error`]. Useful for
/// editor tooling that wants caret-annotated messages before a script is
/// ever run.
pub fn check(source: &str) -> std::result::Result<(), Diagnostic> {
    let host = host::HostRegistry::new();
    compiler::compile(source, &host).map(|_| ()).map_err(|e| Diagnostic::from_error(&e, source))
}
