//! The single error type surfaced by every public entry point.

use thiserror::Error;

/// Everything that can go wrong while lexing, parsing, compiling, or running a
/// program.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("{line}:{column}: syntax error: unexpected {token_kind} '{lexeme}'")]
    Syntax {
        line: u32,
        column: u32,
        token_kind: &'static str,
        lexeme: String,
    },

    #[error("{line}: {message}")]
    Semantic { line: u32, message: String },

    #[error("{0}")]
    Runtime(String),

    #[error("undefined global variable '{0}'")]
    UndefinedGlobalVariable(String),

    #[error("bytecode version mismatch: program is version {found}, this build supports {supported}")]
    VersionMismatch { found: u32, supported: u32 },

    #[error("bad magic number in bytecode buffer")]
    BadMagic,

    #[error("instruction limit of {0} exceeded")]
    InstructionLimitExceeded(u64),

    #[error("recursion limit of {0} exceeded")]
    RecursionLimitExceeded(usize),
}

impl Error {
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// The source line this error points at, when it has one.
    pub fn line(&self) -> Option<u32> {
        match self {
            Error::Syntax { line, .. } => Some(*line),
            Error::Semantic { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
