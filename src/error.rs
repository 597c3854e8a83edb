use std::fmt;

use serde::Serialize;

use crate::dsl::error::CompileError;
use crate::dsl::vm::RuntimeError;

/// Structured error type for hosts. Replaces stringly-typed errors so callers
/// can match on error codes and render them as they see fit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", content = "detail")]
pub enum ScriptError {
    Compile {
        kind: &'static str,
        source_id: Option<String>,
        /// 1-based position, present when the source text was at hand.
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },
    Runtime { message: String },
    NotFound { what: String },
    InvalidArgument { message: String },
    IoError { message: String },
    JsonError { message: String },
}

impl ScriptError {
    /// Convert a compile error, locating it in the text it was raised for.
    pub fn compile_in(err: CompileError, source: &str) -> Self {
        let (line, column) = err.line_col(source);
        ScriptError::Compile {
            kind: err.kind.label(),
            source_id: err.source_id,
            line: Some(line),
            column: Some(column),
            message: err.message,
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Compile {
                kind,
                source_id,
                line,
                column,
                message,
            } => {
                let source = source_id.as_deref().unwrap_or("<input>");
                match (line, column) {
                    (Some(line), Some(column)) => {
                        write!(f, "[{kind}] {source}:{line}:{column}: {message}")
                    }
                    _ => write!(f, "[{kind}] {source}: {message}"),
                }
            }
            ScriptError::Runtime { message } => write!(f, "Runtime error: {message}"),
            ScriptError::NotFound { what } => write!(f, "{what} not found"),
            ScriptError::InvalidArgument { message } => write!(f, "{message}"),
            ScriptError::IoError { message } => write!(f, "I/O error: {message}"),
            ScriptError::JsonError { message } => write!(f, "JSON error: {message}"),
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<std::io::Error> for ScriptError {
    fn from(e: std::io::Error) -> Self {
        ScriptError::IoError {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ScriptError {
    fn from(e: serde_json::Error) -> Self {
        ScriptError::JsonError {
            message: e.to_string(),
        }
    }
}

impl From<CompileError> for ScriptError {
    fn from(e: CompileError) -> Self {
        ScriptError::Compile {
            kind: e.kind.label(),
            source_id: e.source_id,
            line: None,
            column: None,
            message: e.message,
        }
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::UnknownSchema(name) => ScriptError::NotFound {
                what: format!("Schema `{name}`"),
            },
            RuntimeError::Arguments { .. } => ScriptError::InvalidArgument {
                message: e.to_string(),
            },
            other => ScriptError::Runtime {
                message: other.to_string(),
            },
        }
    }
}
