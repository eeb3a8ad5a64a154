//! Embedded interpreter for directive bodies.
//!
//! Templates compile into JavaScript functions, parsed with `oxc_parser` and run by
//! a tree-walking evaluator over the `oxc` syntax tree.
//! Everything a template can see is bound explicitly by the caller: the template
//! parameters (`data`, `status`, `component`, `i18n`, `co`, `templates`) plus a
//! fixed set of builtins. There is no ambient host access.

pub mod builtins;
pub mod interp;
pub mod source;
pub mod value;

use thiserror::Error;

pub use interp::{Interp, Scope};
pub use source::FunctionCode;
pub use value::{NativeFn, Value};

#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (at offset {pos})")]
    Syntax { pos: usize, message: String },

    #[error("ReferenceError: {0}")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    /// A value raised by a `throw` statement, rendered for display.
    #[error("Uncaught {0}")]
    Thrown(String),

    /// An engine operation invoked from script failed.
    #[error("{0}")]
    Host(String),
}

impl ScriptError {
    pub fn syntax(pos: usize, message: impl Into<String>) -> Self {
        ScriptError::Syntax {
            pos,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::Type(message.into())
    }

    pub fn reference(name: &str) -> Self {
        ScriptError::Reference(format!("{} is not defined", name))
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            ScriptError::Syntax { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}

impl From<crate::error::TemplateError> for ScriptError {
    fn from(err: crate::error::TemplateError) -> Self {
        match err {
            crate::error::TemplateError::Script(inner) => inner,
            other => ScriptError::Host(other.to_string()),
        }
    }
}
