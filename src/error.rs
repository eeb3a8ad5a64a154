use thiserror::Error;

use crate::script::ScriptError;

pub type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Error, Debug)]
pub enum TemplateError {
    /// A rule's compile-time work failed (pre-evaluate body, style hoisting).
    #[error("Template '{template_id}' failed to compile: {message}")]
    Compile { template_id: String, message: String },

    /// The generated template function does not parse.
    #[error(
        "Syntax error in template '{template_id}' at line {line}, column {column}: {message}\n  {source_line}"
    )]
    Syntax {
        template_id: String,
        line: usize,
        column: usize,
        message: String,
        source_line: String,
    },

    #[error("Template '{template_id}' failed to render: {message} (data: {data})")]
    Render {
        template_id: String,
        message: String,
        data: String,
        /// 1-based line of the failing statement in `source`.
        line: Option<usize>,
        /// Generated function body of the template, when the failure came from it.
        r#source: Option<String>,
    },

    #[error("Directive '{rule}' in template '{template_id}' failed: {message}")]
    Directive {
        template_id: String,
        rule: String,
        message: String,
    },

    #[error("Lazy binding '{rule}' in template '{template_id}' failed at index {index}: {message}")]
    LazyBinding {
        template_id: String,
        rule: String,
        index: usize,
        message: String,
    },

    #[error("Callback '{name}' for '{template_id}' failed: {message}")]
    Callback {
        template_id: String,
        name: String,
        message: String,
    },

    #[error("Invalid rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("Failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl TemplateError {
    pub fn directive(template_id: &str, rule: &str, message: impl ToString) -> Self {
        TemplateError::Directive {
            template_id: template_id.to_string(),
            rule: rule.to_string(),
            message: message.to_string(),
        }
    }

    pub fn lazy(template_id: &str, rule: &str, index: usize, message: impl ToString) -> Self {
        TemplateError::LazyBinding {
            template_id: template_id.to_string(),
            rule: rule.to_string(),
            index,
            message: message.to_string(),
        }
    }

    pub fn callback(template_id: &str, name: &str, message: impl ToString) -> Self {
        TemplateError::Callback {
            template_id: template_id.to_string(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}
