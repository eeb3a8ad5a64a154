//! Template compiler.
//!
//! Wraps the parser output in a function with a fixed parameter list and checks
//! that it parses. The function code is shared by every render of the template;
//! renders never mutate it.

use std::rc::Rc;
use std::time::Instant;

use tracing::{error, info};

use crate::cache::compute_hash;
use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::matcher::Matcher;
use crate::parse::parse_template;
use crate::rules::CompileContext;
use crate::script::{FunctionCode, ScriptError};

/// Parameter list of every compiled template function.
pub const TEMPLATE_PARAMS: [&str; 8] = [
    "data",
    "status",
    "component",
    "i18n",
    "co",
    "templates",
    "__lazy",
    "__debug",
];

const PROLOGUE: &str = "let __out = '';\n";
const EPILOGUE: &str = "\nreturn __out;";

#[derive(Debug)]
pub struct CompiledTemplate {
    pub id: String,
    pub function: Rc<FunctionCode>,
    /// Matcher whose lazy rules consume this template's payloads.
    pub matcher: Rc<Matcher>,
    /// sha256 of the template text.
    pub hash: String,
    /// Generated source, kept in debug mode.
    pub source: Option<String>,
    /// Template text, kept in debug mode.
    pub text: Option<String>,
    /// The generated function failed to parse and was replaced by an empty body.
    pub degraded: bool,
}

/// Generated function body (prologue, parser output, epilogue).
pub fn generate_source(text: &str, matcher: &Matcher, cx: &mut CompileContext) -> Result<String> {
    let body = parse_template(text, matcher, cx)?;
    Ok(format!("{}{}{}", PROLOGUE, body, EPILOGUE))
}

/// Compile `text` as template `id` without registering it.
pub fn compile(
    engine: &Engine,
    id: &str,
    text: &str,
    matcher: Rc<Matcher>,
) -> Result<CompiledTemplate> {
    let started = Instant::now();
    let config = engine.config();
    let mut cx = CompileContext::new(engine, id);

    let source = generate_source(text, &matcher, &mut cx)?;
    let (function, degraded) = match FunctionCode::compile(id, &TEMPLATE_PARAMS, &source) {
        Ok(function) => (function, false),
        Err(e) => {
            let diagnostic = diagnose(id, &source, &e);
            error!(template_id = %id, error = %diagnostic, "generated template function does not parse");
            if config.throw_error {
                return Err(diagnostic);
            }
            (empty_function(id)?, true)
        }
    };

    if config.print_exec_time {
        info!(
            template_id = %id,
            elapsed_us = started.elapsed().as_micros() as u64,
            "compiled"
        );
    }

    Ok(CompiledTemplate {
        id: id.to_string(),
        function,
        matcher,
        hash: compute_hash(text),
        source: config.debug.then_some(source),
        text: config.debug.then(|| text.to_string()),
        degraded,
    })
}

/// Function that renders nothing.
fn empty_function(id: &str) -> Result<Rc<FunctionCode>> {
    FunctionCode::compile(id, &TEMPLATE_PARAMS, "return '';").map_err(TemplateError::from)
}

/// Map a parse error of the generated source to line, column and offending line.
pub fn diagnose(id: &str, source: &str, err: &ScriptError) -> TemplateError {
    let offset = err.position().unwrap_or(0).min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    let source_line = source[line_start..]
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    let message = match err {
        ScriptError::Syntax { message, .. } => message.clone(),
        other => other.to_string(),
    };
    TemplateError::Syntax {
        template_id: id.to_string(),
        line,
        column,
        message,
        source_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_generated_source_shape() {
        let engine = Engine::new(Config::default());
        let mut cx = CompileContext::new(&engine, "t");
        let source = generate_source("<p>##= data.name ##</p>", &Matcher::standard(), &mut cx)
            .unwrap();
        assert_eq!(
            source,
            "let __out = '';\n__out += '<p>';\n__out += __interp((data.name));\n__out += '</p>';\n\nreturn __out;"
        );
    }

    #[test]
    fn test_diagnose_points_at_generated_line() {
        let source = "let __out = '';\nif (x {\nreturn __out;";
        let err = ScriptError::syntax(22, "Expected ')'");
        match diagnose("bad", source, &err) {
            TemplateError::Syntax {
                line,
                column,
                source_line,
                ..
            } => {
                assert_eq!(line, 2);
                assert_eq!(column, 7);
                assert_eq!(source_line, "if (x {");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_best_effort_compile_degrades_to_empty_body() {
        let engine = Engine::new(Config::default());
        let compiled = compile(&engine, "broken", "## if ( ##<p>x</p>", Matcher::standard())
            .unwrap();
        assert!(compiled.degraded);
        let strict = Engine::new(Config::strict());
        let err = compile(&strict, "broken", "## if ( ##<p>x</p>", Matcher::standard())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { ref template_id, .. } if template_id == "broken"));
    }
}
