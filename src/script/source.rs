//! Script text and its parsed form.
//!
//! Parsing goes through `oxc_parser`. A parsed tree borrows the arena it was built
//! in, so a function value keeps its source text instead of a tree and is parsed
//! again in a fresh [`Allocator`] whenever it runs.

use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast::{ArrowFunctionExpression, Expression, Function, Program, Statement};
use oxc_diagnostics::OxcDiagnostic;
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;

use super::ScriptError;

/// Source of a script function, wrapped so that it parses as one expression
/// statement: `(function (a, b) {...})` or `((x) => x)`.
#[derive(Debug)]
pub struct FunctionCode {
    pub name: Option<String>,
    pub text: Rc<str>,
    /// Offset of the first body character in `text`.
    pub body_start: usize,
}

impl FunctionCode {
    /// Build a function from a parameter list and a body, checking that it parses.
    /// Syntax error positions are relative to `body`.
    pub fn compile(name: &str, params: &[&str], body: &str) -> Result<Rc<Self>, ScriptError> {
        let header = format!("(function ({}) {{\n", params.join(", "));
        let text = format!("{}{}\n}})", header, body);
        {
            let allocator = Allocator::default();
            let program = parse_program(&allocator, &text).map_err(|e| rebase(e, header.len()))?;
            function_of(&program).map_err(|e| rebase(e, header.len()))?;
        }
        Ok(Rc::new(Self {
            name: Some(name.to_string()),
            text: Rc::from(text),
            body_start: header.len(),
        }))
    }

    /// A function nested in already parsed source. `slice` is the function's own text;
    /// method shorthand (`m() {...}`) gets its `function` keyword back.
    pub fn nested(name: Option<String>, slice: &str, method: bool) -> Rc<Self> {
        let slice = slice.trim();
        let text = if !method || slice.starts_with("function") {
            format!("({})", slice)
        } else if slice.starts_with('(') {
            format!("(function{})", slice)
        } else {
            format!("(function {})", slice)
        };
        Rc::new(Self {
            name,
            text: Rc::from(text),
            body_start: 1,
        })
    }

    /// The body text as written, without the wrapping header.
    pub fn body(&self) -> &str {
        let end = self.text.len().saturating_sub(3).max(self.body_start);
        self.text.get(self.body_start..end).unwrap_or_default()
    }

    /// 1-based line of `offset` (into `text`) counted from the start of the body.
    pub fn body_line(&self, offset: usize) -> usize {
        let offset = offset.saturating_sub(self.body_start);
        self.body()
            .get(..offset.min(self.body().len()))
            .map(|before| before.matches('\n').count() + 1)
            .unwrap_or(1)
    }
}

fn rebase(err: ScriptError, header: usize) -> ScriptError {
    match err {
        ScriptError::Syntax { pos, message } => ScriptError::Syntax {
            pos: pos.saturating_sub(header),
            message,
        },
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

fn source_type() -> SourceType {
    SourceType::default().with_module(false)
}

fn syntax_error(errors: &[OxcDiagnostic]) -> ScriptError {
    match errors.first() {
        Some(err) => {
            let pos = err
                .labels
                .as_ref()
                .and_then(|labels| labels.first())
                .map(|label| label.offset())
                .unwrap_or(0);
            ScriptError::syntax(pos, err.to_string())
        }
        None => ScriptError::syntax(0, "Unexpected token"),
    }
}

/// Parse a script. Top-level `return` is allowed.
pub fn parse_program<'a>(allocator: &'a Allocator, text: &'a str) -> Result<Program<'a>, ScriptError> {
    let options = ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    };
    let ret = Parser::new(allocator, text, source_type())
        .with_options(options)
        .parse();
    if ret.panicked || !ret.errors.is_empty() {
        return Err(syntax_error(&ret.errors));
    }
    Ok(ret.program)
}

pub fn parse_expression<'a>(
    allocator: &'a Allocator,
    text: &'a str,
) -> Result<Expression<'a>, ScriptError> {
    Parser::new(allocator, text, source_type())
        .parse_expression()
        .map_err(|errors| syntax_error(&errors))
}

pub enum FunctionNode<'p, 'a> {
    Function(&'p Function<'a>),
    Arrow(&'p ArrowFunctionExpression<'a>),
}

/// The function of a program made of a single (parenthesized) function expression.
pub fn function_of<'p, 'a>(program: &'p Program<'a>) -> Result<FunctionNode<'p, 'a>, ScriptError> {
    if program.body.len() == 1 {
        if let Some(Statement::ExpressionStatement(stmt)) = program.body.first() {
            let mut expr = &stmt.expression;
            while let Expression::ParenthesizedExpression(inner) = expr {
                expr = &inner.expression;
            }
            match expr {
                Expression::FunctionExpression(func) => return Ok(FunctionNode::Function(func)),
                Expression::ArrowFunctionExpression(arrow) => {
                    return Ok(FunctionNode::Arrow(arrow))
                }
                _ => {}
            }
        }
    }
    Err(ScriptError::syntax(0, "Unexpected token after function body"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_wraps_body_and_keeps_it() {
        let code = FunctionCode::compile("t", &["data", "co"], "return data.a").unwrap();
        assert_eq!(code.body(), "return data.a");
        assert_eq!(code.name.as_deref(), Some("t"));
        assert_eq!(code.body_line(code.body_start + 3), 1);
    }

    #[test]
    fn test_compile_reports_body_relative_offsets() {
        let err = FunctionCode::compile("t", &["data"], "let a = 1;\nif (a {").unwrap_err();
        match err {
            ScriptError::Syntax { pos, .. } => assert!((11..=18).contains(&pos), "pos {}", pos),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compile_rejects_escaping_bodies() {
        assert!(FunctionCode::compile("t", &[], "}); (function () {").is_err());
    }

    #[test]
    fn test_nested_restores_method_keyword() {
        let text = |slice: &str, method: bool| FunctionCode::nested(None, slice, method).text.clone();
        assert_eq!(&*text("m() { return 1 }", true), "(function m() { return 1 })");
        assert_eq!(&*text("(a) { return a }", true), "(function(a) { return a })");
        assert_eq!(&*text("x => x + 1", false), "(x => x + 1)");
        assert_eq!(&*text("function f() {}", false), "(function f() {})");
    }

    #[test]
    fn test_statements_without_semicolons_parse() {
        let allocator = Allocator::default();
        let program =
            parse_program(&allocator, "let a = 1\na += 2\nif (a > 2) { a++ } else a--\nreturn a")
                .unwrap();
        assert_eq!(program.body.len(), 4);
        assert!(matches!(program.body[2], Statement::IfStatement(_)));
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let allocator = Allocator::default();
        let err = parse_program(&allocator, "let x = {").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
        assert!(parse_expression(&allocator, "1 +").is_err());
        assert!(parse_program(&allocator, "1 = 2").is_err());
    }
}
