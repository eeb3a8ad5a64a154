//! Template Parser
//!
//! Turns template text into the body of the render function. Text between
//! directives becomes `__out += '<literal>';` statements; every directive match is
//! handed to the rule that owns its capture group.

use tracing::{error, trace};

use crate::error::Result;
use crate::escape::escape_literal;
use crate::matcher::Matcher;
use crate::rules::CompileContext;

/// Generated code for `text`, without prologue or epilogue.
pub fn parse_template(text: &str, matcher: &Matcher, cx: &mut CompileContext) -> Result<String> {
    let mut code = String::new();
    let mut cursor = 0;

    for captures in matcher.regex().captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_literal(&mut code, &text[cursor..whole.start()]);
        cursor = whole.end();

        // Exactly one group participates in a match of the alternation.
        let Some((group, captured)) = captures
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(i, m)| m.map(|m| (i, m.as_str())))
        else {
            continue;
        };
        let Some(rule) = matcher.rule_for_group(group) else {
            continue;
        };

        trace!(template_id = %cx.template_id, rule = rule.name(), "directive");
        match rule.exec(captured, cx) {
            Ok(fragment) => code.push_str(&fragment),
            Err(e) => {
                error!(
                    template_id = %cx.template_id,
                    rule = rule.name(),
                    error = %e,
                    "directive failed at compile time"
                );
                if cx.strict {
                    return Err(e);
                }
            }
        }
    }

    push_literal(&mut code, &text[cursor..]);
    Ok(code)
}

fn push_literal(code: &mut String, literal: &str) {
    if literal.is_empty() {
        return;
    }
    code.push_str("__out += '");
    code.push_str(&escape_literal(literal));
    code.push_str("';\n");
}
