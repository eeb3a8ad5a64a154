//! Combined directive matcher.
//!
//! Every rule contributes one alternative `(?:pattern)` to a single regex. Each
//! pattern owns exactly one capturing group, so capture group N belongs to rule N.
//! Alternation order is registration order, which makes earlier rules win when two
//! patterns match at the same position.

use lazy_static::lazy_static;
use regex::Regex;
use std::rc::Rc;
use tracing::warn;

use crate::error::{Result, TemplateError};
use crate::rules::{Rule, RuleSet};
use crate::script::Value;

/// Stand-in for rules without a pattern. Keeps group alignment, never matches.
pub const NEVER_MATCH: &str = r"(\b\B)";

lazy_static! {
    static ref NEVER_REGEX: Regex = Regex::new(NEVER_MATCH).unwrap();
}

pub struct Matcher {
    regex: Regex,
    rules: Vec<Rc<dyn Rule>>,
    lazy_keys: Vec<String>,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("pattern", &self.regex.as_str())
            .field("rules", &self.rule_names())
            .field("lazy_keys", &self.lazy_keys)
            .finish()
    }
}

impl Matcher {
    /// Build from a rule set. Malformed rules are skipped with a warning, or rejected
    /// with [`TemplateError::InvalidRule`] when `strict`.
    pub fn build(rules: &RuleSet, strict: bool) -> Result<Matcher> {
        let mut alternatives = Vec::new();
        let mut accepted: Vec<Rc<dyn Rule>> = Vec::new();

        for rule in rules.iter() {
            let pattern = rule.pattern().unwrap_or(NEVER_MATCH);
            if let Err(reason) = validate_pattern(pattern) {
                if strict {
                    return Err(TemplateError::InvalidRule {
                        name: rule.name().to_string(),
                        reason,
                    });
                }
                warn!(rule = rule.name(), %reason, "skipping malformed rule");
                continue;
            }
            alternatives.push(format!("(?:{})", pattern));
            accepted.push(rule.clone());
        }

        let combined = alternatives.join("|");
        let regex = match Regex::new(&combined) {
            Ok(regex) => regex,
            Err(e) if strict => {
                return Err(TemplateError::InvalidRule {
                    name: "<combined>".to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                warn!(error = %e, "combined rule pattern failed to compile");
                NEVER_REGEX.clone()
            }
        };

        let lazy_keys = accepted
            .iter()
            .filter(|rule| rule.lazy())
            .map(|rule| rule.name().to_string())
            .collect();

        Ok(Matcher {
            regex: if accepted.is_empty() {
                NEVER_REGEX.clone()
            } else {
                regex
            },
            rules: accepted,
            lazy_keys,
        })
    }

    /// Matcher over the built-in directive set.
    pub fn standard() -> Rc<Matcher> {
        let rules = RuleSet::standard();
        let matcher = Matcher::build(&rules, false).unwrap_or_else(|_| Matcher {
            regex: NEVER_REGEX.clone(),
            rules: Vec::new(),
            lazy_keys: Vec::new(),
        });
        Rc::new(matcher)
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn rules(&self) -> &[Rc<dyn Rule>] {
        &self.rules
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Rule owning capture group `group` (1-based).
    pub fn rule_for_group(&self, group: usize) -> Option<&Rc<dyn Rule>> {
        group.checked_sub(1).and_then(|i| self.rules.get(i))
    }

    pub fn lazy_keys(&self) -> &[String] {
        &self.lazy_keys
    }

    /// Lazy rules in registration order.
    pub fn lazy_rules(&self) -> impl Iterator<Item = &Rc<dyn Rule>> {
        self.rules.iter().filter(|rule| rule.lazy())
    }

    /// Fresh lazy scope: one empty array per lazy rule. Independent per call.
    pub fn seed(&self) -> Value {
        let scope = Value::new_object();
        for key in &self.lazy_keys {
            scope.set(key, Value::array(Vec::new()));
        }
        scope
    }
}

fn validate_pattern(pattern: &str) -> std::result::Result<(), String> {
    let regex = Regex::new(pattern).map_err(|e| e.to_string())?;
    // captures_len counts the implicit whole-match group
    let groups = regex.captures_len() - 1;
    if groups != 1 {
        return Err(format!(
            "pattern must have exactly one capturing group, found {}",
            groups
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::FnRule;

    fn literal_rule(name: &str, pattern: Option<&str>) -> FnRule {
        let tag = name.to_string();
        let rule = FnRule::new(name, move |captured, _| Ok(format!("{}:{}", tag, captured)));
        match pattern {
            Some(p) => rule.with_pattern(p),
            None => rule,
        }
    }

    #[test]
    fn test_group_alignment_with_patternless_rule() {
        let mut rules = RuleSet::new();
        rules.insert(literal_rule("a", Some(r"<a>(.*?)</a>")));
        rules.insert(literal_rule("none", None));
        rules.insert(literal_rule("b", Some(r"<b>(.*?)</b>")));
        let matcher = Matcher::build(&rules, true).unwrap();

        let caps = matcher.regex().captures("x <b>bold</b>").unwrap();
        let group = (1..caps.len()).find(|i| caps.get(*i).is_some()).unwrap();
        assert_eq!(group, 3);
        assert_eq!(matcher.rule_for_group(group).unwrap().name(), "b");
    }

    #[test]
    fn test_malformed_rules_skipped_when_lenient() {
        let mut rules = RuleSet::new();
        rules.insert(literal_rule("broken", Some(r"(unclosed")));
        rules.insert(literal_rule("two", Some(r"(a)(b)")));
        rules.insert(literal_rule("ok", Some(r"\[(\w+)\]")));
        let matcher = Matcher::build(&rules, false).unwrap();
        assert_eq!(matcher.rule_names(), vec!["ok"]);
    }

    #[test]
    fn test_malformed_rules_rejected_when_strict() {
        let mut rules = RuleSet::new();
        rules.insert(literal_rule("ok", Some(r"\[(\w+)\]")));
        rules.insert(literal_rule("zero", Some(r"\[\w+\]")));
        let err = Matcher::build(&rules, true).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidRule { ref name, .. } if name == "zero"));
    }

    #[test]
    fn test_standard_seed_lists_lazy_rules_in_order() {
        let matcher = Matcher::standard();
        assert_eq!(
            matcher.lazy_keys(),
            &[
                "insert",
                "props",
                "namedElement",
                "elementRef",
                "load",
                "event",
                "lazyEvaluate"
            ]
        );
        let first = matcher.seed();
        let second = matcher.seed();
        assert!(!first.strict_equals(&second));
        assert!(matches!(first.get("event"), Some(Value::Array(a)) if a.borrow().is_empty()));
    }
}
