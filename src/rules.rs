//! Directive rules.
//!
//! A rule recognizes one directive form in template text and turns its captured body
//! into a fragment of the generated render function. Lazy rules also queue payloads
//! during the eager pass and consume them after the DOM exists (see [`crate::lazy`]).

use lazy_static::lazy_static;
use regex::Regex;
use std::rc::Rc;

use tracing::debug;

use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::html;
use crate::lazy::{self, LazyContext};
use crate::script::{FunctionCode, Value};

/// Compile-time state handed to [`Rule::exec`].
pub struct CompileContext {
    pub engine: Engine,
    pub template_id: String,
    pub strict: bool,
}

impl CompileContext {
    pub fn new(engine: &Engine, template_id: &str) -> Self {
        Self {
            engine: engine.clone(),
            template_id: template_id.to_string(),
            strict: engine.config().throw_error,
        }
    }
}

pub trait Rule {
    fn name(&self) -> &str;

    /// Regex with exactly one capturing group. `None` never matches.
    fn pattern(&self) -> Option<&str>;

    /// Generated code for one match.
    fn exec(&self, captured: &str, cx: &mut CompileContext) -> Result<String>;

    fn lazy(&self) -> bool {
        false
    }

    /// Consume the payloads queued under this rule's name during the eager pass.
    fn lazy_exec(&self, _entries: &[Value], _cx: &mut LazyContext) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUSTOM RULES
// ═══════════════════════════════════════════════════════════════════════════════

type ExecFn = dyn Fn(&str, &mut CompileContext) -> Result<String>;
type LazyFn = dyn Fn(&[Value], &mut LazyContext) -> Result<()>;

/// A rule assembled from closures.
pub struct FnRule {
    name: String,
    pattern: Option<String>,
    exec: Box<ExecFn>,
    lazy_exec: Option<Box<LazyFn>>,
}

impl FnRule {
    pub fn new<F>(name: &str, exec: F) -> Self
    where
        F: Fn(&str, &mut CompileContext) -> Result<String> + 'static,
    {
        Self {
            name: name.to_string(),
            pattern: None,
            exec: Box::new(exec),
            lazy_exec: None,
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    /// Mark the rule lazy. Its payload array is `__lazy.<name>`.
    pub fn with_lazy<F>(mut self, lazy_exec: F) -> Self
    where
        F: Fn(&[Value], &mut LazyContext) -> Result<()> + 'static,
    {
        self.lazy_exec = Some(Box::new(lazy_exec));
        self
    }
}

impl Rule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    fn exec(&self, captured: &str, cx: &mut CompileContext) -> Result<String> {
        (self.exec)(captured, cx)
    }

    fn lazy(&self) -> bool {
        self.lazy_exec.is_some()
    }

    fn lazy_exec(&self, entries: &[Value], cx: &mut LazyContext) -> Result<()> {
        match &self.lazy_exec {
            Some(f) => f(entries, cx),
            None => Ok(()),
        }
    }
}

/// Ordered rule collection. Order is precedence.
#[derive(Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rc<dyn Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in directives in their default order.
    pub fn standard() -> Self {
        let mut set = Self::new();
        for directive in Directive::ALL {
            set.rules.push(Rc::new(directive));
        }
        set
    }

    /// Append a rule, or replace a rule of the same name in place.
    pub fn insert(&mut self, rule: impl Rule + 'static) {
        self.insert_rc(Rc::new(rule));
    }

    pub fn insert_rc(&mut self, rule: Rc<dyn Rule>) {
        match self.rules.iter().position(|r| r.name() == rule.name()) {
            Some(index) => self.rules[index] = rule,
            None => self.rules.push(rule),
        }
    }

    /// Insert before the rule named `before` (appends when absent).
    pub fn insert_before(&mut self, before: &str, rule: impl Rule + 'static) {
        let rule: Rc<dyn Rule> = Rc::new(rule);
        self.rules.retain(|r| r.name() != rule.name());
        match self.rules.iter().position(|r| r.name() == before) {
            Some(index) => self.rules.insert(index, rule),
            None => self.rules.push(rule),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != name);
        self.rules.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn Rule>> {
        self.rules.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-IN DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref STYLE_ID: Regex =
        Regex::new(r#"(?i)^<style\b[^>]*\bid\s*=\s*["']?([^"'\s>]+)"#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Style,
    Comment,
    PreEvaluate,
    Interpolate,
    Escape,
    Insert,
    Props,
    NamedElement,
    ElementRef,
    Load,
    Event,
    LazyEvaluate,
    Evaluate,
}

impl Directive {
    pub const ALL: [Directive; 13] = [
        Directive::Style,
        Directive::Comment,
        Directive::PreEvaluate,
        Directive::Interpolate,
        Directive::Escape,
        Directive::Insert,
        Directive::Props,
        Directive::NamedElement,
        Directive::ElementRef,
        Directive::Load,
        Directive::Event,
        Directive::LazyEvaluate,
        Directive::Evaluate,
    ];

    /// Marker attribute written by attribute-position directives.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Directive::Props => Some("data-co-props"),
            Directive::NamedElement => Some("data-co-named-element"),
            Directive::ElementRef => Some("data-co-element-ref"),
            Directive::Load => Some("data-co-load"),
            Directive::Event => Some("data-co-event"),
            _ => None,
        }
    }
}

/// `__out += '<attr>="' + (__lazy.<rule>.push(<payload>) - 1) + '"';`
fn marker_code(attr: &str, rule: &str, payload: &str) -> String {
    format!(
        "__out += '{}=\"' + (__lazy.{}.push({}) - 1) + '\"';\n",
        attr, rule, payload
    )
}

/// Split `a::b` into its head and optional tail.
fn split_pair(captured: &str) -> (&str, Option<&str>) {
    match captured.split_once("::") {
        Some((head, tail)) => (head.trim(), Some(tail.trim())),
        None => (captured.trim(), None),
    }
}

fn or_undefined(expr: Option<&str>) -> &str {
    match expr {
        Some(e) if !e.is_empty() => e,
        _ => "undefined",
    }
}

impl Rule for Directive {
    fn name(&self) -> &str {
        match self {
            Directive::Style => "style",
            Directive::Comment => "comment",
            Directive::PreEvaluate => "preEvaluate",
            Directive::Interpolate => "interpolate",
            Directive::Escape => "escape",
            Directive::Insert => "insert",
            Directive::Props => "props",
            Directive::NamedElement => "namedElement",
            Directive::ElementRef => "elementRef",
            Directive::Load => "load",
            Directive::Event => "event",
            Directive::LazyEvaluate => "lazyEvaluate",
            Directive::Evaluate => "evaluate",
        }
    }

    fn pattern(&self) -> Option<&str> {
        Some(match self {
            Directive::Style => {
                r#"(<style\b[^>]*\bid\s*=\s*["']?[^"'\s>]+["']?[^>]*>[\s\S]*?</style>)"#
            }
            Directive::Comment => r"##\*([\s\S]*?)##",
            Directive::PreEvaluate => r"##!([\s\S]+?)##",
            Directive::Interpolate => r"##=([\s\S]+?)##",
            Directive::Escape => r"##-([\s\S]+?)##",
            Directive::Insert => r"##%([\s\S]+?)##",
            Directive::Props => r###"data-co-props\s*=\s*"##:([\s\S]+?)##""###,
            Directive::NamedElement => r###"data-co-named-element\s*=\s*"##:([\s\S]+?)##""###,
            Directive::ElementRef => r###"data-co-element-ref\s*=\s*"##:([\s\S]+?)##""###,
            Directive::Load => r###"data-co-load\s*=\s*"##:([\s\S]+?)##""###,
            Directive::Event => r###"data-co-event\s*=\s*"##:([\s\S]+?)##""###,
            Directive::LazyEvaluate => r"###([\s\S]+?)##",
            Directive::Evaluate => r"##([\s\S]+?)##",
        })
    }

    fn exec(&self, captured: &str, cx: &mut CompileContext) -> Result<String> {
        let code = match self {
            Directive::Style => {
                hoist_style(captured, cx);
                String::new()
            }
            Directive::Comment => String::new(),
            Directive::PreEvaluate => {
                pre_evaluate(captured, cx)?;
                String::new()
            }
            Directive::Interpolate => format!("__out += __interp(({}));\n", captured.trim()),
            Directive::Escape => format!("__out += __escape(({}));\n", captured.trim()),
            Directive::Insert => {
                let (target, nonblocking) = split_pair(captured);
                format!(
                    "__out += '<template data-co-insert=\"' + (__lazy.insert.push({{ target: ({}), nonblocking: ({}) }}) - 1) + '\"></template>';\n",
                    or_undefined(Some(target)),
                    nonblocking.filter(|n| !n.is_empty()).unwrap_or("false")
                )
            }
            Directive::Props | Directive::NamedElement => {
                let attr = self.marker().unwrap_or_default();
                marker_code(attr, self.name(), &format!("({})", captured.trim()))
            }
            Directive::ElementRef => marker_code(
                "data-co-element-ref",
                "elementRef",
                &format!("function (__el) {{ {} = __el; }}", captured.trim()),
            ),
            Directive::Load => {
                let (func, data) = split_pair(captured);
                marker_code(
                    "data-co-load",
                    "load",
                    &format!("{{ fn: ({}), data: ({}) }}", func, or_undefined(data)),
                )
            }
            Directive::Event => {
                let entries = captured
                    .split(":::")
                    .map(split_pair)
                    .filter(|(handler, _)| !handler.is_empty())
                    .map(|(handler, data)| {
                        format!("{{ handler: ({}), data: ({}) }}", handler, or_undefined(data))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                marker_code("data-co-event", "event", &format!("[{}]", entries))
            }
            Directive::LazyEvaluate => format!(
                "__lazy.lazyEvaluate.push(function (data) {{\n{}\n}});\n",
                captured
            ),
            Directive::Evaluate => format!("\n{}\n", captured),
        };
        Ok(code)
    }

    fn lazy(&self) -> bool {
        matches!(
            self,
            Directive::Insert
                | Directive::Props
                | Directive::NamedElement
                | Directive::ElementRef
                | Directive::Load
                | Directive::Event
                | Directive::LazyEvaluate
        )
    }

    fn lazy_exec(&self, entries: &[Value], cx: &mut LazyContext) -> Result<()> {
        match self {
            Directive::Insert => lazy::insert(entries, cx),
            Directive::Props => lazy::props(entries, cx),
            Directive::NamedElement => lazy::named_element(entries, cx),
            Directive::ElementRef => lazy::element_ref(entries, cx),
            Directive::Load => lazy::load(entries, cx),
            Directive::Event => lazy::event(entries, cx),
            Directive::LazyEvaluate => lazy::lazy_evaluate(entries, cx),
            _ => Ok(()),
        }
    }
}

/// Move a `<style id=..>` block into the document head, replacing an older copy.
fn hoist_style(block: &str, cx: &CompileContext) {
    let Some(id) = STYLE_ID.captures(block).and_then(|c| c.get(1)) else {
        return;
    };
    let id = id.as_str().to_string();
    cx.engine.with_dom(|dom| {
        let head = dom.head();
        if let Some(existing) = dom.element_by_id(&id) {
            dom.detach(existing);
        }
        let fragment = html::parse_fragment(dom, block);
        dom.append_child(head, fragment);
    });
    debug!(template_id = %cx.template_id, style_id = %id, "hoisted style");
}

/// Run a `##! .. ##` body once, with `templateId` bound.
fn pre_evaluate(body: &str, cx: &CompileContext) -> Result<()> {
    let code = FunctionCode::compile("preEvaluate", &["templateId"], body)
        .map_err(|e| TemplateError::directive(&cx.template_id, "preEvaluate", e))?;
    let interp = cx.engine.interp();
    let func = interp.instantiate(code);
    interp
        .call(&func, Value::Undefined, &[Value::str(&cx.template_id)])
        .map_err(|e| TemplateError::directive(&cx.template_id, "preEvaluate", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn exec(directive: Directive, captured: &str) -> String {
        let engine = Engine::new(Config::default());
        let mut cx = CompileContext::new(&engine, "t");
        directive.exec(captured, &mut cx).unwrap()
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            RuleSet::standard().names(),
            vec![
                "style",
                "comment",
                "preEvaluate",
                "interpolate",
                "escape",
                "insert",
                "props",
                "namedElement",
                "elementRef",
                "load",
                "event",
                "lazyEvaluate",
                "evaluate"
            ]
        );
    }

    #[test]
    fn test_generated_code() {
        assert_eq!(exec(Directive::Interpolate, " data.x "), "__out += __interp((data.x));\n");
        assert_eq!(exec(Directive::Evaluate, " if (a) { "), "\n if (a) { \n");
        assert!(exec(Directive::Insert, "data.child::true")
            .contains("__lazy.insert.push({ target: (data.child), nonblocking: (true) })"));
        assert!(exec(Directive::Insert, "data.child").contains("nonblocking: (false)"));
        assert!(exec(Directive::Insert, "data.child").starts_with("__out += '<template data-co-insert=\""));
        assert_eq!(
            exec(Directive::ElementRef, "component.input"),
            "__out += 'data-co-element-ref=\"' + (__lazy.elementRef.push(function (__el) { component.input = __el; }) - 1) + '\"';\n"
        );
        assert!(exec(Directive::Event, "onClick::1:::onOther")
            .contains("[{ handler: (onClick), data: (1) }, { handler: (onOther), data: (undefined) }]"));
        assert!(exec(Directive::Comment, "anything").is_empty());
    }

    #[test]
    fn test_attribute_directives_capture_whole_body() {
        let cases = [
            (Directive::Props, r###"<b data-co-props="##:{a:1}##">"###),
            (Directive::NamedElement, r###"<b data-co-named-element="##:'x'##">"###),
            (Directive::ElementRef, r###"<b data-co-element-ref="##:component.el##">"###),
            (Directive::Load, r###"<b data-co-load="##:init::data##">"###),
            (Directive::Event, r###"<b data-co-event = "##:onClick##">"###),
        ];
        let bodies = ["{a:1}", "'x'", "component.el", "init::data", "onClick"];
        for ((directive, text), body) in cases.iter().zip(bodies) {
            let pattern = directive.pattern().unwrap();
            let re = Regex::new(pattern).unwrap();
            let caps = re.captures(text).unwrap_or_else(|| panic!("{} did not match", directive.name()));
            assert_eq!(&caps[1], body);
            assert!(caps[0].ends_with("##\""));
        }
    }

    #[test]
    fn test_style_hoisting_replaces_same_id() {
        let engine = Engine::new(Config::default());
        let mut cx = CompileContext::new(&engine, "t");
        Directive::Style
            .exec("<style id=\"s1\">a{}</style>", &mut cx)
            .unwrap();
        Directive::Style
            .exec("<style id=\"s1\">b{}</style>", &mut cx)
            .unwrap();
        let head = engine.with_dom(|dom| dom.inner_html(dom.head()));
        assert_eq!(head, "<style id=\"s1\">b{}</style>");
    }

    #[test]
    fn test_pre_evaluate_sees_template_id() {
        let engine = Engine::new(Config::default());
        let mut cx = CompileContext::new(&engine, "widgets.card");
        Directive::PreEvaluate
            .exec(" seen = templateId ", &mut cx)
            .unwrap();
        assert_eq!(
            engine.interp().eval("seen").unwrap().to_display(),
            "widgets.card"
        );
        let err = Directive::PreEvaluate.exec(" ((( ", &mut cx).unwrap_err();
        assert!(matches!(err, TemplateError::Directive { ref rule, .. } if rule == "preEvaluate"));
    }

    #[test]
    fn test_rule_set_editing() {
        let mut set = RuleSet::standard();
        set.insert_before("evaluate", FnRule::new("shout", |c, _| Ok(c.to_uppercase())).with_pattern(r"!!(\w+)!!"));
        let names = set.names();
        assert_eq!(names[names.len() - 2], "shout");
        assert!(set.remove("comment"));
        assert_eq!(set.len(), 13);
    }
}
