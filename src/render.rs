//! Render pipeline.
//!
//! One render runs the compiled function for an HTML string (eager pass), parses it
//! into a fragment, runs the lazy passes over the fragment, then places the result:
//! shadow re-hosting, root extraction, target insertion, property bag, normalization
//! and the render callback.

use std::rc::Rc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::compiler::CompiledTemplate;
use crate::component::{ComponentScope, ComponentState, HOOK_AFTER_APPEND, HOOK_BEFORE_APPEND};
use crate::dom::{NodeId, NodeKind};
use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::html;
use crate::lazy::{is_blank_text, LazyContext};
use crate::script::Value;

/// Data key whose entries are copied onto the rendered element.
pub const PROPERTIES_KEY: &str = "coProperties";
/// Marks the element created to host a shadow root.
pub const SHADOW_HOST_ATTR: &str = "data-co-shadow-host";

const OPTION_KEYS: [&str; 3] = ["coTarget", "coCallback", "coComponent"];

#[derive(Clone, Default)]
pub struct RenderOptions {
    /// Container that receives the output (its old children are removed).
    pub target: Option<NodeId>,
    /// Called with `this` = target and the component scope as argument.
    pub callback: Option<Value>,
    /// Existing scope to render into instead of a new one.
    pub base: Option<ComponentScope>,
}

impl RenderOptions {
    pub fn with_target(target: NodeId) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }
}

/// Split script call arguments into data and options.
///
/// Accepts `(data, target | callback, callback, baseScope)` or a single options
/// object whose `coTarget`, `coCallback` and `coComponent` fields are stripped from
/// the data.
pub fn normalize_args(args: &[Value]) -> (Value, RenderOptions) {
    let data = args.first().cloned().unwrap_or_default();
    let mut options = RenderOptions::default();

    if args.len() <= 1 {
        if let Value::Object(map) = &data {
            if OPTION_KEYS.iter().any(|k| map.borrow().contains_key(*k)) {
                options.target = data.get("coTarget").and_then(|v| v.as_node());
                options.callback = data.get("coCallback").filter(|v| v.is_callable());
                options.base = data
                    .get("coComponent")
                    .and_then(|v| v.as_component().cloned());
                let stripped = data.shallow_clone();
                if let Value::Object(map) = &stripped {
                    let mut map = map.borrow_mut();
                    for key in OPTION_KEYS {
                        map.shift_remove(key);
                    }
                }
                return (stripped, options);
            }
        }
        return (data, options);
    }

    match args.get(1) {
        Some(Value::Node(target)) => options.target = Some(*target),
        Some(callback) if callback.is_callable() => options.callback = Some(callback.clone()),
        _ => {}
    }
    if let Some(callback) = args.get(2).filter(|v| v.is_callable()) {
        options.callback = Some(callback.clone());
    }
    if let Some(Value::Component(base)) = args.get(3) {
        options.base = Some(base.clone());
    }
    (data, options)
}

/// Entry point for calling a template value from script.
pub fn call_template(
    engine: &Engine,
    template: &Rc<CompiledTemplate>,
    args: &[Value],
) -> Result<ComponentScope> {
    let (data, options) = normalize_args(args);
    render(engine, template, data, options)
}

/// Render `template` with `data`.
pub fn render(
    engine: &Engine,
    template: &Rc<CompiledTemplate>,
    data: Value,
    options: RenderOptions,
) -> Result<ComponentScope> {
    let started = Instant::now();
    let config = engine.config();

    let lazy = template.matcher.seed();
    let component = match &options.base {
        Some(scope) => {
            scope.set_template(template.clone());
            scope.clone()
        }
        None => ComponentScope::new(engine.next_component_id(), template.clone()),
    };
    component.set_data(data.clone());

    let fragment = if data.is_nullish() {
        engine.with_dom(|dom| {
            let fragment = dom.create_fragment();
            let comment = dom.create_comment(&format!("co-empty:{}", component.id()));
            dom.append_child(fragment, comment);
            fragment
        })
    } else {
        let output = match run_function(engine, template, &data, &component, &lazy) {
            Ok(output) => output,
            Err(e) => {
                let data_json = data.to_json().to_string();
                let line = failing_line(engine, template);
                error!(template_id = %template.id, data = %data_json, line = ?line, error = %e, "render failed");
                if config.throw_error {
                    let source = generated_source(template);
                    let located = line.and_then(|n| Some((n, source.lines().nth(n.checked_sub(1)?)?)));
                    let message = match located {
                        Some((n, code)) => format!("{} at line {}: {}", e, n, code.trim()),
                        None => e.to_string(),
                    };
                    return Err(TemplateError::Render {
                        template_id: template.id.clone(),
                        message,
                        data: data_json,
                        line,
                        source: Some(source),
                    });
                }
                let comment = engine.with_dom(|dom| {
                    dom.create_comment(&format!("co-error:{}", component.id()))
                });
                component.set_element(Some(comment));
                component.set_roots(vec![comment]);
                component.set_state(ComponentState::Rendered);
                return Ok(component);
            }
        };
        let fragment = engine.with_dom(|dom| html::parse_fragment(dom, &output));
        run_lazy_passes(engine, template, &lazy, fragment, &data, &component)?;
        fragment
    };

    if let Some(target) = options.target {
        engine.with_dom(|dom| dom.clear_children(target));
        component.set_wrapper(Some(target));
    }

    rehost_in_shadow(engine, fragment);
    let (element, roots) = place(engine, fragment, &component, options.target)?;
    component.set_element(Some(element));
    component.set_roots(roots);

    apply_properties(engine, element, &data);

    engine.with_dom(|dom| dom.normalize(element));
    if engine.with_dom(|dom| matches!(dom.kind(element), NodeKind::Fragment)) {
        component.set_roots(engine.with_dom(|dom| dom.children(element).to_vec()));
    } else if let Some(target) = options.target.filter(|t| *t == element) {
        let kept: Vec<NodeId> = engine.with_dom(|dom| {
            component
                .roots()
                .into_iter()
                .filter(|root| dom.parent(*root) == Some(target))
                .collect()
        });
        component.set_roots(kept);
    }
    component.set_state(ComponentState::Rendered);

    engine.notify_live_reload(&component);

    if let Some(callback) = &options.callback {
        let this = options.target.map(Value::Node).unwrap_or_default();
        if let Err(e) = engine
            .interp()
            .call(callback, this, &[Value::Component(component.clone())])
        {
            let err = TemplateError::callback(&template.id, "callback", e);
            error!(template_id = %template.id, error = %err, "render callback failed");
            if config.throw_error {
                return Err(err);
            }
        }
    }

    if config.print_exec_time {
        info!(
            template_id = %template.id,
            elapsed_us = started.elapsed().as_micros() as u64,
            "rendered"
        );
    }
    Ok(component)
}

/// Eager pass: run the compiled function and return its HTML.
fn run_function(
    engine: &Engine,
    template: &Rc<CompiledTemplate>,
    data: &Value,
    component: &ComponentScope,
    lazy: &Value,
) -> Result<String> {
    let interp = engine.interp();
    engine.clear_fault();
    let function = interp.instantiate(template.function.clone());
    let globals = engine.globals();
    let args = [
        data.clone(),
        component.status(),
        Value::Component(component.clone()),
        engine.i18n_accessor(&template.id),
        globals.lookup("co").unwrap_or_default(),
        globals.lookup("templates").unwrap_or_default(),
        lazy.clone(),
        Value::Bool(engine.config().debug),
    ];
    let output = interp.call(&function, Value::Undefined, &args)?;
    Ok(if output.is_nullish() {
        String::new()
    } else {
        interp.stringify(&output)
    })
}

/// Line of the statement that failed inside `template`'s own function, if the last
/// script fault happened there rather than in a nested template or helper.
fn failing_line(engine: &Engine, template: &CompiledTemplate) -> Option<usize> {
    let (text, offset) = engine.take_fault()?;
    if !Rc::ptr_eq(&text, &template.function.text) {
        return None;
    }
    Some(template.function.body_line(offset as usize))
}

/// Generated source for error reports. Debug builds keep it on the template;
/// otherwise it is recovered from the compiled function.
fn generated_source(template: &CompiledTemplate) -> String {
    template
        .source
        .clone()
        .unwrap_or_else(|| template.function.body().to_string())
}

fn run_lazy_passes(
    engine: &Engine,
    template: &Rc<CompiledTemplate>,
    lazy: &Value,
    fragment: NodeId,
    data: &Value,
    component: &ComponentScope,
) -> Result<()> {
    let mut cx = LazyContext::new(engine, fragment, data.clone(), component);
    for rule in template.matcher.lazy_rules() {
        let entries = match lazy.get(rule.name()) {
            Some(Value::Array(items)) => items.borrow().clone(),
            _ => continue,
        };
        if entries.is_empty() {
            continue;
        }
        rule.lazy_exec(&entries, &mut cx)?;
    }
    Ok(())
}

/// Move a lone root element that carries a `<style>` into an open shadow root.
fn rehost_in_shadow(engine: &Engine, fragment: NodeId) {
    engine.with_dom(|dom| {
        let significant: Vec<NodeId> = dom
            .children(fragment)
            .iter()
            .copied()
            .filter(|child| !is_blank_text(dom.kind(*child)))
            .collect();
        let [root] = significant.as_slice() else {
            return;
        };
        if !dom.is_element(*root) || !dom.contains_tag(*root, "style") {
            return;
        }
        let root = *root;
        let host = dom.create_element("div");
        dom.set_attribute(host, SHADOW_HOST_ATTR, "");
        let shadow = dom.attach_shadow(host);
        dom.clear_children(fragment);
        dom.append_child(shadow, root);
        dom.append_child(fragment, host);
    });
}

/// Extract the element and roots from the fragment and insert into the target.
fn place(
    engine: &Engine,
    fragment: NodeId,
    component: &ComponentScope,
    target: Option<NodeId>,
) -> Result<(NodeId, Vec<NodeId>)> {
    let (significant, single) = engine.with_dom(|dom| {
        let significant: Vec<NodeId> = dom
            .children(fragment)
            .iter()
            .copied()
            .filter(|child| !is_blank_text(dom.kind(*child)))
            .collect();
        let single = match significant.as_slice() {
            [only] => Some(*only),
            [] if dom.children(fragment).len() == 1 => dom.children(fragment).first().copied(),
            _ => None,
        };
        (significant, single)
    });

    if let Some(node) = single {
        engine.with_dom(|dom| dom.detach(node));
        if let Some(target) = target {
            let is_element = engine.with_dom(|dom| dom.is_element(node));
            if is_element {
                component.run_hook(engine, HOOK_BEFORE_APPEND)?;
            }
            engine.with_dom(|dom| dom.append_child(target, node));
            if is_element {
                component.defer_hook(engine, HOOK_AFTER_APPEND);
            }
        }
        return Ok((node, vec![node]));
    }

    if significant.is_empty() {
        warn!(template_id = %component.template_id(), "template rendered no nodes");
    }
    let roots = engine.with_dom(|dom| dom.children(fragment).to_vec());
    match target {
        Some(target) => {
            engine.with_dom(|dom| dom.append_child(target, fragment));
            Ok((target, roots))
        }
        None => Ok((fragment, roots)),
    }
}

/// Copy `data.coProperties` onto the element: `data-*` keys become attributes,
/// the rest are set as node properties. Each property fails independently.
fn apply_properties(engine: &Engine, element: NodeId, data: &Value) {
    let Some(properties) = data.get(PROPERTIES_KEY) else {
        return;
    };
    if !engine.with_dom(|dom| dom.is_element(element)) {
        return;
    }
    let interp = engine.interp();
    let entries: Vec<(String, Value)> = match &properties {
        Value::Object(map) => map
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => return,
    };
    for (key, value) in entries {
        if key.starts_with("data-") {
            let text = interp.stringify(&value);
            engine.with_dom(|dom| dom.set_attribute(element, &key, &text));
        } else if let Err(e) = interp.set_member(&Value::Node(element), &key, value) {
            warn!(property = %key, error = %e, "failed to apply property");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_args_strips_option_keys() {
        let data = Value::from(serde_json::json!({ "name": "x", "coTarget": null }));
        let (data, options) = normalize_args(&[data]);
        assert!(data.get("coTarget").is_none());
        assert_eq!(data.get("name").unwrap().to_display(), "x");
        assert!(options.target.is_none());
    }

    #[test]
    fn test_normalize_args_positional() {
        let callback = Value::native("cb", |_, _, _| Ok(Value::Undefined));
        let (_, options) = normalize_args(&[Value::Null, callback.clone()]);
        assert!(options.callback.is_some());
        let (_, options) = normalize_args(&[Value::Null, Value::Node(NodeId(3)), callback]);
        assert_eq!(options.target, Some(NodeId(3)));
        assert!(options.callback.is_some());
    }
}
