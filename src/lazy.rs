//! Lazy binding pass.
//!
//! The eager pass leaves index-addressed markers in the HTML and pushes the matching
//! payloads into the render's lazy scope. Once the HTML is a DOM fragment, each lazy
//! rule walks its payload array in index order, finds the element carrying its marker,
//! removes the marker and wires the payload to the element.

use tracing::{debug, error, warn};

use crate::component::{ComponentScope, ComponentState, HOOK_AFTER_APPEND, HOOK_BEFORE_APPEND};
use crate::dom::{NodeId, NodeKind};
use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::html;
use crate::script::builtins::own_keys;
use crate::script::Value;

/// Nesting limit when an insert target resolves to functions returning functions.
const MAX_INSERT_DEPTH: usize = 16;

/// Runtime state handed to [`crate::rules::Rule::lazy_exec`].
pub struct LazyContext {
    pub engine: Engine,
    pub template_id: String,
    /// Fragment holding the freshly parsed output.
    pub root: NodeId,
    pub data: Value,
    pub component: ComponentScope,
    pub strict: bool,
    pub debug: bool,
}

impl LazyContext {
    pub fn new(engine: &Engine, root: NodeId, data: Value, component: &ComponentScope) -> Self {
        let config = engine.config();
        Self {
            engine: engine.clone(),
            template_id: component.template_id(),
            root,
            data,
            component: component.clone(),
            strict: config.throw_error,
            debug: config.debug,
        }
    }

    /// Find the element marked `attr=index` and strip the marker.
    pub fn take_marker(&self, attr: &str, index: usize) -> Option<NodeId> {
        let key = index.to_string();
        let found = self.engine.with_dom(|dom| {
            let element = dom.find_by_attribute(self.root, attr, &key)?;
            dom.remove_attribute(element, attr);
            Some(element)
        });
        if found.is_none() && self.debug {
            warn!(template_id = %self.template_id, attr, index, "lazy marker not found");
        }
        found
    }

    /// Context object passed to load and event handlers.
    pub fn context(&self, element: NodeId, custom: Value) -> Value {
        let context = Value::new_object();
        context.set("data", self.data.clone());
        context.set("element", Value::Node(element));
        context.set("customData", custom);
        context.set("component", Value::Component(self.component.clone()));
        context.set(
            "co",
            self.engine.globals().lookup("co").unwrap_or_default(),
        );
        context
    }

    /// `this` for lazy evaluate bodies: the single root, or the fragment.
    pub fn this_root(&self) -> Value {
        self.engine.with_dom(|dom| {
            let significant: Vec<NodeId> = dom
                .children(self.root)
                .iter()
                .copied()
                .filter(|child| !is_blank_text(dom.kind(*child)))
                .collect();
            match significant.as_slice() {
                [single] => Value::Node(*single),
                _ => Value::Node(self.root),
            }
        })
    }

    /// Log a failed entry; fatal only in strict mode.
    pub fn fail(&self, rule: &str, index: usize, err: impl ToString) -> Result<()> {
        let err = TemplateError::lazy(&self.template_id, rule, index, err);
        error!(template_id = %self.template_id, rule, index, error = %err, "lazy binding failed");
        if self.strict {
            return Err(err);
        }
        Ok(())
    }
}

pub(crate) fn is_blank_text(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::Text(text) if text.trim().is_empty())
}

fn call(cx: &LazyContext, func: &Value, this: Value, args: &[Value]) -> Result<Value> {
    Ok(cx.engine.interp().call(func, this, args)?)
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSERT
// ═══════════════════════════════════════════════════════════════════════════════

pub fn insert(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    for (index, entry) in entries.iter().enumerate() {
        let key = index.to_string();
        let placeholder = cx
            .engine
            .with_dom(|dom| dom.find_by_attribute(cx.root, "data-co-insert", &key));
        let Some(placeholder) = placeholder else {
            if cx.debug {
                warn!(template_id = %cx.template_id, index, "insert placeholder not found");
            }
            continue;
        };
        let target = entry.get("target").unwrap_or_default();
        let nonblocking = entry.get("nonblocking").unwrap_or_default();

        if nonblocking.truthy() {
            let delay = match nonblocking {
                Value::Number(ms) if ms.is_finite() && ms > 0.0 => ms as u64,
                _ => 0,
            };
            let template_id = cx.template_id.clone();
            cx.engine.schedule(
                "insert",
                delay,
                Box::new(move |engine| {
                    if let Err(e) = substitute(engine, placeholder, &target) {
                        error!(template_id = %template_id, index, error = %e, "deferred insert failed");
                    }
                }),
            );
            continue;
        }

        if let Err(e) = substitute(&cx.engine, placeholder, &target) {
            cx.fail("insert", index, e)?;
        }
    }
    Ok(())
}

/// Replace `placeholder` with whatever `target` resolves to. The placeholder is gone
/// afterwards, on success and on failure.
fn substitute(engine: &Engine, placeholder: NodeId, target: &Value) -> Result<()> {
    let mut nodes = Vec::new();
    let mut components = Vec::new();
    let context = engine.with_dom(|dom| {
        dom.parent(placeholder)
            .and_then(|parent| dom.tag_name(parent))
            .map(str::to_string)
    });
    let resolved = resolve_insert(
        engine,
        target,
        context.as_deref(),
        &mut nodes,
        &mut components,
        0,
    );
    let resolved = resolved.and_then(|_| {
        components
            .iter()
            .try_for_each(|component| component.run_hook(engine, HOOK_BEFORE_APPEND))
    });
    if let Err(e) = resolved {
        engine.with_dom(|dom| dom.detach(placeholder));
        return Err(e);
    }

    engine.with_dom(|dom| dom.replace_with(placeholder, &nodes));
    for component in components {
        component.set_state(ComponentState::Rendered);
        component.defer_hook(engine, HOOK_AFTER_APPEND);
    }
    Ok(())
}

/// `context` is the tag of the placeholder's parent; markup is parsed as its content.
fn resolve_insert(
    engine: &Engine,
    value: &Value,
    context: Option<&str>,
    nodes: &mut Vec<NodeId>,
    components: &mut Vec<ComponentScope>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_INSERT_DEPTH {
        return Err(TemplateError::Config(
            "insert target nests too deeply".to_string(),
        ));
    }
    match value {
        Value::Undefined | Value::Null => {
            debug!("insert target is empty");
        }
        Value::Str(text) if text.contains('<') => {
            let children = engine.with_dom(|dom| {
                let fragment = html::parse_fragment_in(dom, text, context);
                dom.children(fragment).to_vec()
            });
            nodes.extend(children);
        }
        Value::Str(_) | Value::Number(_) | Value::Bool(_) => {
            let text = value.to_display();
            nodes.push(engine.with_dom(|dom| dom.create_text(&text)));
        }
        Value::Function(_) | Value::Native(_) | Value::Template(_) => {
            let result = engine.interp().call(value, Value::Undefined, &[])?;
            resolve_insert(engine, &result, context, nodes, components, depth + 1)?;
        }
        Value::Node(id) => {
            let children = engine.with_dom(|dom| match dom.kind(*id) {
                NodeKind::Fragment => dom.children(*id).to_vec(),
                _ => vec![*id],
            });
            nodes.extend(children);
        }
        Value::Component(component) => {
            nodes.extend(component.roots());
            components.push(component.clone());
        }
        Value::Array(items) => {
            let items = items.borrow().clone();
            for item in &items {
                resolve_insert(engine, item, context, nodes, components, depth + 1)?;
            }
        }
        Value::Object(_) => {
            debug!(target = ?value, "insert target is not insertable");
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTE-POSITION RULES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn props(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    let interp = cx.engine.interp();
    for (index, payload) in entries.iter().enumerate() {
        let Some(element) = cx.take_marker("data-co-props", index) else {
            continue;
        };
        for key in own_keys(&interp, payload) {
            let value = match interp.get_member(payload, &key) {
                Ok(value) => value,
                Err(e) => {
                    cx.fail("props", index, e)?;
                    continue;
                }
            };
            if value.is_nullish() {
                continue;
            }
            let text = interp.stringify(&value);
            cx.engine
                .with_dom(|dom| dom.set_attribute(element, &key, &text));
        }
    }
    Ok(())
}

pub fn named_element(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    for (index, name) in entries.iter().enumerate() {
        let Some(element) = cx.take_marker("data-co-named-element", index) else {
            continue;
        };
        cx.component
            .set_extra(&name.to_display(), Value::Node(element));
    }
    Ok(())
}

pub fn element_ref(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    for (index, setter) in entries.iter().enumerate() {
        let Some(element) = cx.take_marker("data-co-element-ref", index) else {
            continue;
        };
        if let Err(e) = call(cx, setter, Value::Undefined, &[Value::Node(element)]) {
            cx.fail("elementRef", index, e)?;
        }
    }
    Ok(())
}

pub fn load(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    for (index, payload) in entries.iter().enumerate() {
        let Some(element) = cx.take_marker("data-co-load", index) else {
            continue;
        };
        let func = payload.get("fn").unwrap_or_default();
        let context = cx.context(element, payload.get("data").unwrap_or_default());
        if let Err(e) = call(
            cx,
            &func,
            Value::Node(element),
            &[Value::Node(element), context],
        ) {
            cx.fail("load", index, e)?;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn event(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    for (index, payload) in entries.iter().enumerate() {
        let Some(element) = cx.take_marker("data-co-event", index) else {
            continue;
        };
        let bindings = match payload {
            Value::Array(items) => items.borrow().clone(),
            other => vec![other.clone()],
        };
        for binding in bindings {
            let handler = binding.get("handler").unwrap_or_default();
            let custom = binding.get("data").unwrap_or_default();
            if let Err(e) = bind_entry(cx, element, &handler, custom) {
                cx.fail("event", index, e)?;
            }
        }
    }
    Ok(())
}

fn bind_entry(cx: &LazyContext, element: NodeId, handler: &Value, custom: Value) -> Result<()> {
    if handler.is_callable() {
        bind_listener(cx, element, "click", handler.clone(), custom);
        return Ok(());
    }
    let Value::Object(map) = handler else {
        return Err(TemplateError::directive(
            &cx.template_id,
            "event",
            format!("handler must be a function or a map, got {}", handler.to_display()),
        ));
    };

    let entries: Vec<(String, Value)> = map
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let trigger_name = handler.get("triggerName").map(|v| v.to_display());

    for (event_type, func) in entries {
        match event_type.as_str() {
            "triggerName" => {}
            "namedElement" => {
                cx.component
                    .set_extra(&func.to_display(), Value::Node(element));
            }
            "load" => {
                let event = cx.engine.event_object("load", Some(element));
                let context = cx.context(element, custom.clone());
                call(
                    cx,
                    &func,
                    Value::Node(element),
                    &[Value::Node(element), event, context],
                )?;
            }
            _ => {
                let listener = bind_listener(cx, element, &event_type, func, custom.clone());
                if let Some(name) = &trigger_name {
                    let trigger = cx.component.trigger();
                    let slot = match trigger.get(name) {
                        Some(slot @ Value::Object(_)) => slot,
                        _ => {
                            let slot = Value::new_object();
                            trigger.set(name, slot.clone());
                            slot
                        }
                    };
                    slot.set(&event_type, listener);
                }
            }
        }
    }
    Ok(())
}

/// Attach a listener that stops propagation, then calls
/// `handler(element, event, context)`.
fn bind_listener(
    cx: &LazyContext,
    element: NodeId,
    event_type: &str,
    handler: Value,
    custom: Value,
) -> Value {
    let context = cx.context(element, custom);
    let listener = Value::native("listener", move |interp, _, args| {
        let event = args.first().cloned().unwrap_or_default();
        if !event.is_nullish() {
            let stop = interp.get_member(&event, "stopPropagation")?;
            if stop.is_callable() {
                interp.call(&stop, event.clone(), &[])?;
            }
        }
        interp.call(
            &handler,
            Value::Node(element),
            &[Value::Node(element), event, context.clone()],
        )
    });
    let id = cx
        .engine
        .with_dom(|dom| dom.add_listener(element, event_type, listener.clone()));
    cx.component.record_listener(element, id);
    listener
}

// ═══════════════════════════════════════════════════════════════════════════════
// LAZY EVALUATE
// ═══════════════════════════════════════════════════════════════════════════════

pub fn lazy_evaluate(entries: &[Value], cx: &mut LazyContext) -> Result<()> {
    let this = cx.this_root();
    for (index, body) in entries.iter().enumerate() {
        if let Err(e) = call(cx, body, this.clone(), &[cx.data.clone()]) {
            cx.fail("lazyEvaluate", index, e)?;
        }
    }
    Ok(())
}
