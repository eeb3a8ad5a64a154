//! Component scopes.
//!
//! A [`ComponentScope`] is the handle returned by every render. It owns the render's
//! data, its top-level nodes, the listeners the lazy pass attached and whatever user
//! code stored on it (hooks, named elements, ad hoc properties). Cloning the handle
//! shares the scope.

use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, error};

use crate::compiler::CompiledTemplate;
use crate::dom::{ListenerId, NodeId};
use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::render::{self, RenderOptions};
use crate::script::Value;

pub const HOOK_BEFORE_APPEND: &str = "beforeAppendTo";
pub const HOOK_AFTER_APPEND: &str = "afterAppendTo";
pub const HOOK_BEFORE_REMOVE: &str = "beforeRemove";
pub const HOOK_AFTER_REMOVE: &str = "afterRemove";
pub const HOOK_BEFORE_REFRESH: &str = "beforeRefresh";
pub const HOOK_AFTER_REFRESH: &str = "afterRefresh";

/// Members backed by scope fields rather than the extras bag.
const RESERVED: &[&str] = &[
    "id",
    "templateId",
    "data",
    "status",
    "element",
    "wrapperElement",
    "roots",
    "trigger",
    "released",
    "render",
    "refresh",
    "reflash",
    "remove",
    "appendTo",
    "release",
    "fire",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Created, first render not finished.
    Pending,
    Rendered,
    Removed,
    Released,
}

struct ScopeInner {
    id: u64,
    template: RefCell<Rc<CompiledTemplate>>,
    data: RefCell<Value>,
    status: Value,
    element: Cell<Option<NodeId>>,
    wrapper: Cell<Option<NodeId>>,
    roots: RefCell<Vec<NodeId>>,
    extras: RefCell<IndexMap<String, Value>>,
    trigger: RefCell<Value>,
    listeners: RefCell<Vec<(NodeId, ListenerId)>>,
    state: Cell<ComponentState>,
}

#[derive(Clone)]
pub struct ComponentScope {
    inner: Rc<ScopeInner>,
}

impl std::fmt::Debug for ComponentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentScope")
            .field("id", &self.id())
            .field("template", &self.template_id())
            .field("state", &self.state())
            .field("element", &self.element())
            .finish()
    }
}

impl ComponentScope {
    pub fn new(id: u64, template: Rc<CompiledTemplate>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                id,
                template: RefCell::new(template),
                data: RefCell::new(Value::Undefined),
                status: Value::new_object(),
                element: Cell::new(None),
                wrapper: Cell::new(None),
                roots: RefCell::new(Vec::new()),
                extras: RefCell::new(IndexMap::new()),
                trigger: RefCell::new(Value::new_object()),
                listeners: RefCell::new(Vec::new()),
                state: Cell::new(ComponentState::Pending),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &ComponentScope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Unique id, `co-<n>`.
    pub fn id(&self) -> String {
        format!("co-{}", self.inner.id)
    }

    pub fn template(&self) -> Rc<CompiledTemplate> {
        self.inner.template.borrow().clone()
    }

    pub fn template_id(&self) -> String {
        self.inner.template.borrow().id.clone()
    }

    pub(crate) fn set_template(&self, template: Rc<CompiledTemplate>) {
        *self.inner.template.borrow_mut() = template;
    }

    pub fn data(&self) -> Value {
        self.inner.data.borrow().clone()
    }

    pub(crate) fn set_data(&self, data: Value) {
        *self.inner.data.borrow_mut() = data;
    }

    /// Per-scope status object. Created once and kept across re-renders.
    pub fn status(&self) -> Value {
        self.inner.status.clone()
    }

    /// The rendered element: the single root, a fragment holding several roots, the
    /// wrapper when several roots were rendered into one, or a placeholder comment.
    pub fn element(&self) -> Option<NodeId> {
        self.inner.element.get()
    }

    pub(crate) fn set_element(&self, element: Option<NodeId>) {
        self.inner.element.set(element);
    }

    pub fn wrapper(&self) -> Option<NodeId> {
        self.inner.wrapper.get()
    }

    pub(crate) fn set_wrapper(&self, wrapper: Option<NodeId>) {
        self.inner.wrapper.set(wrapper);
    }

    /// Top-level nodes produced by the last render.
    pub fn roots(&self) -> Vec<NodeId> {
        self.inner.roots.borrow().clone()
    }

    pub(crate) fn set_roots(&self, roots: Vec<NodeId>) {
        *self.inner.roots.borrow_mut() = roots;
    }

    pub fn extra(&self, name: &str) -> Option<Value> {
        self.inner.extras.borrow().get(name).cloned()
    }

    pub fn set_extra(&self, name: &str, value: Value) {
        self.inner.extras.borrow_mut().insert(name.to_string(), value);
    }

    /// Trigger map: `trigger[name][type]` → listener.
    pub fn trigger(&self) -> Value {
        self.inner.trigger.borrow().clone()
    }

    pub(crate) fn record_listener(&self, node: NodeId, listener: ListenerId) {
        self.inner.listeners.borrow_mut().push((node, listener));
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    pub fn state(&self) -> ComponentState {
        self.inner.state.get()
    }

    pub(crate) fn set_state(&self, state: ComponentState) {
        self.inner.state.set(state);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SCRIPT MEMBERS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn member_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = ["id", "templateId", "data", "status", "element"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        keys.extend(self.inner.extras.borrow().keys().cloned());
        keys
    }

    pub fn has_member(&self, key: &str) -> bool {
        RESERVED.contains(&key) || self.inner.extras.borrow().contains_key(key)
    }

    pub fn get_member(&self, key: &str) -> Value {
        let node = |id: Option<NodeId>| id.map(Value::Node).unwrap_or(Value::Null);
        match key {
            "id" => Value::str(self.id()),
            "templateId" => Value::str(self.template_id()),
            "data" => self.data(),
            "status" => self.status(),
            "element" => node(self.element()),
            "wrapperElement" => node(self.wrapper()),
            "roots" => Value::array(self.roots().into_iter().map(Value::Node).collect()),
            "trigger" => self.trigger(),
            "released" => Value::Bool(self.state() == ComponentState::Released),
            "render" | "refresh" | "reflash" | "remove" | "appendTo" | "release" | "fire" => {
                self.method(key)
            }
            _ => self.extra(key).unwrap_or_default(),
        }
    }

    pub fn set_member(&self, key: &str, value: Value) {
        match key {
            "data" => self.set_data(value),
            "id" | "templateId" | "status" | "element" | "wrapperElement" | "roots"
            | "trigger" | "released" => {
                debug!(component = %self.id(), key, "ignored write to read-only member");
            }
            _ => self.set_extra(key, value),
        }
    }

    fn method(&self, key: &str) -> Value {
        let scope = self.clone();
        match key {
            "render" => Value::native("render", move |interp, _, args| {
                scope.render(interp.engine(), args.first().cloned().unwrap_or_default())?;
                Ok(Value::Component(scope.clone()))
            }),
            "refresh" | "reflash" => Value::native("refresh", move |interp, _, args| {
                scope.refresh(interp.engine(), args.first().cloned().unwrap_or_default())?;
                Ok(Value::Component(scope.clone()))
            }),
            "remove" => Value::native("remove", move |interp, _, args| {
                let spacer = args.first().map(|v| v.truthy()).unwrap_or(false);
                scope.remove(interp.engine(), spacer)?;
                Ok(Value::Component(scope.clone()))
            }),
            "appendTo" => Value::native("appendTo", move |interp, _, args| {
                let target = args.first().and_then(|v| v.as_node()).ok_or_else(|| {
                    crate::script::ScriptError::type_error("appendTo expects a node")
                })?;
                scope.append_to(interp.engine(), target)?;
                Ok(Value::Component(scope.clone()))
            }),
            "release" => Value::native("release", move |_, _, _| {
                scope.release();
                Ok(Value::Undefined)
            }),
            _ => Value::native("fire", move |interp, _, args| {
                let text = |i: usize| args.get(i).map(|v| v.to_display()).unwrap_or_default();
                scope.fire(interp.engine(), &text(0), &text(1))?;
                Ok(Value::Undefined)
            }),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HOOKS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn hook(&self, name: &str) -> Option<Value> {
        self.extra(name).filter(|v| v.is_callable())
    }

    /// Run a hook now with `this` = scope and the scope as sole argument.
    pub fn call_hook(&self, engine: &Engine, name: &str) -> Result<()> {
        let Some(hook) = self.hook(name) else {
            return Ok(());
        };
        let me = Value::Component(self.clone());
        engine
            .interp()
            .call(&hook, me.clone(), &[me])
            .map_err(|e| TemplateError::callback(&self.template_id(), name, e))?;
        Ok(())
    }

    /// Synchronous hook: failures are logged, and returned when errors are fatal.
    pub(crate) fn run_hook(&self, engine: &Engine, name: &str) -> Result<()> {
        if let Err(e) = self.call_hook(engine, name) {
            error!(template_id = %self.template_id(), hook = name, error = %e, "hook failed");
            if engine.config().throw_error {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run a hook on the next tick of the task queue.
    pub(crate) fn defer_hook(&self, engine: &Engine, name: &'static str) {
        if self.hook(name).is_none() {
            return;
        }
        let scope = self.clone();
        engine.schedule(
            name,
            0,
            Box::new(move |engine| {
                if let Err(e) = scope.call_hook(engine, name) {
                    error!(template_id = %scope.template_id(), hook = name, error = %e, "deferred hook failed");
                }
            }),
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Remove every listener this scope attached.
    pub fn detach_listeners(&self, engine: &Engine) {
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        engine.with_dom(|dom| {
            for (node, listener) in listeners {
                dom.remove_listener(node, listener);
            }
        });
    }

    /// Re-render with new data, replacing the previous output in place.
    pub fn render(&self, engine: &Engine, data: Value) -> Result<()> {
        let template = self.template();
        let old_roots = self.roots();
        self.detach_listeners(engine);

        if let Some(wrapper) = self.wrapper() {
            let options = RenderOptions {
                target: Some(wrapper),
                base: Some(self.clone()),
                ..RenderOptions::default()
            };
            render::render(engine, &template, data, options)?;
            return Ok(());
        }

        let anchor = old_roots.first().and_then(|first| {
            engine.with_dom(|dom| dom.parent(*first).map(|parent| (parent, *first)))
        });
        let options = RenderOptions {
            base: Some(self.clone()),
            ..RenderOptions::default()
        };
        render::render(engine, &template, data, options)?;

        if let Some((parent, first)) = anchor {
            let new_roots = self.roots();
            engine.with_dom(|dom| {
                for node in &new_roots {
                    dom.insert_before(parent, *node, Some(first));
                }
                for node in &old_roots {
                    if !new_roots.contains(node) {
                        dom.detach(*node);
                    }
                }
            });
        }
        Ok(())
    }

    /// Shallow-merge `patch` onto the current data and re-render.
    pub fn refresh(&self, engine: &Engine, patch: Value) -> Result<()> {
        self.run_hook(engine, HOOK_BEFORE_REFRESH)?;
        let merged = match (self.data(), &patch) {
            (current @ Value::Object(_), Value::Object(changes)) => {
                let merged = current.shallow_clone();
                for (key, value) in changes.borrow().iter() {
                    merged.set(key, value.clone());
                }
                merged
            }
            (current, Value::Undefined) => current,
            (_, replacement) => replacement.clone(),
        };
        self.render(engine, merged)?;
        self.defer_hook(engine, HOOK_AFTER_REFRESH);
        Ok(())
    }

    /// Take the rendered nodes out of the document. With `spacer`, a `<co-spacer>`
    /// keeps the position so a later render lands in the same place.
    pub fn remove(&self, engine: &Engine, spacer: bool) -> Result<()> {
        self.detach_listeners(engine);
        self.run_hook(engine, HOOK_BEFORE_REMOVE)?;

        let roots = self.roots();
        let placeholder = engine.with_dom(|dom| {
            let placeholder = if spacer {
                let anchor = roots
                    .iter()
                    .find_map(|root| dom.parent(*root).map(|parent| (parent, *root)));
                anchor.map(|(parent, first)| {
                    let spacer = dom.create_element("co-spacer");
                    dom.insert_before(parent, spacer, Some(first));
                    spacer
                })
            } else {
                None
            };
            for root in &roots {
                dom.detach(*root);
            }
            placeholder
        });

        if let Some(spacer) = placeholder {
            self.set_roots(vec![spacer]);
            self.set_element(Some(spacer));
            self.set_wrapper(None);
        }
        self.set_state(ComponentState::Removed);
        self.defer_hook(engine, HOOK_AFTER_REMOVE);
        Ok(())
    }

    /// Append the rendered nodes to `target`.
    pub fn append_to(&self, engine: &Engine, target: NodeId) -> Result<()> {
        self.run_hook(engine, HOOK_BEFORE_APPEND)?;
        let roots = self.roots();
        engine.with_dom(|dom| {
            for root in &roots {
                dom.append_child(target, *root);
            }
        });
        self.set_state(ComponentState::Rendered);
        self.defer_hook(engine, HOOK_AFTER_APPEND);
        Ok(())
    }

    /// Drop everything except function-valued extras.
    pub fn release(&self) {
        self.inner
            .extras
            .borrow_mut()
            .retain(|_, value| value.is_callable());
        self.set_data(Value::Undefined);
        if let Value::Object(status) = &self.inner.status {
            status.borrow_mut().clear();
        }
        *self.inner.trigger.borrow_mut() = Value::new_object();
        self.inner.listeners.borrow_mut().clear();
        self.set_element(None);
        self.set_wrapper(None);
        self.set_roots(Vec::new());
        self.set_state(ComponentState::Released);
    }

    /// Invoke the listener registered under `trigger[name][event_type]`.
    pub fn fire(&self, engine: &Engine, name: &str, event_type: &str) -> Result<()> {
        let handler = self
            .trigger()
            .get(name)
            .and_then(|types| types.get(event_type))
            .filter(|h| h.is_callable());
        let Some(handler) = handler else {
            debug!(component = %self.id(), trigger = name, event_type, "no trigger registered");
            return Ok(());
        };
        let target = self.element();
        let event = engine.event_object(event_type, target);
        let this = target.map(Value::Node).unwrap_or_default();
        engine
            .interp()
            .call(&handler, this, &[event])
            .map_err(|e| TemplateError::callback(&self.template_id(), name, e))?;
        Ok(())
    }
}
