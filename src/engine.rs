//! The engine: every piece of process-wide state in one resettable container.
//!
//! `Engine` is a cheap handle (`Rc`) so script natives, deferred tasks and component
//! scopes can reach it through the interpreter. Each field sits behind its own cell
//! and is only borrowed for the duration of a single operation, never across script
//! evaluation.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use crate::cache::{self, TemplateCache};
use crate::compiler::{self, CompiledTemplate};
use crate::component::ComponentScope;
use crate::config::Config;
use crate::discovery;
use crate::dom::{attrs_to_string, Dom, ElementChild, NodeId};
use crate::error::{Result, TemplateError};
use crate::i18n::I18nRegistry;
use crate::loader::{self, Fetcher, FsFetcher, LoadCallback, LoadReport, LoadRequest};
use crate::matcher::Matcher;
use crate::render::{self, RenderOptions};
use crate::rules::RuleSet;
use crate::script::builtins::{install_globals, library_object};
use crate::script::{Interp, Scope, Value};
use crate::ssr;
use crate::tasks::{Task, TaskQueue};

/// Upper bound on tasks run by one [`Engine::run_until_idle`] call.
const MAX_IDLE_TASKS: usize = 100_000;

pub type LiveReloadHook = Rc<dyn Fn(&Engine, &ComponentScope)>;

struct EngineInner {
    config: RefCell<Config>,
    dom: RefCell<Dom>,
    cache: RefCell<TemplateCache>,
    i18n: RefCell<I18nRegistry>,
    tasks: RefCell<TaskQueue>,
    globals: RefCell<Rc<Scope>>,
    namespace: RefCell<Value>,
    standard: Rc<Matcher>,
    custom: RefCell<Option<Rc<Matcher>>>,
    live_reload: RefCell<Option<LiveReloadHook>>,
    fetcher: RefCell<Rc<dyn Fetcher>>,
    next_component: Cell<u64>,
    call_depth: Cell<usize>,
    /// Innermost failing statement: function text and offset.
    fault: RefCell<Option<(Rc<str>, u32)>>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn fresh_globals(namespace: &Value) -> Rc<Scope> {
    let globals = Scope::global();
    install_globals(&globals);
    globals.define("co", library_object());
    globals.define("templates", namespace.clone());
    globals
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let namespace = Value::new_object();
        let dom = Dom::new(&config.language);
        Self {
            inner: Rc::new(EngineInner {
                globals: RefCell::new(fresh_globals(&namespace)),
                namespace: RefCell::new(namespace),
                config: RefCell::new(config),
                dom: RefCell::new(dom),
                cache: RefCell::new(TemplateCache::new()),
                i18n: RefCell::new(I18nRegistry::new()),
                tasks: RefCell::new(TaskQueue::new()),
                standard: Matcher::standard(),
                custom: RefCell::new(None),
                live_reload: RefCell::new(None),
                fetcher: RefCell::new(Rc::new(FsFetcher::new("."))),
                next_component: Cell::new(0),
                call_depth: Cell::new(0),
                fault: RefCell::new(None),
            }),
        }
    }

    /// Drop every template, translation, pending task, global and DOM node.
    /// Configuration and fetcher are kept.
    pub fn reset(&self) {
        let language = self.inner.config.borrow().language.clone();
        let namespace = Value::new_object();
        *self.inner.globals.borrow_mut() = fresh_globals(&namespace);
        *self.inner.namespace.borrow_mut() = namespace;
        *self.inner.dom.borrow_mut() = Dom::new(&language);
        self.inner.cache.borrow_mut().clear();
        self.inner.i18n.borrow_mut().clear();
        *self.inner.tasks.borrow_mut() = TaskQueue::new();
        *self.inner.custom.borrow_mut() = None;
        *self.inner.live_reload.borrow_mut() = None;
        self.inner.next_component.set(0);
        self.inner.call_depth.set(0);
        self.clear_fault();
        debug!("engine reset");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATE ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> Config {
        self.inner.config.borrow().clone()
    }

    pub fn set_config(&self, config: Config) {
        let language = config.language.clone();
        *self.inner.config.borrow_mut() = config;
        self.with_dom(|dom| dom.set_language(&language));
    }

    pub fn interp(&self) -> Interp {
        Interp::new(self)
    }

    pub fn globals(&self) -> Rc<Scope> {
        self.inner.globals.borrow().clone()
    }

    pub fn call_depth(&self) -> &Cell<usize> {
        &self.inner.call_depth
    }

    /// Remember where a statement failed. Within one function text the innermost
    /// statement wins; an enclosing function's statement replaces a nested one.
    pub fn record_fault(&self, text: &Rc<str>, offset: u32) {
        let mut fault = self.inner.fault.borrow_mut();
        if let Some((seen, _)) = fault.as_ref() {
            if Rc::ptr_eq(seen, text) {
                return;
            }
        }
        *fault = Some((text.clone(), offset));
    }

    pub fn take_fault(&self) -> Option<(Rc<str>, u32)> {
        self.inner.fault.borrow_mut().take()
    }

    pub fn clear_fault(&self) {
        self.inner.fault.borrow_mut().take();
    }

    /// Run `f` with the document borrowed mutably. `f` must not call back into script.
    pub fn with_dom<R>(&self, f: impl FnOnce(&mut Dom) -> R) -> R {
        f(&mut self.inner.dom.borrow_mut())
    }

    pub fn body(&self) -> NodeId {
        self.with_dom(|dom| dom.body())
    }

    pub fn head(&self) -> NodeId {
        self.with_dom(|dom| dom.head())
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        self.with_dom(|dom| dom.outer_html(node))
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        self.with_dom(|dom| dom.inner_html(node))
    }

    /// The `templates` namespace object.
    pub fn namespace(&self) -> Value {
        self.inner.namespace.borrow().clone()
    }

    pub(crate) fn next_component_id(&self) -> u64 {
        let id = self.inner.next_component.get() + 1;
        self.inner.next_component.set(id);
        id
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TASK QUEUE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn schedule(&self, label: &'static str, delay_ms: u64, task: Task) {
        trace!(label, delay_ms, "task scheduled");
        self.inner.tasks.borrow_mut().schedule(label, delay_ms, task);
    }

    /// Virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.inner.tasks.borrow().now()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Run every task due at the current time, including tasks they schedule
    /// with no delay. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.tasks.borrow_mut().pop_due();
            let Some((label, task)) = next else {
                break;
            };
            trace!(label, "task run");
            task(self);
            ran += 1;
        }
        ran
    }

    /// Move the clock forward by `ms`, running tasks in due order.
    pub fn advance(&self, ms: u64) -> usize {
        let target = self.now() + ms;
        let mut ran = self.run_pending();
        loop {
            let due = self.inner.tasks.borrow().next_due();
            match due {
                Some(due) if due <= target => {
                    self.inner.tasks.borrow_mut().set_now(due);
                    ran += self.run_pending();
                }
                _ => break,
            }
        }
        self.inner.tasks.borrow_mut().set_now(target);
        ran
    }

    /// Run tasks, advancing the clock as needed, until the queue is empty.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = self.run_pending();
        loop {
            if ran >= MAX_IDLE_TASKS {
                warn!(ran, "task queue did not settle");
                break;
            }
            let due = self.inner.tasks.borrow().next_due();
            let Some(due) = due else {
                break;
            };
            self.inner.tasks.borrow_mut().set_now(due);
            ran += self.run_pending();
        }
        ran
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPILATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Matcher used by `compile`: the rule-set override, or the built-in set.
    pub fn matcher(&self) -> Rc<Matcher> {
        match &*self.inner.custom.borrow() {
            Some(custom) => custom.clone(),
            None => self.inner.standard.clone(),
        }
    }

    /// Replace the rule set used by subsequent compiles.
    pub fn set_rules(&self, rules: &RuleSet) -> Result<()> {
        let matcher = Matcher::build(rules, self.config().throw_error)?;
        debug!(rules = ?matcher.rule_names(), "rule set replaced");
        *self.inner.custom.borrow_mut() = Some(Rc::new(matcher));
        Ok(())
    }

    pub fn clear_rules(&self) {
        *self.inner.custom.borrow_mut() = None;
    }

    pub fn compile(&self, id: &str, text: &str) -> Result<Rc<CompiledTemplate>> {
        self.compile_with_matcher(id, text, self.matcher())
    }

    /// Compile with a one-off rule set.
    pub fn compile_with_rules(
        &self,
        id: &str,
        text: &str,
        rules: &RuleSet,
    ) -> Result<Rc<CompiledTemplate>> {
        let matcher = Matcher::build(rules, self.config().throw_error)?;
        self.compile_with_matcher(id, text, Rc::new(matcher))
    }

    fn compile_with_matcher(
        &self,
        id: &str,
        text: &str,
        matcher: Rc<Matcher>,
    ) -> Result<Rc<CompiledTemplate>> {
        let template = Rc::new(compiler::compile(self, id, text, matcher)?);
        self.register(template.clone());
        debug!(template_id = %id, "template compiled");
        Ok(template)
    }

    /// Compile unless `id` is cached with identical text.
    pub fn compile_if_changed(&self, id: &str, text: &str) -> Result<Rc<CompiledTemplate>> {
        let cached = {
            let cache = self.inner.cache.borrow();
            if cache.is_unchanged(id, text) {
                cache.get(id)
            } else {
                None
            }
        };
        match cached {
            Some(template) => {
                trace!(template_id = %id, "template unchanged");
                Ok(template)
            }
            None => self.compile(id, text),
        }
    }

    /// Compile the text content of an element, keyed by its `id` attribute.
    pub fn compile_element(&self, node: NodeId) -> Result<Rc<CompiledTemplate>> {
        let (id, text) = self.with_dom(|dom| {
            (
                dom.get_attribute(node, "id").map(str::to_string),
                dom.text_content(node),
            )
        });
        let id = id.ok_or_else(|| {
            TemplateError::Config("template element has no id attribute".to_string())
        })?;
        self.compile(&id, &text)
    }

    /// Compile every `<script type="text/co-template" id=..>` below `node`.
    pub fn register_container(&self, node: NodeId, remove_source: bool) -> Result<Vec<String>> {
        discovery::register_container(self, node, remove_source)
    }

    /// Compile every `*.html` file below `dir`.
    pub fn register_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        discovery::register_dir(self, dir.as_ref())
    }

    fn register(&self, template: Rc<CompiledTemplate>) {
        let id = template.id.clone();
        self.inner.cache.borrow_mut().insert(template.clone());
        cache::project(&self.namespace(), &id, Value::Template(template));
    }

    pub fn get(&self, id: &str) -> Option<Rc<CompiledTemplate>> {
        self.inner.cache.borrow().get(id)
    }

    pub fn template_ids(&self) -> Vec<String> {
        self.inner.cache.borrow().ids()
    }

    /// Re-key a compiled template. Existing scopes keep working.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let template = self
            .inner
            .cache
            .borrow_mut()
            .remove(old)
            .ok_or_else(|| TemplateError::NotFound(old.to_string()))?;
        cache::unproject(&self.namespace(), old);
        let renamed = Rc::new(CompiledTemplate {
            id: new.to_string(),
            function: template.function.clone(),
            matcher: template.matcher.clone(),
            hash: template.hash.clone(),
            source: template.source.clone(),
            text: template.text.clone(),
            degraded: template.degraded,
        });
        self.register(renamed);
        debug!(from = %old, to = %new, "template renamed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RENDERING
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn render(&self, id: &str, data: Value, options: RenderOptions) -> Result<ComponentScope> {
        let template = self
            .get(id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))?;
        render::render(self, &template, data, options)
    }

    pub fn render_template(
        &self,
        template: &Rc<CompiledTemplate>,
        data: Value,
        options: RenderOptions,
    ) -> Result<ComponentScope> {
        render::render(self, template, data, options)
    }

    /// Render detached and serialize with the hydration markers.
    pub fn render_to_string(&self, id: &str, data: Value) -> Result<String> {
        ssr::render_to_string(self, id, data)
    }

    /// Re-render every server-rendered block below `container` in place.
    pub fn hydrate(&self, container: NodeId) -> Result<Vec<ComponentScope>> {
        ssr::hydrate(self, container)
    }

    pub fn set_live_reload(&self, hook: impl Fn(&Engine, &ComponentScope) + 'static) {
        *self.inner.live_reload.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn clear_live_reload(&self) {
        *self.inner.live_reload.borrow_mut() = None;
    }

    pub(crate) fn notify_live_reload(&self, component: &ComponentScope) {
        let hook = self.inner.live_reload.borrow().clone();
        if let Some(hook) = hook {
            hook(self, component);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // I18N
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn add_i18n<I, L, S>(&self, key: &str, translations: I)
    where
        I: IntoIterator<Item = (L, S)>,
        L: Into<String>,
        S: Into<String>,
    {
        self.inner.i18n.borrow_mut().add(key, translations);
    }

    pub fn add_i18n_json(&self, prefix: &str, json: &serde_json::Value) -> Result<()> {
        self.inner.i18n.borrow_mut().add_json(prefix, json)
    }

    /// Translation of `key` in the current language, or the key itself.
    pub fn i18n(&self, key: &str) -> String {
        self.i18n_for(None, key)
    }

    pub fn i18n_for(&self, template_id: Option<&str>, key: &str) -> String {
        let language = self.language();
        self.inner.i18n.borrow().lookup(template_id, key, &language)
    }

    /// The `i18n` function handed to a template: lookups try `<template_id>.<key>` first.
    pub(crate) fn i18n_accessor(&self, template_id: &str) -> Value {
        let id = template_id.to_string();
        Value::native("i18n", move |interp, _, args| {
            let key = args.first().map(|k| k.to_display()).unwrap_or_default();
            Ok(Value::str(interp.engine().i18n_for(Some(&id), &key)))
        })
    }

    pub fn language(&self) -> String {
        self.with_dom(|dom| dom.language())
    }

    pub fn set_language(&self, language: &str) {
        self.inner.config.borrow_mut().language = language.to_string();
        self.with_dom(|dom| dom.set_language(language));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DOM HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn create_element(
        &self,
        tag: &str,
        attrs: &[(String, String)],
        children: &[ElementChild],
    ) -> NodeId {
        self.with_dom(|dom| dom.build_element(tag, attrs, children))
    }

    pub fn attrs_to_string(attrs: &[(String, String)]) -> String {
        attrs_to_string(attrs)
    }

    /// Event object with `stopPropagation` and `preventDefault`.
    pub fn event_object(&self, event_type: &str, target: Option<NodeId>) -> Value {
        let event = Value::new_object();
        event.set("type", Value::str(event_type));
        let target = target.map(Value::Node).unwrap_or(Value::Null);
        event.set("target", target.clone());
        event.set("currentTarget", target);
        event.set("cancelBubble", Value::Bool(false));
        event.set("defaultPrevented", Value::Bool(false));
        event.set(
            "stopPropagation",
            Value::native("stopPropagation", |_, this, _| {
                this.set("cancelBubble", Value::Bool(true));
                Ok(Value::Undefined)
            }),
        );
        event.set(
            "preventDefault",
            Value::native("preventDefault", |_, this, _| {
                this.set("defaultPrevented", Value::Bool(true));
                Ok(Value::Undefined)
            }),
        );
        event
    }

    /// Dispatch a bubbling event at `target`. Returns false if a listener called
    /// `preventDefault`.
    pub fn dispatch_event(&self, target: NodeId, event_type: &str) -> Result<bool> {
        let event = self.event_object(event_type, Some(target));
        let path = self.with_dom(|dom| dom.event_path(target));
        for node in path {
            let handlers = self.with_dom(|dom| dom.listeners_for(node, event_type));
            if handlers.is_empty() {
                continue;
            }
            event.set("currentTarget", Value::Node(node));
            for handler in handlers {
                if let Err(e) = self
                    .interp()
                    .call(&handler, Value::Node(node), &[event.clone()])
                {
                    error!(event_type, error = %e, "event listener failed");
                    if self.config().throw_error {
                        return Err(e.into());
                    }
                }
            }
            if event.get("cancelBubble").map(|v| v.truthy()).unwrap_or(false) {
                break;
            }
        }
        Ok(!event
            .get("defaultPrevented")
            .map(|v| v.truthy())
            .unwrap_or(false))
    }

    /// Invoke the listener a component registered under `trigger[name][event_type]`.
    pub fn fire(&self, component: &ComponentScope, name: &str, event_type: &str) -> Result<()> {
        component.fire(self, name, event_type)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOADING
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_fetcher(&self, fetcher: impl Fetcher + 'static) {
        *self.inner.fetcher.borrow_mut() = Rc::new(fetcher);
    }

    pub fn fetcher(&self) -> Rc<dyn Fetcher> {
        self.inner.fetcher.borrow().clone()
    }

    /// Fetch and register one resource. `callback` runs once it settled.
    pub fn load(&self, request: LoadRequest, callback: impl FnOnce(&Engine, &LoadReport) + 'static) {
        self.load_batch(vec![request], callback);
    }

    /// Fetch and register several resources. `callback` runs once all settled,
    /// failed ones included.
    pub fn load_batch(
        &self,
        requests: Vec<LoadRequest>,
        callback: impl FnOnce(&Engine, &LoadReport) + 'static,
    ) {
        let callback: LoadCallback = Box::new(callback);
        loader::load_batch(self, requests, callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_state() {
        let engine = Engine::default();
        engine.compile("a.b", "<p>x</p>").unwrap();
        engine.add_i18n("k", [("en", "v")]);
        engine.interp().run("leaked = 1").unwrap();
        engine.reset();
        assert!(engine.get("a.b").is_none());
        assert_eq!(engine.i18n("k"), "k");
        assert!(engine.interp().eval("leaked").is_err());
        assert!(engine.namespace().get("a").is_none());
    }

    #[test]
    fn test_advance_runs_due_tasks_in_order() {
        let engine = Engine::default();
        engine.interp().run("log = []").unwrap();
        engine
            .interp()
            .run("setTimeout(() => log.push('b'), 20); setTimeout(() => log.push('a'), 5)")
            .unwrap();
        engine.advance(10);
        assert_eq!(engine.interp().eval("log.join()").unwrap().to_display(), "a");
        engine.run_until_idle();
        assert_eq!(engine.interp().eval("log.join()").unwrap().to_display(), "a,b");
        assert_eq!(engine.now(), 20);
    }

    #[test]
    fn test_dispatch_bubbles_until_stopped() {
        let engine = Engine::default();
        engine.interp().run("hits = []").unwrap();
        let outer = engine.create_element("div", &[], &[]);
        let inner = engine.create_element("span", &[], &[]);
        engine.with_dom(|dom| dom.append_child(outer, inner));
        let push = |name: &'static str, stop: bool| {
            Value::native(name, move |interp, _, args| {
                let hits = interp.eval("hits")?;
                interp.call(&interp.get_member(&hits, "push")?, hits, &[Value::str(name)])?;
                if stop {
                    let event = args[0].clone();
                    interp.call(&interp.get_member(&event, "stopPropagation")?, event, &[])?;
                }
                Ok(Value::Undefined)
            })
        };
        engine.with_dom(|dom| {
            dom.add_listener(outer, "click", push("outer", false));
            dom.add_listener(inner, "click", push("inner", false));
        });
        engine.dispatch_event(inner, "click").unwrap();
        assert_eq!(engine.interp().eval("hits.join()").unwrap().to_display(), "inner,outer");

        engine.with_dom(|dom| dom.add_listener(inner, "tap", push("stop", true)));
        engine.with_dom(|dom| dom.add_listener(outer, "tap", push("never", false)));
        engine.dispatch_event(inner, "tap").unwrap();
        assert!(!engine
            .interp()
            .eval("hits.join()")
            .unwrap()
            .to_display()
            .contains("never"));
    }
}
