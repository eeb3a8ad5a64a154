//! # co-template
//!
//! HTML templating and micro-components with `##` directives.
//!
//! ## Pipeline
//!
//! 1. **Match**: the rule set is folded into one alternation regex; capture group
//!    N belongs to rule N, so registration order breaks ties.
//! 2. **Parse**: literal text becomes `__out += '…';`, every directive match is
//!    handed to its rule, which returns generated code.
//! 3. **Compile**: the code is wrapped with a fixed parameter list
//!    (`data, status, component, i18n, co, templates, __lazy, __debug`) and parsed
//!    into a script function that is shared by every render.
//! 4. **Render (eager)**: the function returns an HTML string. Attribute directives
//!    leave `data-co-*="<index>"` markers and push their payloads into the
//!    per-render lazy scope.
//! 5. **Render (lazy)**: the string is parsed into nodes and each lazy rule walks its
//!    array in index order, resolves the marker, removes it, and applies the effect
//!    (listeners, refs, props, inserts, lazy blocks).
//!
//! ## State
//!
//! All process-wide state (template cache, `templates` namespace, i18n, document,
//! task queue, script globals) lives in one [`Engine`], which can be reset.
//! Deferred work (after-append/after-remove hooks, non-blocking inserts, timers,
//! loads) goes through the engine's task queue and only runs when the host drives
//! it with [`Engine::run_pending`], [`Engine::advance`] or [`Engine::run_until_idle`].

pub mod cache;
pub mod compiler;
pub mod component;
pub mod config;
pub mod discovery;
pub mod dom;
pub mod engine;
pub mod error;
pub mod escape;
pub mod html;
pub mod i18n;
pub mod lazy;
pub mod loader;
pub mod matcher;
pub mod parse;
pub mod render;
pub mod rules;
pub mod script;
pub mod ssr;
pub mod tasks;

#[cfg(test)]
mod component_tests;
#[cfg(test)]
mod render_tests;

pub use compiler::CompiledTemplate;
pub use component::{ComponentScope, ComponentState};
pub use config::Config;
pub use dom::{Dom, ElementChild, NodeId};
pub use engine::Engine;
pub use error::{Result, TemplateError};
pub use loader::{Fetcher, FsFetcher, LoadKinds, LoadReport, LoadRequest};
pub use matcher::Matcher;
pub use render::RenderOptions;
pub use rules::{CompileContext, Directive, FnRule, Rule, RuleSet};
pub use script::{ScriptError, Value};
