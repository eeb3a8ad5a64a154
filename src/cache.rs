//! Compiled template registry and the `templates` namespace.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::rc::Rc;

use crate::compiler::CompiledTemplate;
use crate::script::Value;

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Templates by id. Entries never expire; a recompile overwrites.
#[derive(Default)]
pub struct TemplateCache {
    templates: IndexMap<String, Rc<CompiledTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Rc<CompiledTemplate>> {
        self.templates.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Store a template, returning the one it replaced.
    pub fn insert(&mut self, template: Rc<CompiledTemplate>) -> Option<Rc<CompiledTemplate>> {
        self.templates.insert(template.id.clone(), template)
    }

    pub fn remove(&mut self, id: &str) -> Option<Rc<CompiledTemplate>> {
        self.templates.shift_remove(id)
    }

    /// True when `id` is cached and was compiled from exactly `text`.
    pub fn is_unchanged(&self, id: &str, text: &str) -> bool {
        self.templates
            .get(id)
            .map(|t| t.hash == compute_hash(text))
            .unwrap_or(false)
    }

    pub fn ids(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACE PROJECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// `user-card` / `user_card` → `userCard`.
pub fn camel_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper = false;
    for c in segment.chars() {
        if c == '-' || c == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Namespace path for a dotted id. Ids without a dot are not projected.
pub fn namespace_path(id: &str) -> Option<Vec<String>> {
    if !id.contains('.') {
        return None;
    }
    let path: Vec<String> = id
        .split('.')
        .filter(|s| !s.is_empty())
        .map(camel_segment)
        .collect();
    (path.len() > 1).then_some(path)
}

/// Place `value` at the namespace path of `id`, creating intermediate objects.
pub fn project(namespace: &Value, id: &str, value: Value) {
    let Some(path) = namespace_path(id) else {
        return;
    };
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };
    let mut level = namespace.clone();
    for segment in parents {
        level = match level.get(segment) {
            Some(next @ Value::Object(_)) => next,
            _ => {
                let next = Value::new_object();
                level.set(segment, next.clone());
                next
            }
        };
    }
    level.set(leaf, value);
}

/// Remove the namespace entry of `id`, if present.
pub fn unproject(namespace: &Value, id: &str) {
    let Some(path) = namespace_path(id) else {
        return;
    };
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };
    let mut level = namespace.clone();
    for segment in parents {
        match level.get(segment) {
            Some(next @ Value::Object(_)) => level = next,
            _ => return,
        }
    }
    if let Value::Object(map) = &level {
        map.borrow_mut().shift_remove(leaf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
        assert_eq!(compute_hash("").len(), 64);
    }

    #[test]
    fn test_namespace_paths() {
        assert_eq!(
            namespace_path("app.user-card"),
            Some(vec!["app".to_string(), "userCard".to_string()])
        );
        assert_eq!(
            namespace_path("shop.cart_item.big-row"),
            Some(vec!["shop".to_string(), "cartItem".to_string(), "bigRow".to_string()])
        );
        assert_eq!(namespace_path("plain"), None);
    }

    #[test]
    fn test_project_and_unproject() {
        let ns = Value::new_object();
        project(&ns, "app.user-card", Value::str("card"));
        project(&ns, "app.list", Value::str("list"));
        let app = ns.get("app").unwrap();
        assert_eq!(app.get("userCard").unwrap().to_display(), "card");
        unproject(&ns, "app.user-card");
        assert!(app.get("userCard").is_none());
        assert!(app.get("list").is_some());
    }
}
