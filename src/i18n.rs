//! Translation registry.
//!
//! Keys are dotted paths. A path ends in a translation set mapping language codes to
//! strings. Lookup falls back from the exact language (`de-AT`) to its base (`de`),
//! then to `en`, then to the first registered translation.

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Result, TemplateError};

#[derive(Debug, Clone)]
enum I18nNode {
    Branch(IndexMap<String, I18nNode>),
    Leaf(IndexMap<String, String>),
}

#[derive(Debug, Default)]
pub struct I18nRegistry {
    root: IndexMap<String, I18nNode>,
}

impl I18nRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.root.clear();
    }

    /// Register (or extend) the translation set at `key`.
    pub fn add<I, L, S>(&mut self, key: &str, translations: I)
    where
        I: IntoIterator<Item = (L, S)>,
        L: Into<String>,
        S: Into<String>,
    {
        let segments: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut level = &mut self.root;
        for segment in parents {
            let entry = level
                .entry(segment.to_string())
                .or_insert_with(|| I18nNode::Branch(IndexMap::new()));
            if let I18nNode::Leaf(_) = entry {
                *entry = I18nNode::Branch(IndexMap::new());
            }
            level = match entry {
                I18nNode::Branch(children) => children,
                I18nNode::Leaf(_) => return,
            };
        }

        let leaf = level
            .entry(last.to_string())
            .or_insert_with(|| I18nNode::Leaf(IndexMap::new()));
        if let I18nNode::Branch(_) = leaf {
            *leaf = I18nNode::Leaf(IndexMap::new());
        }
        if let I18nNode::Leaf(set) = leaf {
            for (lang, text) in translations {
                set.insert(lang.into(), text.into());
            }
        }
        debug!(key, "registered translations");
    }

    /// Register a JSON tree under `prefix`. Objects whose values are all strings are
    /// translation sets; other objects are branches.
    pub fn add_json(&mut self, prefix: &str, json: &serde_json::Value) -> Result<()> {
        let map = json.as_object().ok_or_else(|| {
            TemplateError::Config(format!("i18n entry '{}' must be an object", prefix))
        })?;
        if map.values().all(|v| v.is_string()) {
            let set = map
                .iter()
                .filter_map(|(lang, text)| text.as_str().map(|t| (lang.clone(), t.to_string())));
            self.add(prefix, set);
            return Ok(());
        }
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            self.add_json(&path, value)?;
        }
        Ok(())
    }

    fn find(&self, key: &str) -> Option<&IndexMap<String, String>> {
        let mut level = &self.root;
        let mut segments = key.split('.').peekable();
        while let Some(segment) = segments.next() {
            match level.get(segment)? {
                I18nNode::Branch(children) => level = children,
                I18nNode::Leaf(set) => {
                    return if segments.peek().is_none() {
                        Some(set)
                    } else {
                        None
                    };
                }
            }
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Translation of `key` for `language`, if the key exists.
    pub fn resolve(&self, key: &str, language: &str) -> Option<String> {
        let set = self.find(key)?;
        let base = language.split(['-', '_']).next().unwrap_or(language);
        set.get(language)
            .or_else(|| set.get(base))
            .or_else(|| set.get("en"))
            .or_else(|| set.values().next())
            .cloned()
    }

    /// Lookup used by templates: `<template_id>.<key>` first, then `key`, else the key itself.
    pub fn lookup(&self, template_id: Option<&str>, key: &str, language: &str) -> String {
        if let Some(id) = template_id {
            if let Some(text) = self.resolve(&format!("{}.{}", id, key), language) {
                return text;
            }
        }
        self.resolve(key, language).unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> I18nRegistry {
        let mut reg = I18nRegistry::new();
        reg.add("greeting", [("en", "Hello"), ("de", "Hallo")]);
        reg.add("app.card.title", [("fr", "Carte"), ("en", "Card")]);
        reg
    }

    #[test]
    fn test_language_fallbacks() {
        let reg = registry();
        assert_eq!(reg.resolve("greeting", "de").as_deref(), Some("Hallo"));
        assert_eq!(reg.resolve("greeting", "de-AT").as_deref(), Some("Hallo"));
        assert_eq!(reg.resolve("greeting", "ja").as_deref(), Some("Hello"));
        let mut only_fr = I18nRegistry::new();
        only_fr.add("x", [("fr", "oui")]);
        assert_eq!(only_fr.resolve("x", "de").as_deref(), Some("oui"));
    }

    #[test]
    fn test_template_scoped_lookup() {
        let reg = registry();
        assert_eq!(reg.lookup(Some("app.card"), "title", "fr"), "Carte");
        assert_eq!(reg.lookup(Some("app.card"), "greeting", "en"), "Hello");
        assert_eq!(reg.lookup(None, "missing.key", "en"), "missing.key");
        // a branch is not a translation
        assert!(reg.resolve("app.card", "en").is_none());
    }

    #[test]
    fn test_add_json_tree() {
        let mut reg = I18nRegistry::new();
        let json = serde_json::json!({
            "nav": { "home": { "en": "Home", "de": "Start" } },
            "bye": { "en": "Bye" }
        });
        reg.add_json("site", &json).unwrap();
        assert_eq!(reg.resolve("site.nav.home", "de").as_deref(), Some("Start"));
        assert!(reg.contains("site.bye"));
        assert!(reg.add_json("bad", &serde_json::json!("text")).is_err());
    }
}
