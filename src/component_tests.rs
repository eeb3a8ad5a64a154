#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use crate::component::ComponentState;
    use crate::render::RenderOptions;
    use crate::script::Value;
    use crate::{ComponentScope, Engine, NodeId};

    fn mount(engine: &Engine) -> NodeId {
        let div = engine.create_element("div", &[], &[]);
        let body = engine.body();
        engine.with_dom(|dom| dom.append_child(body, div));
        div
    }

    fn record_hooks(scope: &ComponentScope, hooks: &[&'static str]) -> Rc<RefCell<Vec<&'static str>>> {
        let calls = Rc::new(RefCell::new(Vec::new()));
        for &hook in hooks {
            let calls = calls.clone();
            scope.set_extra(
                hook,
                Value::native(hook, move |_, this, _| {
                    assert!(this.as_component().is_some());
                    calls.borrow_mut().push(hook);
                    Ok(Value::Undefined)
                }),
            );
        }
        calls
    }

    #[test]
    fn test_refresh_merges_shallowly() {
        let engine = Engine::default();
        engine
            .compile("greet", "<p>##= data.greeting ##, ##= data.name ##</p>")
            .unwrap();
        let target = mount(&engine);
        let scope = engine
            .render(
                "greet",
                Value::from(json!({ "greeting": "Hi", "name": "Ann" })),
                RenderOptions::with_target(target),
            )
            .unwrap();
        let calls = record_hooks(&scope, &["beforeRefresh", "afterRefresh"]);

        scope
            .refresh(&engine, Value::from(json!({ "name": "Bob" })))
            .unwrap();
        assert_eq!(engine.inner_html(target), "<p>Hi, Bob</p>");
        assert_eq!(scope.data().get("greeting").unwrap().to_display(), "Hi");
        assert_eq!(*calls.borrow(), vec!["beforeRefresh"]);
        engine.run_pending();
        assert_eq!(*calls.borrow(), vec!["beforeRefresh", "afterRefresh"]);
    }

    #[test]
    fn test_refresh_in_place_keeps_position() {
        let engine = Engine::default();
        engine.compile("item", "<li>##= data.label ##</li>").unwrap();
        let list = engine.create_element("ul", &[], &[]);
        let tail = engine.create_element("li", &[], &[]);
        engine.with_dom(|dom| dom.append_child(list, tail));

        let scope = engine
            .render("item", Value::from(json!({ "label": "a" })), RenderOptions::default())
            .unwrap();
        let first = scope.element().unwrap();
        engine.with_dom(|dom| dom.insert_before(list, first, Some(tail)));

        scope.refresh(&engine, Value::from(json!({ "label": "b" }))).unwrap();
        assert_eq!(engine.inner_html(list), "<li>b</li><li></li>");
        assert_ne!(scope.element(), Some(first));
    }

    #[test]
    fn test_recompile_does_not_touch_existing_scopes() {
        let engine = Engine::default();
        engine.compile("v", "<p>one</p>").unwrap();
        let old = engine
            .render("v", Value::from(json!({})), RenderOptions::default())
            .unwrap();
        engine.compile("v", "<p>two</p>").unwrap();
        let new = engine
            .render("v", Value::from(json!({})), RenderOptions::default())
            .unwrap();

        assert!(!Rc::ptr_eq(&old.template(), &new.template()));
        assert_eq!(engine.outer_html(new.element().unwrap()), "<p>two</p>");

        let target = mount(&engine);
        old.append_to(&engine, target).unwrap();
        old.render(&engine, Value::from(json!({}))).unwrap();
        assert_eq!(engine.inner_html(target), "<p>one</p>");
    }

    #[test]
    fn test_remove_with_and_without_spacer() {
        let engine = Engine::default();
        engine.compile("chip", "<span>##= data.t ##</span>").unwrap();
        let target = mount(&engine);
        let scope = engine
            .render("chip", Value::from(json!({ "t": "a" })), RenderOptions::with_target(target))
            .unwrap();
        let calls = record_hooks(&scope, &["beforeRemove", "afterRemove"]);

        scope.remove(&engine, true).unwrap();
        assert_eq!(engine.inner_html(target), "<co-spacer></co-spacer>");
        assert_eq!(scope.state(), ComponentState::Removed);
        assert_eq!(*calls.borrow(), vec!["beforeRemove"]);
        engine.run_pending();
        assert_eq!(*calls.borrow(), vec!["beforeRemove", "afterRemove"]);

        scope.render(&engine, Value::from(json!({ "t": "b" }))).unwrap();
        assert_eq!(engine.inner_html(target), "<span>b</span>");
        assert_eq!(scope.state(), ComponentState::Rendered);

        scope.remove(&engine, false).unwrap();
        assert_eq!(engine.inner_html(target), "");
    }

    #[test]
    fn test_append_to_runs_hooks_in_order() {
        let engine = Engine::default();
        engine.compile("tag", "<b>x</b>").unwrap();
        let scope = engine
            .render("tag", Value::from(json!({})), RenderOptions::default())
            .unwrap();
        let calls = record_hooks(&scope, &["beforeAppendTo", "afterAppendTo"]);
        let target = mount(&engine);
        scope.append_to(&engine, target).unwrap();
        assert_eq!(engine.inner_html(target), "<b>x</b>");
        assert_eq!(*calls.borrow(), vec!["beforeAppendTo"]);
        engine.run_until_idle();
        assert_eq!(*calls.borrow(), vec!["beforeAppendTo", "afterAppendTo"]);
    }

    #[test]
    fn test_status_survives_rerender() {
        let engine = Engine::default();
        engine
            .compile("count", "## status.count = (status.count || 0) + 1; ##<p>##= status.count ##</p>")
            .unwrap();
        let target = mount(&engine);
        let scope = engine
            .render("count", Value::from(json!({})), RenderOptions::with_target(target))
            .unwrap();
        scope.render(&engine, Value::from(json!({}))).unwrap();
        assert_eq!(engine.inner_html(target), "<p>2</p>");
    }

    #[test]
    fn test_component_parameter_exposes_scope() {
        let engine = Engine::default();
        engine
            .compile("self", "<p>##= component.id ##:##= component.templateId ##</p>")
            .unwrap();
        let scope = engine
            .render("self", Value::from(json!({})), RenderOptions::default())
            .unwrap();
        assert_eq!(
            engine.outer_html(scope.element().unwrap()),
            format!("<p>{}:self</p>", scope.id())
        );
    }

    #[test]
    fn test_scope_methods_from_script() {
        let engine = Engine::default();
        engine.compile("note", "<i>##= data.t ##</i>").unwrap();
        let target = mount(&engine);
        let scope = engine
            .render("note", Value::from(json!({ "t": "a" })), RenderOptions::with_target(target))
            .unwrap();
        engine.globals().define("scope", Value::Component(scope.clone()));
        engine.interp().run("scope.refresh({ t: 'b' }); scope.onDone = 1;").unwrap();
        assert_eq!(engine.inner_html(target), "<i>b</i>");
        assert_eq!(scope.extra("onDone").unwrap().to_display(), "1");
    }

    #[test]
    fn test_release_keeps_only_functions() {
        let engine = Engine::default();
        engine.compile("r", "<p>x</p>").unwrap();
        let scope = engine
            .render("r", Value::from(json!({ "a": 1 })), RenderOptions::default())
            .unwrap();
        scope.set_extra("label", Value::str("kept?"));
        scope.set_extra("handler", Value::native("h", |_, _, _| Ok(Value::Undefined)));
        scope.release();
        assert_eq!(scope.state(), ComponentState::Released);
        assert!(scope.data().is_nullish());
        assert!(scope.roots().is_empty());
        assert!(scope.extra("label").is_none());
        assert!(scope.extra("handler").is_some());
    }

    #[test]
    fn test_fire_without_trigger_is_a_no_op() {
        let engine = Engine::default();
        engine.compile("quiet", "<p>x</p>").unwrap();
        let scope = engine
            .render("quiet", Value::from(json!({})), RenderOptions::default())
            .unwrap();
        assert!(engine.fire(&scope, "nothing", "click").is_ok());
    }

    #[test]
    fn test_rename_moves_cache_and_namespace() {
        let engine = Engine::default();
        engine.compile("a.old", "<p>##= data.v ##</p>").unwrap();
        let scope = engine
            .render("a.old", Value::from(json!({ "v": 1 })), RenderOptions::default())
            .unwrap();
        engine.rename("a.old", "b.new").unwrap();

        assert!(engine.get("a.old").is_none());
        assert_eq!(engine.get("b.new").unwrap().id, "b.new");
        let ns = engine.namespace();
        assert!(ns.get("a").and_then(|a| a.get("old")).is_none());
        assert!(ns.get("b").and_then(|b| b.get("new")).is_some());

        scope.render(&engine, Value::from(json!({ "v": 2 }))).unwrap();
        assert_eq!(scope.template_id(), "a.old");
        assert!(engine.rename("missing", "x").is_err());
    }
}
