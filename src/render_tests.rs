#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    use serde_json::json;

    use crate::escape::{escape_html, unescape_html};
    use crate::html;
    use crate::loader::{FsFetcher, LoadReport, LoadRequest};
    use crate::render::{RenderOptions, SHADOW_HOST_ATTR};
    use crate::script::Value;
    use crate::{ComponentScope, Engine, NodeId};

    fn render(engine: &Engine, id: &str, data: Value) -> ComponentScope {
        engine.render(id, data, RenderOptions::default()).unwrap()
    }

    fn html_of(engine: &Engine, scope: &ComponentScope) -> String {
        engine.outer_html(scope.element().unwrap())
    }

    fn eval(engine: &Engine, source: &str) -> Value {
        engine.interp().eval(source).unwrap()
    }

    fn container(engine: &Engine) -> NodeId {
        let div = engine.create_element("div", &[], &[]);
        let body = engine.body();
        engine.with_dom(|dom| dom.append_child(body, div));
        div
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EAGER OUTPUT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_literal_text_renders_verbatim() {
        let engine = Engine::default();
        let text = "<p class=\"x\">It's a \"test\" \\ with\nnewline &amp; more</p>";
        engine.compile("literal", text).unwrap();
        let scope = render(&engine, "literal", Value::from(json!({})));
        assert_eq!(html_of(&engine, &scope), text);
    }

    #[test]
    fn test_raw_and_escaped_output() {
        let engine = Engine::default();
        engine
            .compile(
                "out",
                "<div><span>##= data.html ##</span><span>##- data.html ##</span></div>",
            )
            .unwrap();
        let scope = render(&engine, "out", Value::from(json!({ "html": "<b>x</b>" })));
        assert_eq!(
            html_of(&engine, &scope),
            "<div><span><b>x</b></span><span>&lt;b&gt;x&lt;/b&gt;</span></div>"
        );
        let spans = engine.with_dom(|dom| dom.query_selector_all(scope.element().unwrap(), "span"));
        let text = engine.with_dom(|dom| dom.text_content(spans[1]));
        assert_eq!(text, "<b>x</b>");
        assert_eq!(unescape_html(&escape_html("<b>x</b>")), "<b>x</b>");
    }

    #[test]
    fn test_interpolate_invokes_callables_and_blanks_nullish() {
        let engine = Engine::default();
        engine
            .compile("calls", "<p>##= data.f ##|##= data.missing ##|##= data.zero ##</p>")
            .unwrap();
        let data = eval(&engine, "({ f: function () { return 'called'; }, zero: 0 })");
        let scope = render(&engine, "calls", data);
        assert_eq!(html_of(&engine, &scope), "<p>called||0</p>");
    }

    #[test]
    fn test_evaluate_blocks_drive_loops() {
        let engine = Engine::default();
        engine
            .compile(
                "list",
                "<ul>## for (const item of data.items) { ##<li>##= item ##</li>## } ##</ul>",
            )
            .unwrap();
        let scope = render(&engine, "list", Value::from(json!({ "items": [1, 2] })));
        assert_eq!(html_of(&engine, &scope), "<ul><li>1</li><li>2</li></ul>");
    }

    #[test]
    fn test_empty_data_leaves_placeholder_comment() {
        let engine = Engine::default();
        engine.compile("empty", "<p>x</p>").unwrap();
        let scope = render(&engine, "empty", Value::Null);
        assert_eq!(
            html_of(&engine, &scope),
            format!("<!--co-empty:{}-->", scope.id())
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LAZY BINDINGS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_lazy_indices_reset_per_render() {
        let engine = Engine::default();
        engine.interp().run("hits = []").unwrap();
        engine
            .compile(
                "pair",
                "<div><button data-co-event=\"##:data.a##\">a</button><button data-co-event=\"##:data.b##\">b</button></div>",
            )
            .unwrap();
        let data = eval(
            &engine,
            "({ a: function () { hits.push('a'); }, b: function () { hits.push('b'); } })",
        );
        let first = render(&engine, "pair", data.clone());
        let second = render(&engine, "pair", data);
        for scope in [&first, &second] {
            assert_eq!(
                html_of(&engine, scope),
                "<div><button>a</button><button>b</button></div>"
            );
            assert_eq!(scope.listener_count(), 2);
        }

        let buttons =
            engine.with_dom(|dom| dom.query_selector_all(second.element().unwrap(), "button"));
        engine.dispatch_event(buttons[1], "click").unwrap();
        engine.dispatch_event(buttons[0], "click").unwrap();
        assert_eq!(eval(&engine, "hits.join()").to_display(), "b,a");
    }

    #[test]
    fn test_click_fires_once_per_click_and_detaches_after_remove() {
        let engine = Engine::default();
        engine.interp().run("hits = []").unwrap();
        engine
            .compile("btn", "<button data-co-event=\"##:data.onClick::'payload'##\">go</button>")
            .unwrap();
        let data = eval(
            &engine,
            "({ onClick: function (el, event, ctx) { hits.push(event.type + ':' + ctx.customData + ':' + (ctx.element === el)); } })",
        );
        let target = container(&engine);
        let scope = engine
            .render("btn", data, RenderOptions::with_target(target))
            .unwrap();
        let button = scope.element().unwrap();

        engine.dispatch_event(button, "click").unwrap();
        assert_eq!(eval(&engine, "hits.length").to_display(), "1");
        engine.dispatch_event(button, "click").unwrap();
        assert_eq!(eval(&engine, "hits.join()").to_display(), "click:payload:true,click:payload:true");

        scope.remove(&engine, false).unwrap();
        engine.dispatch_event(button, "click").unwrap();
        assert_eq!(eval(&engine, "hits.length").to_display(), "2");
        assert_eq!(engine.with_dom(|dom| dom.listener_count(button)), 0);
    }

    #[test]
    fn test_bound_listeners_stop_propagation() {
        let engine = Engine::default();
        engine.interp().run("hits = []").unwrap();
        engine
            .compile(
                "nested",
                "<div data-co-event=\"##:data.outer##\"><button data-co-event=\"##:data.inner##\">x</button></div>",
            )
            .unwrap();
        let data = eval(
            &engine,
            "({ outer: function () { hits.push('outer'); }, inner: function () { hits.push('inner'); } })",
        );
        let scope = render(&engine, "nested", data);
        let button = engine
            .with_dom(|dom| dom.query_selector(scope.element().unwrap(), "button"))
            .unwrap();
        engine.dispatch_event(button, "click").unwrap();
        assert_eq!(eval(&engine, "hits.join()").to_display(), "inner");
    }

    #[test]
    fn test_event_map_with_pseudo_events_and_trigger() {
        let engine = Engine::default();
        engine.interp().run("hits = []").unwrap();
        engine
            .compile("menu", "<button data-co-event=\"##:data.events##\">x</button>")
            .unwrap();
        let data = eval(
            &engine,
            "({ events: { triggerName: 'menu', namedElement: 'btn', load: function (el, event) { hits.push(event.type); }, mouseover: function () { hits.push('over'); } } })",
        );
        let scope = render(&engine, "menu", data);
        let button = scope.element().unwrap();

        assert_eq!(eval(&engine, "hits.join()").to_display(), "load");
        assert!(matches!(scope.extra("btn"), Some(Value::Node(n)) if n == button));

        engine.fire(&scope, "menu", "mouseover").unwrap();
        engine.dispatch_event(button, "mouseover").unwrap();
        assert_eq!(eval(&engine, "hits.join()").to_display(), "load,over,over");
        assert_eq!(scope.listener_count(), 1);
    }

    #[test]
    fn test_attribute_directives_bind_after_render() {
        let engine = Engine::default();
        engine.interp().run("seen = []").unwrap();
        engine
            .compile(
                "attrs",
                "<div><input data-co-props=\"##:{ type: 'text', value: data.v }##\"><span data-co-named-element=\"##:'label'##\">x</span><b data-co-element-ref=\"##:data.ref.el##\">r</b><i data-co-load=\"##:data.onLoad::'extra'##\">l</i></div>",
            )
            .unwrap();
        let data = eval(
            &engine,
            "({ v: 'hi', ref: {}, onLoad: function (el, ctx) { seen.push(ctx.customData); seen.push(ctx.element === el); } })",
        );
        let scope = render(&engine, "attrs", data.clone());
        assert_eq!(
            html_of(&engine, &scope),
            "<div><input type=\"text\" value=\"hi\"><span>x</span><b>r</b><i>l</i></div>"
        );

        let span = engine
            .with_dom(|dom| dom.query_selector(scope.element().unwrap(), "span"))
            .unwrap();
        assert!(matches!(scope.extra("label"), Some(Value::Node(n)) if n == span));

        let b = engine
            .with_dom(|dom| dom.query_selector(scope.element().unwrap(), "b"))
            .unwrap();
        let referenced = data.get("ref").and_then(|r| r.get("el"));
        assert!(matches!(referenced, Some(Value::Node(n)) if n == b));
        assert_eq!(eval(&engine, "seen.join()").to_display(), "extra,true");
    }

    #[test]
    fn test_props_from_json_data_keep_key_order() {
        let engine = Engine::default();
        engine
            .compile("ordered", "<b data-co-props=\"##:data.attrs##\">x</b>")
            .unwrap();
        let data = Value::from(json!({ "attrs": { "zeta": "1", "alpha": "2", "mid": 3 } }));
        let scope = render(&engine, "ordered", data);
        assert_eq!(
            html_of(&engine, &scope),
            "<b zeta=\"1\" alpha=\"2\" mid=\"3\">x</b>"
        );
    }

    #[test]
    fn test_lazy_evaluate_sees_rendered_root() {
        let engine = Engine::default();
        engine
            .compile("ready", "<p>x</p>### this.setAttribute('data-ready', data.flag); ##")
            .unwrap();
        let scope = render(&engine, "ready", Value::from(json!({ "flag": "yes" })));
        assert_eq!(html_of(&engine, &scope), "<p data-ready=\"yes\">x</p>");
    }

    #[test]
    fn test_lazy_passes_follow_rule_order() {
        let engine = Engine::default();
        engine.interp().run("order = []").unwrap();
        engine
            .compile(
                "ordered",
                "<div data-co-event=\"##:data.events##\" data-co-load=\"##:data.onLoad##\">x</div>### order.push('lazy'); ##",
            )
            .unwrap();
        let data = eval(
            &engine,
            "({ onLoad: function () { order.push('load'); }, events: { load: function () { order.push('event'); } } })",
        );
        render(&engine, "ordered", data);
        assert_eq!(eval(&engine, "order.join()").to_display(), "load,event,lazy");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // INSERTION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_insert_rows_into_table_body() {
        let engine = Engine::default();
        engine
            .compile("rows", "<table><tbody>##% data.rows ##</tbody></table>")
            .unwrap();
        let data = Value::from(json!({ "rows": "<tr><td>1</td></tr>" }));
        let scope = render(&engine, "rows", data);
        assert_eq!(
            html_of(&engine, &scope),
            "<table><tbody><tr><td>1</td></tr></tbody></table>"
        );
    }

    #[test]
    fn test_insert_options_into_select() {
        let engine = Engine::default();
        engine
            .compile("picker", "<select>##% data.opts ##</select>")
            .unwrap();
        let data = Value::from(json!({ "opts": "<option>a</option><option>b</option>" }));
        let scope = render(&engine, "picker", data);
        assert_eq!(
            html_of(&engine, &scope),
            "<select><option>a</option><option>b</option></select>"
        );
    }

    #[test]
    fn test_blocking_and_nonblocking_insert_timing() {
        let engine = Engine::default();
        engine
            .compile(
                "slots",
                "<div>##% data.child ##|##% data.late::true ##|##% data.later::50 ##</div>",
            )
            .unwrap();
        let data = Value::from(json!({ "child": "<i>a</i>", "late": "b", "later": "c" }));
        let scope = render(&engine, "slots", data);
        assert_eq!(
            html_of(&engine, &scope),
            "<div><i>a</i>|<template data-co-insert=\"1\"></template>|<template data-co-insert=\"2\"></template></div>"
        );

        engine.run_pending();
        assert_eq!(
            html_of(&engine, &scope),
            "<div><i>a</i>|b|<template data-co-insert=\"2\"></template></div>"
        );

        engine.advance(49);
        assert!(html_of(&engine, &scope).contains("data-co-insert"));
        engine.advance(1);
        assert_eq!(html_of(&engine, &scope), "<div><i>a</i>|b|c</div>");
    }

    #[test]
    fn test_insert_component_runs_append_hooks() {
        let engine = Engine::default();
        engine.compile("inner", "<em>in</em>").unwrap();
        engine.compile("outer", "<div>##% data.child ##</div>").unwrap();

        let calls = Rc::new(RefCell::new(Vec::new()));
        let child = render(&engine, "inner", Value::from(json!({})));
        for hook in ["beforeAppendTo", "afterAppendTo"] {
            let calls = calls.clone();
            child.set_extra(
                hook,
                Value::native(hook, move |_, _, _| {
                    calls.borrow_mut().push(hook);
                    Ok(Value::Undefined)
                }),
            );
        }

        let data = Value::new_object();
        data.set("child", Value::Component(child));
        let scope = render(&engine, "outer", data);
        assert_eq!(html_of(&engine, &scope), "<div><em>in</em></div>");
        assert_eq!(*calls.borrow(), vec!["beforeAppendTo"]);
        engine.run_pending();
        assert_eq!(*calls.borrow(), vec!["beforeAppendTo", "afterAppendTo"]);
    }

    #[test]
    fn test_insert_nested_template_call() {
        let engine = Engine::default();
        engine.compile("ui.badge", "<em>##= data.n ##</em>").unwrap();
        engine
            .compile("ui.row", "<p>##% templates.ui.badge({ n: data.n }) ##</p>")
            .unwrap();
        let scope = render(&engine, "ui.row", Value::from(json!({ "n": 7 })));
        assert_eq!(html_of(&engine, &scope), "<p><em>7</em></p>");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PLACEMENT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_root_with_style_is_rehosted_in_shadow_root() {
        let engine = Engine::default();
        engine
            .compile("shadowed", "<section><style>p { color: red; }</style><p>x</p></section>")
            .unwrap();
        let scope = render(&engine, "shadowed", Value::from(json!({})));
        let host = scope.element().unwrap();
        let (tag, marked, shadow_html) = engine.with_dom(|dom| {
            (
                dom.tag_name(host).map(str::to_string),
                dom.has_attribute(host, SHADOW_HOST_ATTR),
                dom.shadow_root(host).map(|s| dom.inner_html(s)),
            )
        });
        assert_eq!(tag.as_deref(), Some("div"));
        assert!(marked);
        assert_eq!(
            shadow_html.as_deref(),
            Some("<section><style>p { color: red; }</style><p>x</p></section>")
        );
    }

    #[test]
    fn test_style_block_is_hoisted_once() {
        let engine = Engine::default();
        let text = "<style id=\"card-style\">.c { margin: 0; }</style><p class=\"c\">x</p>";
        engine.compile("card", text).unwrap();
        engine.compile("card", text).unwrap();
        let head = engine.head();
        let styles = engine.with_dom(|dom| dom.query_selector_all(head, "style"));
        assert_eq!(styles.len(), 1);
        let scope = render(&engine, "card", Value::from(json!({})));
        assert_eq!(html_of(&engine, &scope), "<p class=\"c\">x</p>");
    }

    #[test]
    fn test_properties_bag_applies_to_element() {
        let engine = Engine::default();
        engine.compile("props", "<div>x</div>").unwrap();
        let data = Value::from(json!({ "coProperties": { "data-role": "main", "title": "T" } }));
        let scope = render(&engine, "props", data);
        let div = scope.element().unwrap();
        assert_eq!(engine.outer_html(div), "<div data-role=\"main\">x</div>");
        let title = engine.with_dom(|dom| dom.property(div, "title"));
        assert_eq!(title.map(|v| v.to_display()).as_deref(), Some("T"));
    }

    #[test]
    fn test_render_into_target_runs_callback_with_target() {
        let engine = Engine::default();
        engine.compile("two", "<i>1</i><i>2</i>").unwrap();
        let target = container(&engine);
        let old = engine.create_element("b", &[], &[]);
        engine.with_dom(|dom| dom.append_child(target, old));

        let this_seen = Rc::new(RefCell::new(None));
        let seen = this_seen.clone();
        let options = RenderOptions {
            target: Some(target),
            callback: Some(Value::native("done", move |_, this, _| {
                *seen.borrow_mut() = this.as_node();
                Ok(Value::Undefined)
            })),
            base: None,
        };
        let scope = engine.render("two", Value::from(json!({})), options).unwrap();
        assert_eq!(engine.inner_html(target), "<i>1</i><i>2</i>");
        assert_eq!(scope.element(), Some(target));
        assert_eq!(scope.roots().len(), 2);
        assert_eq!(*this_seen.borrow(), Some(target));
    }

    #[test]
    fn test_option_object_from_script() {
        let engine = Engine::default();
        engine.compile("opt.card", "<p>##= data.name ##</p>").unwrap();
        let target = container(&engine);
        engine.globals().define("box", Value::Node(target));
        let scope = eval(&engine, "templates.opt.card({ name: 'Zed', coTarget: box })");
        assert!(scope.as_component().is_some());
        assert_eq!(engine.inner_html(target), "<p>Zed</p>");
        assert!(eval(&engine, "box.firstChild.textContent === 'Zed'").truthy());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SSR
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_render_to_string_and_hydrate() {
        let engine = Engine::default();
        engine.interp().run("clicks = []").unwrap();
        engine
            .compile(
                "card",
                "<button data-co-event=\"##:function () { clicks.push(data.name); }##\">##- data.name ##</button>",
            )
            .unwrap();
        let markup = engine
            .render_to_string("card", Value::from(json!({ "name": "Ann" })))
            .unwrap();
        assert_eq!(
            markup,
            "<div data-co-ssr=\"card\" data-co-ssr-data=\"{&quot;name&quot;:&quot;Ann&quot;}\"><button>Ann</button></div>"
        );

        let body = engine.body();
        engine.with_dom(|dom| {
            let fragment = html::parse_fragment(dom, &markup);
            dom.append_child(body, fragment);
        });
        let scopes = engine.hydrate(body).unwrap();
        assert_eq!(scopes.len(), 1);
        assert_eq!(engine.inner_html(body), "<div><button>Ann</button></div>");

        let button = engine.with_dom(|dom| dom.query_selector(body, "button")).unwrap();
        engine.dispatch_event(button, "click").unwrap();
        assert_eq!(eval(&engine, "clicks.join()").to_display(), "Ann");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LOADING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_load_batch_settles_every_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("widgets.html"),
            "<script type=\"text/co-template\" id=\"w.badge\"><span>##= data.n ##</span></script>\n<style id=\"w-style\">.b { color: blue; }</style>\n<script>loadedFlag = 'yes';</script>",
        )
        .unwrap();
        fs::write(dir.path().join("plain.html"), "<b>##= data.n ##</b>").unwrap();

        let engine = Engine::default();
        engine.set_fetcher(FsFetcher::new(dir.path()));
        let report: Rc<RefCell<Option<LoadReport>>> = Rc::new(RefCell::new(None));
        let slot = report.clone();
        engine.load_batch(
            vec![
                LoadRequest::new("widgets.html"),
                LoadRequest::new("missing.html"),
                LoadRequest::new("plain.html").with_id("w.plain"),
            ],
            move |_, done| {
                *slot.borrow_mut() = Some(done.clone());
            },
        );
        assert!(report.borrow().is_none());

        engine.run_until_idle();
        let done = report.borrow().clone().unwrap();
        assert_eq!(done.settled(), 3);
        assert_eq!(done.loaded, vec!["widgets.html", "plain.html"]);
        assert_eq!(done.templates, vec!["w.badge", "w.plain"]);
        assert_eq!(done.failed.len(), 1);
        assert_eq!(done.failed[0].0, "missing.html");

        let badge = render(&engine, "w.badge", Value::from(json!({ "n": 3 })));
        assert_eq!(html_of(&engine, &badge), "<span>3</span>");
        let head = engine.head();
        let style = engine.with_dom(|dom| dom.find_by_attribute(head, "id", "w-style"));
        assert!(style.is_some());
        assert_eq!(eval(&engine, "loadedFlag").to_display(), "yes");
    }
}
