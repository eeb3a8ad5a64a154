//! HTML parsing into the arena DOM.
//!
//! Markup is parsed with html5ever into an rcdom tree, then converted node by node
//! into a detached fragment of the engine's [`Dom`]. The input is placed inside an
//! explicit `<body>` so leading `<style>`, comments and whitespace stay in place.
//! Markup destined for table or select content is parsed inside the matching
//! ancestors, otherwise the parser drops rows and options it finds in `<body>`.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::dom::{Dom, NodeId};

// ═══════════════════════════════════════════════════════════════════════════════
// SVG ATTRIBUTE CASE MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// html5ever lowercases attribute names; SVG needs these in camelCase.
    static ref SVG_ATTR_CASE_MAP: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("viewbox", "viewBox");
        m.insert("preserveaspectratio", "preserveAspectRatio");
        m.insert("clippathunits", "clipPathUnits");
        m.insert("gradienttransform", "gradientTransform");
        m.insert("gradientunits", "gradientUnits");
        m.insert("markerheight", "markerHeight");
        m.insert("markerwidth", "markerWidth");
        m.insert("maskunits", "maskUnits");
        m.insert("pathlength", "pathLength");
        m.insert("patternunits", "patternUnits");
        m.insert("refx", "refX");
        m.insert("refy", "refY");
        m.insert("stddeviation", "stdDeviation");
        m.insert("textlength", "textLength");
        m
    };

    static ref SVG_TAGS: HashSet<&'static str> = [
        "svg", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "g",
        "defs", "use", "symbol", "clippath", "mask", "pattern", "marker",
        "lineargradient", "radialgradient", "stop", "filter", "text", "tspan",
    ]
    .into_iter()
    .collect();
}

fn correct_svg_attribute_name(attr_name: &str, tag_name: &str) -> String {
    if SVG_TAGS.contains(tag_name.to_lowercase().as_str()) {
        if let Some(&corrected) = SVG_ATTR_CASE_MAP.get(attr_name.to_lowercase().as_str()) {
            return corrected.to_string();
        }
    }
    attr_name.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse an HTML string into a new detached fragment of `dom`.
pub fn parse_fragment(dom: &mut Dom, html: &str) -> NodeId {
    parse_fragment_in(dom, html, None)
}

/// Ancestors that put the parser in the insertion mode of `context`'s content.
fn context_chain(context: &str) -> &'static [&'static str] {
    match context {
        "table" => &["table"],
        "thead" | "tbody" | "tfoot" => &["table", "tbody"],
        "tr" => &["table", "tbody", "tr"],
        "colgroup" => &["table", "colgroup"],
        "select" => &["select"],
        "optgroup" => &["select", "optgroup"],
        _ => &[],
    }
}

/// Parse `html` as the content of an element named `context`.
pub fn parse_fragment_in(dom: &mut Dom, html: &str, context: Option<&str>) -> NodeId {
    let fragment = dom.create_fragment();
    if html.is_empty() {
        return fragment;
    }

    let chain = context.map(context_chain).unwrap_or_default();
    let opening: String = chain.iter().map(|tag| format!("<{}>", tag)).collect();
    let wrapped = format!("<!DOCTYPE html><html><head></head><body>{}{}", opening, html);
    let parsed = match parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut wrapped.as_bytes())
    {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "HTML parse failed, falling back to text");
            let text = dom.create_text(html);
            dom.append_child(fragment, text);
            return fragment;
        }
    };

    let container = find_body(&parsed.document).map(|body| {
        chain
            .iter()
            .try_fold(body.clone(), |parent, tag| child_element(&parent, tag))
            .unwrap_or(body)
    });
    if let Some(container) = container {
        for child in container.children.borrow().iter() {
            if let Some(node) = convert_node(dom, child) {
                dom.append_child(fragment, node);
            }
        }
    }
    fragment
}

fn child_element(parent: &Handle, tag: &str) -> Option<Handle> {
    parent
        .children
        .borrow()
        .iter()
        .find(|child| matches!(&child.data, NodeData::Element { name, .. } if &*name.local == tag))
        .cloned()
}

fn find_body(handle: &Handle) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &handle.data {
        if name.local.to_string() == "body" {
            return Some(handle.clone());
        }
    }
    for child in handle.children.borrow().iter() {
        if let Some(body) = find_body(child) {
            return Some(body);
        }
    }
    None
}

fn convert_node(dom: &mut Dom, handle: &Handle) -> Option<NodeId> {
    match &handle.data {
        NodeData::Text { contents } => Some(dom.create_text(&contents.borrow())),
        NodeData::Comment { contents } => Some(dom.create_comment(contents)),
        NodeData::Element { name, attrs, .. } => {
            let tag = name.local.to_string();
            let element = dom.create_element(&tag);
            for attr in attrs.borrow().iter() {
                let attr_name = correct_svg_attribute_name(&attr.name.local, &tag);
                dom.set_attribute(element, &attr_name, &attr.value);
            }
            for child in handle.children.borrow().iter() {
                if let Some(node) = convert_node(dom, child) {
                    dom.append_child(element, node);
                }
            }
            Some(element)
        }
        NodeData::Document | NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeKind;

    #[test]
    fn test_svg_attribute_correction() {
        assert_eq!(correct_svg_attribute_name("viewbox", "svg"), "viewBox");
        assert_eq!(correct_svg_attribute_name("class", "svg"), "class");
        assert_eq!(correct_svg_attribute_name("viewbox", "div"), "viewbox");
    }

    #[test]
    fn test_parse_keeps_leading_text_and_siblings() {
        let mut dom = Dom::default();
        let frag = parse_fragment(&mut dom, "  hi <b>there</b><!--c--><i>x</i>");
        let kids = dom.children(frag).to_vec();
        assert_eq!(kids.len(), 4);
        assert!(matches!(dom.kind(kids[0]), NodeKind::Text(t) if t == "  hi "));
        assert!(matches!(dom.kind(kids[2]), NodeKind::Comment(c) if c == "c"));
        assert_eq!(dom.inner_html(frag), "  hi <b>there</b><!--c--><i>x</i>");
    }

    #[test]
    fn test_parse_style_stays_in_fragment() {
        let mut dom = Dom::default();
        let frag = parse_fragment(&mut dom, "<div><style>p{color:red}</style><p>a</p></div>");
        assert_eq!(dom.children(frag).len(), 1);
        assert!(dom.contains_tag(frag, "style"));
        assert_eq!(
            dom.inner_html(frag),
            "<div><style>p{color:red}</style><p>a</p></div>"
        );
    }

    #[test]
    fn test_parse_custom_elements_and_attributes() {
        let mut dom = Dom::default();
        let frag = parse_fragment(
            &mut dom,
            r#"<co-card data-co-insert="0"></co-card><svg viewBox="0 0 1 1"></svg>"#,
        );
        let kids = dom.children(frag).to_vec();
        assert_eq!(dom.get_attribute(kids[0], "data-co-insert"), Some("0"));
        assert_eq!(dom.get_attribute(kids[1], "viewBox"), Some("0 0 1 1"));
    }

    #[test]
    fn test_table_and_select_content_needs_context() {
        let mut dom = Dom::default();
        let rows = "<tr><td>1</td></tr><tr><td>2</td></tr>";
        let loose = parse_fragment(&mut dom, rows);
        assert_eq!(dom.inner_html(loose), "12");

        let frag = parse_fragment_in(&mut dom, rows, Some("tbody"));
        assert_eq!(dom.inner_html(frag), rows);
        let frag = parse_fragment_in(&mut dom, "<td>a</td>", Some("tr"));
        assert_eq!(dom.inner_html(frag), "<td>a</td>");

        let options = "<option>a</option><option>b</option>";
        let frag = parse_fragment_in(&mut dom, options, Some("select"));
        assert_eq!(dom.inner_html(frag), options);
        let frag = parse_fragment_in(&mut dom, "<p>x</p>", Some("div"));
        assert_eq!(dom.inner_html(frag), "<p>x</p>");
    }

    #[test]
    fn test_template_placeholder_stays_inside_table_and_select() {
        let mut dom = Dom::default();
        let frag = parse_fragment(
            &mut dom,
            r#"<table><tbody><template data-co-insert="0"></template></tbody></table><select><template data-co-insert="1"></template></select>"#,
        );
        let first = dom.find_by_attribute(frag, "data-co-insert", "0").unwrap();
        let second = dom.find_by_attribute(frag, "data-co-insert", "1").unwrap();
        let parent_tag = |id| dom.parent(id).and_then(|p| dom.tag_name(p));
        assert_eq!(parent_tag(first), Some("tbody"));
        assert_eq!(parent_tag(second), Some("select"));
    }

    #[test]
    fn test_empty_input() {
        let mut dom = Dom::default();
        let frag = parse_fragment(&mut dom, "");
        assert!(dom.children(frag).is_empty());
    }
}
