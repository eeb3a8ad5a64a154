//! Server-side rendering and hydration.
//!
//! `render_to_string` renders detached and wraps the markup in a marker element
//! carrying the template id and the JSON data. `hydrate` finds those markers and
//! re-renders each into itself so lazy bindings (events, refs, inserts) come alive.

use tracing::{debug, error};

use crate::component::ComponentScope;
use crate::dom::NodeId;
use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::escape::escape_attribute;
use crate::render::RenderOptions;
use crate::script::Value;

pub const SSR_ATTR: &str = "data-co-ssr";
pub const SSR_DATA_ATTR: &str = "data-co-ssr-data";

pub fn render_to_string(engine: &Engine, id: &str, data: Value) -> Result<String> {
    let data_json = data.to_json().to_string();
    let component = engine.render(id, data, RenderOptions::default())?;
    let inner: String = engine.with_dom(|dom| {
        component
            .roots()
            .into_iter()
            .map(|root| dom.outer_html(root))
            .collect()
    });
    component.release();
    Ok(format!(
        "<div {}=\"{}\" {}=\"{}\">{}</div>",
        SSR_ATTR,
        escape_attribute(id),
        SSR_DATA_ATTR,
        escape_attribute(&data_json),
        inner
    ))
}

pub fn hydrate(engine: &Engine, container: NodeId) -> Result<Vec<ComponentScope>> {
    let markers = engine.with_dom(|dom| dom.find_all_with_attribute(container, SSR_ATTR));
    let mut components = Vec::with_capacity(markers.len());

    for marker in markers {
        // Nested markers are gone once their outer block re-rendered.
        if !engine.with_dom(|dom| dom.contains(container, marker)) {
            continue;
        }
        match hydrate_one(engine, marker) {
            Ok(component) => components.push(component),
            Err(e) => {
                error!(error = %e, "hydration failed");
                if engine.config().throw_error {
                    return Err(e);
                }
            }
        }
    }
    debug!(count = components.len(), "hydrated");
    Ok(components)
}

fn hydrate_one(engine: &Engine, marker: NodeId) -> Result<ComponentScope> {
    let (id, raw) = engine.with_dom(|dom| {
        let id = dom.get_attribute(marker, SSR_ATTR).unwrap_or_default().to_string();
        let raw = dom
            .get_attribute(marker, SSR_DATA_ATTR)
            .unwrap_or("null")
            .to_string();
        dom.remove_attribute(marker, SSR_ATTR);
        dom.remove_attribute(marker, SSR_DATA_ATTR);
        (id, raw)
    });
    let json: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| TemplateError::Render {
            template_id: id.clone(),
            message: format!("invalid hydration data: {}", e),
            data: raw.clone(),
            line: None,
            source: None,
        })?;
    engine.render(&id, Value::from(json), RenderOptions::with_target(marker))
}
