//! Template discovery.
//!
//! Finds template sources either inside a document subtree
//! (`<script type="text/co-template" id="…">`) or as `*.html` files under a
//! directory, and compiles each into the engine's cache.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::dom::NodeId;
use crate::engine::Engine;
use crate::error::Result;

/// `type` attribute value marking an inline template source.
pub const TEMPLATE_SCRIPT_TYPE: &str = "text/co-template";

const TEMPLATE_EXTENSION: &str = "html";

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT SOURCES
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile every inline template below `container`. Returns the registered ids.
pub fn register_container(engine: &Engine, container: NodeId, remove_source: bool) -> Result<Vec<String>> {
    let sources: Vec<NodeId> = engine.with_dom(|dom| {
        dom.descendants(container)
            .into_iter()
            .filter(|node| {
                dom.tag_name(*node) == Some("script")
                    && dom.get_attribute(*node, "type") == Some(TEMPLATE_SCRIPT_TYPE)
                    && dom.has_attribute(*node, "id")
            })
            .collect()
    });

    let mut ids = Vec::with_capacity(sources.len());
    for source in sources {
        match engine.compile_element(source) {
            Ok(template) => ids.push(template.id.clone()),
            Err(e) => {
                error!(error = %e, "failed to register inline template");
                if engine.config().throw_error {
                    return Err(e);
                }
            }
        }
        if remove_source {
            engine.with_dom(|dom| dom.detach(source));
        }
    }
    debug!(count = ids.len(), "registered inline templates");
    Ok(ids)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTORY SOURCES
// ═══════════════════════════════════════════════════════════════════════════════

/// Find all template files in a directory, in a stable order.
fn find_template_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION))
        .collect()
}

/// `<root>/app/user-card.html` → `app.user-card`.
pub fn template_id_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!segments.is_empty()).then(|| segments.join("."))
}

/// Compile every `*.html` file below `dir`. Files are read in parallel and
/// compiled in path order.
pub fn register_dir(engine: &Engine, dir: &Path) -> Result<Vec<String>> {
    fs::metadata(dir)?;
    let files = find_template_files(dir);

    let sources: Vec<(PathBuf, std::io::Result<String>)> = files
        .par_iter()
        .map(|path| (path.clone(), fs::read_to_string(path)))
        .collect();

    let strict = engine.config().throw_error;
    let mut ids = Vec::with_capacity(sources.len());
    for (path, text) in sources {
        let Some(id) = template_id_for(dir, &path) else {
            continue;
        };
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read template file");
                if strict {
                    return Err(e.into());
                }
                continue;
            }
        };
        match engine.compile(&id, &text) {
            Ok(_) => ids.push(id),
            Err(e) => {
                error!(template_id = %id, path = %path.display(), error = %e, "failed to register template file");
                if strict {
                    return Err(e);
                }
            }
        }
    }
    debug!(dir = %dir.display(), count = ids.len(), "registered template directory");
    Ok(ids)
}
