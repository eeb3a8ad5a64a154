//! Resource loader.
//!
//! Fetches documents through a [`Fetcher`] and registers what they carry:
//! inline templates, scripts, styles and links. Every request runs as its own
//! task; a shared counter invokes the batch callback once each request has
//! settled, successfully or not.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::discovery::TEMPLATE_SCRIPT_TYPE;
use crate::dom::NodeId;
use crate::engine::Engine;
use crate::error::{Result, TemplateError};
use crate::html;

pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Resolves urls as paths relative to a root directory.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Fetcher for FsFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let path = self.root.join(url.trim_start_matches('/'));
        fs::read_to_string(&path).map_err(|e| TemplateError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Which parts of a fetched document are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadKinds {
    pub templates: bool,
    pub scripts: bool,
    pub styles: bool,
    pub links: bool,
}

impl Default for LoadKinds {
    fn default() -> Self {
        Self {
            templates: true,
            scripts: true,
            styles: true,
            links: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub url: String,
    /// Compile the whole response as this template instead of scanning it.
    pub template_id: Option<String>,
    pub kinds: LoadKinds,
}

impl LoadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            template_id: None,
            kinds: LoadKinds::default(),
        }
    }

    pub fn with_id(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_kinds(mut self, kinds: LoadKinds) -> Self {
        self.kinds = kinds;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Urls that loaded.
    pub loaded: Vec<String>,
    /// Template ids registered by the batch.
    pub templates: Vec<String>,
    /// `(url, message)` for each request that failed.
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn settled(&self) -> usize {
        self.loaded.len() + self.failed.len()
    }

    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

pub type LoadCallback = Box<dyn FnOnce(&Engine, &LoadReport)>;

struct Batch {
    pending: usize,
    report: LoadReport,
    callback: Option<LoadCallback>,
}

/// Schedule every request; `callback` runs after the last one settles.
pub fn load_batch(engine: &Engine, requests: Vec<LoadRequest>, callback: LoadCallback) {
    if requests.is_empty() {
        engine.schedule("load", 0, Box::new(move |engine| callback(engine, &LoadReport::default())));
        return;
    }

    let batch = Rc::new(RefCell::new(Batch {
        pending: requests.len(),
        report: LoadReport::default(),
        callback: Some(callback),
    }));

    for request in requests {
        let batch = batch.clone();
        engine.schedule(
            "load",
            0,
            Box::new(move |engine| {
                let outcome = load_one(engine, &request);
                settle(engine, &batch, &request.url, outcome);
            }),
        );
    }
}

fn settle(engine: &Engine, batch: &Rc<RefCell<Batch>>, url: &str, outcome: Result<Vec<String>>) {
    let finished = {
        let mut batch = batch.borrow_mut();
        match outcome {
            Ok(ids) => {
                debug!(url, templates = ids.len(), "resource loaded");
                batch.report.loaded.push(url.to_string());
                batch.report.templates.extend(ids);
            }
            Err(e) => {
                warn!(url, error = %e, "resource failed to load");
                batch.report.failed.push((url.to_string(), e.to_string()));
            }
        }
        batch.pending -= 1;
        if batch.pending == 0 {
            batch
                .callback
                .take()
                .map(|callback| (callback, std::mem::take(&mut batch.report)))
        } else {
            None
        }
    };
    if let Some((callback, report)) = finished {
        callback(engine, &report);
    }
}

fn load_one(engine: &Engine, request: &LoadRequest) -> Result<Vec<String>> {
    let text = engine.fetcher().fetch(&request.url)?;

    if let Some(id) = &request.template_id {
        if !request.kinds.templates {
            return Ok(Vec::new());
        }
        let template = engine.compile(id, &text)?;
        return Ok(vec![template.id.clone()]);
    }

    let fragment = engine.with_dom(|dom| html::parse_fragment(dom, &text));
    let mut ids = Vec::new();

    if request.kinds.templates {
        ids = engine.register_container(fragment, true)?;
    }
    if request.kinds.styles {
        adopt_into_head(engine, fragment, "style");
    }
    if request.kinds.links {
        adopt_into_head(engine, fragment, "link");
    }
    if request.kinds.scripts {
        run_scripts(engine, fragment, &request.url)?;
    }
    Ok(ids)
}

/// Move every `tag` element of the fragment into the document head. An element
/// with an id replaces the head element carrying the same id.
fn adopt_into_head(engine: &Engine, fragment: NodeId, tag: &str) {
    engine.with_dom(|dom| {
        let head = dom.head();
        let nodes: Vec<NodeId> = dom
            .descendants(fragment)
            .into_iter()
            .filter(|node| dom.tag_name(*node) == Some(tag))
            .collect();
        for node in nodes {
            if let Some(id) = dom.get_attribute(node, "id").map(str::to_string) {
                if let Some(existing) = dom.find_by_attribute(head, "id", &id) {
                    dom.detach(existing);
                }
            }
            dom.append_child(head, node);
        }
    });
}

fn run_scripts(engine: &Engine, fragment: NodeId, url: &str) -> Result<()> {
    let scripts: Vec<String> = engine.with_dom(|dom| {
        dom.descendants(fragment)
            .into_iter()
            .filter(|node| dom.tag_name(*node) == Some("script"))
            .filter(|node| dom.get_attribute(*node, "type") != Some(TEMPLATE_SCRIPT_TYPE))
            .map(|node| dom.text_content(node))
            .collect()
    });
    for source in scripts {
        engine.interp().run(&source).map_err(|e| TemplateError::Fetch {
            url: url.to_string(),
            message: format!("script failed: {}", e),
        })?;
    }
    Ok(())
}
