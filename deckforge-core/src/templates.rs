//! Template Model - Parsed Decks Are Read-Only Contracts

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::style::TextStyle;
use crate::ENGINE_VERSION;

pub type TemplateId = String;

/// Default slide width in EMU (10in, 4:3 deck).
pub const DEFAULT_SLIDE_WIDTH: i64 = 9_144_000;
/// Default slide height in EMU (7.5in).
pub const DEFAULT_SLIDE_HEIGHT: i64 = 6_858_000;

/// A parsed slide-deck template.
///
/// Templates are never mutated after parsing. Generation works on a
/// clone produced by [`Template::with_mappings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    pub name: String,
    pub slide_width: i64,
    pub slide_height: i64,
    pub created_at: DateTime<Utc>,
    pub source_path: PathBuf,
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    #[serde(rename = "id", alias = "slide_id")]
    pub slide_id: String,
    pub slide_type: SlideType,
    /// Package part holding this slide, e.g. `ppt/slides/slide1.xml`.
    pub part_name: String,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "id", alias = "element_id")]
    pub element_id: String,
    pub element_type: ElementType,
    pub is_placeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder_type: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
}

/// Layout classification of a slide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlideType {
    Title,
    Content,
    SectionHeader,
    TitleOnly,
    Blank,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    TextBox,
    AutoShape,
    Placeholder,
    Picture,
    GraphicFrame,
    Group,
    Connector,
}

/// Position and size in EMU.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub x: i64,
    pub y: i64,
    pub cx: i64,
    pub cy: i64,
}

/// One-based element id for the `ordinal`-th top-level shape of a slide.
pub fn element_id_for(ordinal: usize) -> String {
    format!("shape_{}", ordinal)
}

/// Zero-based slide id for the slide at `index`.
pub fn slide_id_for(index: usize) -> String {
    format!("slide_{}", index)
}

impl Template {
    pub fn slide(&self, slide_id: &str) -> Option<&Slide> {
        self.slides.iter().find(|s| s.slide_id == slide_id)
    }

    pub fn element(&self, slide_id: &str, element_id: &str) -> Option<&Element> {
        self.slide(slide_id)?.element(element_id)
    }

    /// Every editable placeholder in document order, with its slide and
    /// its position inside that slide.
    pub fn placeholders(&self) -> impl Iterator<Item = (&Slide, usize, &Element)> {
        self.slides.iter().flat_map(|slide| {
            slide
                .elements
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_placeholder)
                .map(move |(pos, e)| (slide, pos, e))
        })
    }

    /// Clone this template and substitute content/style for every mapping,
    /// in list order. A later mapping on the same element wins outright:
    /// its style is laid over the authored style, never over an earlier
    /// mapping's override.
    pub fn with_mappings(&self, mappings: &[crate::mapping::ContentMapping]) -> Template {
        let mut working = self.clone();
        for mapping in mappings {
            let authored = match self.element(&mapping.slide_id, &mapping.element_id) {
                Some(element) => &element.style,
                None => continue,
            };
            let element = working
                .slides
                .iter_mut()
                .find(|s| s.slide_id == mapping.slide_id)
                .and_then(|s| s.elements.iter_mut().find(|e| e.element_id == mapping.element_id));
            if let Some(element) = element {
                element.content = mapping.content.clone();
                element.style = match &mapping.style {
                    Some(style) => authored.overlay(style),
                    None => authored.clone(),
                };
            }
        }
        working
    }

    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            template_id: self.template_id.clone(),
            name: self.name.clone(),
            slide_count: self.slides.len(),
            placeholder_count: self.placeholders().count(),
            created_at: self.created_at,
        }
    }
}

impl Slide {
    pub fn element(&self, element_id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.element_id == element_id)
    }
}

/// Listing view of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub template_id: TemplateId,
    pub name: String,
    pub slide_count: usize,
    pub placeholder_count: usize,
    pub created_at: DateTime<Utc>,
}

/// On-disk manifest written next to each stored template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateManifest {
    pub engine_version: String,
    pub template: Template,
}

/// Template registry - holds published templates and their manifests
pub struct TemplateRegistry {
    templates: RwLock<HashMap<TemplateId, Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: RwLock::new(HashMap::new()) }
    }

    /// Restore templates from the `*.json` manifests in `dir`.
    ///
    /// Manifests written by an engine with another major version, or whose
    /// source deck is gone, are skipped.
    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let registry = Self::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().map_or(false, |e| e == "json") {
                    match read_manifest(&path) {
                        Some(manifest) => {
                            registry.register(manifest.template);
                        }
                        None => {
                            tracing::warn!(path = %path.display(), "Skipping unusable template manifest");
                        }
                    }
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.read().get(id).cloned()
    }

    /// Published templates, oldest first.
    pub fn list(&self) -> Vec<Arc<Template>> {
        let mut all: Vec<_> = self.templates.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.template_id.cmp(&b.template_id)));
        all
    }

    pub fn register(&self, template: Template) -> Arc<Template> {
        let template = Arc::new(template);
        self.templates
            .write()
            .insert(template.template_id.clone(), Arc::clone(&template));
        template
    }

    /// Write the manifest for `template` into `dir`.
    pub fn persist(template: &Template, dir: &Path) -> Result<PathBuf, std::io::Error> {
        let manifest = TemplateManifest {
            engine_version: ENGINE_VERSION.to_string(),
            template: template.clone(),
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        let path = dir.join(format!("{}.json", template.template_id));
        fs::write(&path, json)?;
        Ok(path)
    }
}

fn read_manifest(path: &Path) -> Option<TemplateManifest> {
    let content = fs::read_to_string(path).ok()?;
    let manifest: TemplateManifest = serde_json::from_str(&content).ok()?;
    let written = semver::Version::parse(&manifest.engine_version).ok()?;
    let current = semver::Version::parse(ENGINE_VERSION).ok()?;
    if written.major != current.major || !manifest.template.source_path.exists() {
        return None;
    }
    Some(manifest)
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
