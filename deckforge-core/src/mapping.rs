//! Content Mapper - Binds Content to Template Elements
//!
//! Every mapping is checked against the template when it is built.
//! A target that does not exist is an error, never a silent drop.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::content::{
    ContentGenerator, ContentPrompt, ContentResponse, ContentType, GenerationError, Metadata,
    UnknownContentType,
};
use crate::style::{StyleError, TextStyle};
use crate::templates::{Element, Slide, Template};

/// Remembered responses for `request_id` de-duplication.
const RESPONSE_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Unknown target: no element {element_id} on slide {slide_id} in template {template_id}")]
    UnknownTarget { template_id: String, slide_id: String, element_id: String },

    #[error("Element {element_id} on slide {slide_id} is not a placeholder")]
    NotPlaceholder { slide_id: String, element_id: String },

    #[error("Invalid content type: {0}")]
    InvalidContentType(#[from] UnknownContentType),

    #[error("Content response {request_id} does not name its slide_id/element_id")]
    MissingTarget { request_id: String },

    #[error("Invalid style for {slide_id}/{element_id}: {source}")]
    InvalidStyle {
        slide_id: String,
        element_id: String,
        #[source]
        source: StyleError,
    },

    #[error("Mapping belongs to template {found}, expected {expected}")]
    TemplateMismatch { expected: String, found: String },

    #[error("Content generation failed: {0}")]
    Generation(#[from] GenerationError),
}

/// Content bound to one `(slide_id, element_id)` of a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentMapping {
    pub template_id: String,
    pub slide_id: String,
    pub element_id: String,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
}

impl ContentMapping {
    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn target(&self) -> (&str, &str) {
        (&self.slide_id, &self.element_id)
    }
}

/// Caller-supplied mapping, as submitted for deck generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingInput {
    pub slide_id: String,
    pub element_id: String,
    pub content: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One content-generation request against a template element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub slide_id: String,
    pub element_id: String,
    /// Explicit type; inferred by the classifier when absent.
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub style_guide: Metadata,
}

/// "Generate content for every placeholder" in one call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchIntent {
    pub topic: String,
    #[serde(default)]
    pub style_guide: Metadata,
    #[serde(default)]
    pub overrides: Vec<TypeOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeOverride {
    pub slide_id: String,
    pub element_id: String,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub slide_id: String,
    pub element_id: String,
    pub error: String,
}

/// Per-element results of a batch; failures never abort the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub responses: Vec<ContentResponse>,
    pub mappings: Vec<ContentMapping>,
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Find an editable target or explain why it is not one.
pub fn resolve_target<'t>(
    template: &'t Template,
    slide_id: &str,
    element_id: &str,
) -> Result<&'t Element, MappingError> {
    let element = template
        .element(slide_id, element_id)
        .ok_or_else(|| MappingError::UnknownTarget {
            template_id: template.template_id.clone(),
            slide_id: slide_id.to_string(),
            element_id: element_id.to_string(),
        })?;
    if !element.is_placeholder {
        return Err(MappingError::NotPlaceholder {
            slide_id: slide_id.to_string(),
            element_id: element_id.to_string(),
        });
    }
    Ok(element)
}

/// Direct mapping from caller input.
pub fn build(
    template: &Template,
    slide_id: &str,
    element_id: &str,
    content: &str,
    content_type: &str,
) -> Result<ContentMapping, MappingError> {
    resolve_target(template, slide_id, element_id)?;
    let content_type: ContentType = content_type.parse()?;
    Ok(ContentMapping {
        template_id: template.template_id.clone(),
        slide_id: slide_id.to_string(),
        element_id: element_id.to_string(),
        content: content.to_string(),
        content_type,
        style: None,
    })
}

/// Build a mapping from submitted input, honoring `metadata.style`.
pub fn from_input(template: &Template, input: &MappingInput) -> Result<ContentMapping, MappingError> {
    let mapping = build(template, &input.slide_id, &input.element_id, &input.content, &input.content_type)?;
    attach_style(mapping, &input.metadata)
}

/// Derive a mapping from a generated response via its stamped metadata.
pub fn from_response(template: &Template, response: &ContentResponse) -> Result<ContentMapping, MappingError> {
    let (slide_id, element_id) = match (response.metadata_str("slide_id"), response.metadata_str("element_id")) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(MappingError::MissingTarget { request_id: response.request_id.clone() });
        }
    };
    resolve_target(template, slide_id, element_id)?;
    let mapping = ContentMapping {
        template_id: template.template_id.clone(),
        slide_id: slide_id.to_string(),
        element_id: element_id.to_string(),
        content: response.content.clone(),
        content_type: response.content_type,
        style: None,
    };
    attach_style(mapping, &response.metadata)
}

fn attach_style(mapping: ContentMapping, metadata: &Metadata) -> Result<ContentMapping, MappingError> {
    let style = match metadata.get("style") {
        Some(style) => TextStyle::from_metadata(style).map_err(|source| MappingError::InvalidStyle {
            slide_id: mapping.slide_id.clone(),
            element_id: mapping.element_id.clone(),
            source,
        })?,
        None => None,
    };
    Ok(match style {
        Some(style) => mapping.with_style(style),
        None => mapping,
    })
}

/// Intake check used before a mapping is handed to a task.
pub fn validate(template: &Template, mapping: &ContentMapping) -> Result<(), MappingError> {
    if mapping.template_id != template.template_id {
        return Err(MappingError::TemplateMismatch {
            expected: template.template_id.clone(),
            found: mapping.template_id.clone(),
        });
    }
    resolve_target(template, &mapping.slide_id, &mapping.element_id).map(|_| ())
}

// --- Classifiers ---

/// Decides the content type for a placeholder when the caller did not.
/// `None` means "no opinion"; the mapper then falls back to `body`.
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, slide: &Slide, position: usize, element: &Element) -> Option<ContentType>;
}

/// Length/glyph heuristic over the element's seed text.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    pub short_text_threshold: usize,
    pub bullet_glyphs: Vec<char>,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self { short_text_threshold: 30, bullet_glyphs: vec!['•', '・'] }
    }
}

impl ContentClassifier for HeuristicClassifier {
    fn classify(&self, _slide: &Slide, _position: usize, element: &Element) -> Option<ContentType> {
        let text = element.content.trim();
        if text.chars().count() < self.short_text_threshold {
            Some(ContentType::Title)
        } else if text.contains(self.bullet_glyphs.as_slice()) {
            Some(ContentType::Bullets)
        } else {
            Some(ContentType::Body)
        }
    }
}

/// Trusts placeholder kinds and title-slide order before the heuristic.
#[derive(Debug, Clone, Default)]
pub struct LayoutClassifier {
    pub fallback: HeuristicClassifier,
}

impl ContentClassifier for LayoutClassifier {
    fn classify(&self, slide: &Slide, position: usize, element: &Element) -> Option<ContentType> {
        match element.placeholder_type.as_deref() {
            Some("title") | Some("ctrTitle") => return Some(ContentType::Title),
            Some("subTitle") => return Some(ContentType::Subtitle),
            _ => {}
        }
        if slide.slide_type == crate::templates::SlideType::Title {
            match position {
                0 => return Some(ContentType::Title),
                1 => return Some(ContentType::Subtitle),
                _ => {}
            }
        }
        if element.content.contains(self.fallback.bullet_glyphs.as_slice()) {
            return Some(ContentType::Bullets);
        }
        match element.placeholder_type.as_deref() {
            Some("body") | Some("obj") => Some(ContentType::Body),
            _ => self.fallback.classify(slide, position, element),
        }
    }
}

// --- Mapper ---

/// A `request_id` only replays an answer for the element it was asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    template_id: String,
    slide_id: String,
    element_id: String,
    request_id: String,
}

impl CacheKey {
    fn new(template: &Template, slide_id: &str, element_id: &str, request_id: &str) -> Self {
        Self {
            template_id: template.template_id.clone(),
            slide_id: slide_id.to_string(),
            element_id: element_id.to_string(),
            request_id: request_id.to_string(),
        }
    }
}

struct ResponseCache {
    order: VecDeque<CacheKey>,
    entries: HashMap<CacheKey, ContentResponse>,
}

impl ResponseCache {
    fn get(&self, key: &CacheKey) -> Option<ContentResponse> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, response: &ContentResponse) {
        if self.entries.contains_key(&key) {
            return;
        }
        if self.order.len() >= RESPONSE_CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, response.clone());
    }
}

struct Prepared {
    slide_id: String,
    element_id: String,
    prompt: ContentPrompt,
}

pub struct ContentMapper {
    generator: Arc<dyn ContentGenerator>,
    classifier: Arc<dyn ContentClassifier>,
    limit: Arc<Semaphore>,
    answered: Mutex<ResponseCache>,
}

impl ContentMapper {
    pub fn new(generator: Arc<dyn ContentGenerator>, max_concurrent: usize) -> Self {
        Self {
            generator,
            classifier: Arc::new(HeuristicClassifier::default()),
            limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
            answered: Mutex::new(ResponseCache { order: VecDeque::new(), entries: HashMap::new() }),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ContentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Explicit override first, then the classifier, then `body`.
    pub fn infer_type(
        &self,
        template: &Template,
        slide_id: &str,
        element_id: &str,
        explicit: Option<&str>,
    ) -> Result<ContentType, MappingError> {
        if let Some(explicit) = explicit {
            return Ok(explicit.parse()?);
        }
        let inferred = template.slide(slide_id).and_then(|slide| {
            let position = slide.elements.iter().position(|e| e.element_id == element_id)?;
            self.classifier.classify(slide, position, &slide.elements[position])
        });
        Ok(inferred.unwrap_or(ContentType::Body))
    }

    /// One request per editable placeholder, in document order.
    pub fn requests_for_placeholders(&self, template: &Template, intent: &BatchIntent) -> Vec<ContentRequest> {
        let overrides: HashMap<(&str, &str), ContentType> = intent
            .overrides
            .iter()
            .map(|o| ((o.slide_id.as_str(), o.element_id.as_str()), o.content_type))
            .collect();

        template
            .placeholders()
            .map(|(slide, position, element)| {
                let content_type = overrides
                    .get(&(slide.slide_id.as_str(), element.element_id.as_str()))
                    .copied()
                    .or_else(|| self.classifier.classify(slide, position, element))
                    .unwrap_or(ContentType::Body);
                ContentRequest {
                    request_id: None,
                    slide_id: slide.slide_id.clone(),
                    element_id: element.element_id.clone(),
                    content_type: Some(content_type.to_string()),
                    user_input: Some(format!(
                        "Write a {} for a presentation about {}",
                        content_type, intent.topic
                    )),
                    style_guide: intent.style_guide.clone(),
                }
            })
            .collect()
    }

    fn prepare(&self, template: &Template, request: &ContentRequest) -> Result<Prepared, MappingError> {
        resolve_target(template, &request.slide_id, &request.element_id)?;
        let content_type = self.infer_type(
            template,
            &request.slide_id,
            &request.element_id,
            request.content_type.as_deref(),
        )?;
        let prompt = request
            .user_input
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| format!("Write a {} for this slide", content_type));
        Ok(Prepared {
            slide_id: request.slide_id.clone(),
            element_id: request.element_id.clone(),
            prompt: ContentPrompt { content_type, prompt, style_guide: request.style_guide.clone() },
        })
    }

    /// Pin the response to its origin so mappings can be derived from it
    /// even when the generator does not echo the target back.
    fn stamp(
        template: &Template,
        prepared: &Prepared,
        request_id: Option<&str>,
        mut response: ContentResponse,
    ) -> ContentResponse {
        if let Some(id) = request_id {
            response.request_id = id.to_string();
        } else if response.request_id.is_empty() {
            response.request_id = uuid::Uuid::new_v4().to_string();
        }
        response.content_type = prepared.prompt.content_type;
        let meta = &mut response.metadata;
        meta.insert("template_id".into(), template.template_id.clone().into());
        meta.insert("slide_id".into(), prepared.slide_id.clone().into());
        meta.insert("element_id".into(), prepared.element_id.clone().into());
        response
    }

    fn cached(&self, template: &Template, request: &ContentRequest) -> Option<ContentResponse> {
        let id = request.request_id.as_deref()?;
        let key = CacheKey::new(template, &request.slide_id, &request.element_id, id);
        self.answered.lock().get(&key)
    }

    fn remember(&self, template: &Template, request: &ContentRequest, response: &ContentResponse) {
        let key = CacheKey::new(template, &request.slide_id, &request.element_id, &response.request_id);
        self.answered.lock().insert(key, response);
    }

    /// Generate content for a single element.
    pub async fn generate(
        &self,
        template: &Template,
        request: &ContentRequest,
    ) -> Result<ContentResponse, MappingError> {
        if let Some(response) = self.cached(template, request) {
            tracing::debug!(request_id = %response.request_id, "Replaying answered content request");
            return Ok(response);
        }
        let prepared = self.prepare(template, request)?;
        let response = {
            let _permit = self
                .limit
                .acquire()
                .await
                .map_err(|e| GenerationError::Unavailable(e.to_string()))?;
            self.generator.generate(&prepared.prompt).await?
        };
        let response = Self::stamp(template, &prepared, request.request_id.as_deref(), response);
        self.remember(template, request, &response);
        Ok(response)
    }

    /// Generate content for many elements concurrently. Per-element
    /// failures are collected; results keep request order.
    pub async fn generate_batch(&self, template: &Template, requests: &[ContentRequest]) -> BatchOutcome {
        let mut slots: Vec<Option<Result<ContentResponse, String>>> = vec![None; requests.len()];
        let mut prepared: HashMap<usize, Prepared> = HashMap::new();
        let mut pending: HashSet<usize> = HashSet::new();
        let mut tasks = JoinSet::new();

        for (index, request) in requests.iter().enumerate() {
            if let Some(response) = self.cached(template, request) {
                slots[index] = Some(Ok(response));
                continue;
            }
            match self.prepare(template, request) {
                Ok(p) => {
                    let generator = Arc::clone(&self.generator);
                    let limit = Arc::clone(&self.limit);
                    let prompt = p.prompt.clone();
                    prepared.insert(index, p);
                    pending.insert(index);
                    tasks.spawn(async move {
                        let result = match limit.acquire_owned().await {
                            Ok(_permit) => generator.generate(&prompt).await,
                            Err(e) => Err(GenerationError::Unavailable(e.to_string())),
                        };
                        (index, result)
                    });
                }
                Err(e) => slots[index] = Some(Err(e.to_string())),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    pending.remove(&index);
                    let outcome = match (result, prepared.get(&index)) {
                        (Ok(response), Some(p)) => {
                            let response =
                                Self::stamp(template, p, requests[index].request_id.as_deref(), response);
                            self.remember(template, &requests[index], &response);
                            Ok(response)
                        }
                        (Ok(_), None) => Err("request was not prepared".to_string()),
                        (Err(e), _) => Err(e.to_string()),
                    };
                    slots[index] = Some(outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Content generation task aborted");
                }
            }
        }
        for index in pending {
            slots[index] = Some(Err("content generation task aborted".to_string()));
        }

        let mut outcome = BatchOutcome::default();
        for (request, slot) in requests.iter().zip(slots) {
            let result = slot.unwrap_or_else(|| Err("no result".to_string()));
            let result = result.and_then(|response| {
                from_response(template, &response)
                    .map(|mapping| (response, mapping))
                    .map_err(|e| e.to_string())
            });
            match result {
                Ok((response, mapping)) => {
                    outcome.responses.push(response);
                    outcome.mappings.push(mapping);
                }
                Err(error) => {
                    tracing::warn!(
                        template_id = %template.template_id,
                        slide_id = %request.slide_id,
                        element_id = %request.element_id,
                        error = %error,
                        "Batch element failed"
                    );
                    outcome.failures.push(BatchFailure {
                        slide_id: request.slide_id.clone(),
                        element_id: request.element_id.clone(),
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Generate content for every editable placeholder of `template`.
    pub async fn fill_placeholders(&self, template: &Template, intent: &BatchIntent) -> BatchOutcome {
        let requests = self.requests_for_placeholders(template, intent);
        self.generate_batch(template, &requests).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::OfflineGenerator;
    use crate::style::TextStyle;
    use crate::templates::{ElementType, SlideType};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn element(id: &str, placeholder: bool, ph: Option<&str>, content: &str) -> Element {
        Element {
            element_id: id.to_string(),
            element_type: if placeholder { ElementType::Placeholder } else { ElementType::TextBox },
            is_placeholder: placeholder,
            placeholder_type: ph.map(str::to_string),
            name: id.to_string(),
            content: content.to_string(),
            style: TextStyle::default(),
            frame: None,
        }
    }

    /// One static text box and two placeholders on a title slide.
    fn template() -> Template {
        Template {
            template_id: "template_test".to_string(),
            name: "test".to_string(),
            slide_width: 9_144_000,
            slide_height: 6_858_000,
            created_at: Utc::now(),
            source_path: PathBuf::from("test.pptx"),
            slides: vec![Slide {
                slide_id: "slide_0".to_string(),
                slide_type: SlideType::Title,
                part_name: "ppt/slides/slide1.xml".to_string(),
                elements: vec![
                    element("shape_1", false, None, "Company confidential"),
                    element("shape_2", true, Some("ctrTitle"), ""),
                    element(
                        "shape_3",
                        true,
                        Some("body"),
                        "• first point that is long enough\n• second point",
                    ),
                ],
            }],
        }
    }

    #[test]
    fn test_build_rejects_unknown_target() {
        let err = build(&template(), "slide_0", "shape_9", "x", "title").unwrap_err();
        assert!(matches!(err, MappingError::UnknownTarget { .. }));
        let err = build(&template(), "slide_4", "shape_2", "x", "title").unwrap_err();
        assert!(matches!(err, MappingError::UnknownTarget { .. }));
    }

    #[test]
    fn test_build_rejects_invalid_type_and_static_target() {
        let err = build(&template(), "slide_0", "shape_2", "x", "headline").unwrap_err();
        assert!(matches!(err, MappingError::InvalidContentType(_)));
        let err = build(&template(), "slide_0", "shape_1", "x", "title").unwrap_err();
        assert!(matches!(err, MappingError::NotPlaceholder { .. }));
    }

    #[test]
    fn test_from_input_reads_style_metadata() {
        let input = MappingInput {
            slide_id: "slide_0".into(),
            element_id: "shape_2".into(),
            content: "Hello".into(),
            content_type: "title".into(),
            metadata: json!({"style": {"text": {"size": 32, "color": "#FF0000", "bold": true}}})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let mapping = from_input(&template(), &input).unwrap();
        let style = mapping.style.unwrap();
        assert_eq!(style.size, Some(32.0));
        assert_eq!(style.bold, Some(true));

        let mut bad = input.clone();
        bad.metadata = json!({"style": {"text": {"color": "blue"}}}).as_object().cloned().unwrap();
        assert!(matches!(from_input(&template(), &bad), Err(MappingError::InvalidStyle { .. })));
    }

    #[test]
    fn test_heuristic_classifier() {
        let t = template();
        let slide = &t.slides[0];
        let c = HeuristicClassifier::default();
        assert_eq!(c.classify(slide, 1, &slide.elements[1]), Some(ContentType::Title));
        assert_eq!(c.classify(slide, 2, &slide.elements[2]), Some(ContentType::Bullets));
        let long = element("shape_4", true, Some("body"), &"plain words ".repeat(5));
        assert_eq!(c.classify(slide, 3, &long), Some(ContentType::Body));
    }

    #[test]
    fn test_layout_classifier_prefers_placeholder_kind() {
        let t = template();
        let slide = &t.slides[0];
        let c = LayoutClassifier::default();
        assert_eq!(c.classify(slide, 1, &slide.elements[1]), Some(ContentType::Title));
        let sub = element("shape_5", true, Some("subTitle"), "a long seed text that is over thirty chars");
        assert_eq!(c.classify(slide, 4, &sub), Some(ContentType::Subtitle));
    }

    #[test]
    fn test_requests_for_placeholders_apply_overrides() {
        let mapper = ContentMapper::new(Arc::new(OfflineGenerator), 2);
        let intent = BatchIntent {
            topic: "AI".to_string(),
            style_guide: Metadata::new(),
            overrides: vec![TypeOverride {
                slide_id: "slide_0".into(),
                element_id: "shape_3".into(),
                content_type: ContentType::Body,
            }],
        };
        let requests = mapper.requests_for_placeholders(&template(), &intent);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].element_id, "shape_2");
        assert_eq!(requests[0].content_type.as_deref(), Some("title"));
        assert_eq!(requests[1].content_type.as_deref(), Some("body"));
        assert!(requests[1].user_input.as_deref().unwrap().contains("about AI"));
    }

    struct FlakyGenerator {
        fail_on: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentGenerator for FlakyGenerator {
        async fn generate(&self, prompt: &ContentPrompt) -> Result<ContentResponse, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.content_type.to_string() == self.fail_on {
                return Err(GenerationError::Unavailable("quota exhausted".into()));
            }
            // Later requests answer first.
            let delay = if prompt.content_type == ContentType::Title { 40 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(ContentResponse::new(format!("generated {}", prompt.content_type), prompt.content_type))
        }
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_stamps_targets() {
        let mapper = ContentMapper::new(
            Arc::new(FlakyGenerator { fail_on: "none", calls: AtomicUsize::new(0) }),
            4,
        );
        let t = template();
        let outcome = mapper.fill_placeholders(&t, &BatchIntent { topic: "AI".into(), ..Default::default() }).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.mappings.len(), 2);
        assert_eq!(outcome.mappings[0].element_id, "shape_2");
        assert_eq!(outcome.mappings[1].element_id, "shape_3");
        assert_eq!(outcome.responses[1].metadata_str("slide_id"), Some("slide_0"));
        assert_eq!(outcome.responses[1].metadata_str("element_id"), Some("shape_3"));
    }

    #[tokio::test]
    async fn test_batch_partial_failure_does_not_abort() {
        let mapper = ContentMapper::new(
            Arc::new(FlakyGenerator { fail_on: "bullets", calls: AtomicUsize::new(0) }),
            1,
        );
        let t = template();
        let requests = vec![
            ContentRequest { slide_id: "slide_0".into(), element_id: "shape_2".into(), ..Default::default() },
            ContentRequest { slide_id: "slide_0".into(), element_id: "shape_3".into(), ..Default::default() },
            ContentRequest { slide_id: "slide_0".into(), element_id: "shape_7".into(), ..Default::default() },
        ];
        let outcome = mapper.generate_batch(&t, &requests).await;
        assert_eq!(outcome.mappings.len(), 1);
        assert_eq!(outcome.mappings[0].content_type, ContentType::Title);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].element_id, "shape_3");
        assert!(outcome.failures[0].error.contains("quota"));
        assert!(outcome.failures[1].error.contains("Unknown target"));
    }

    #[tokio::test]
    async fn test_request_id_replays_answer() {
        let generator = Arc::new(FlakyGenerator { fail_on: "none", calls: AtomicUsize::new(0) });
        let mapper = ContentMapper::new(generator.clone(), 2);
        let t = template();
        let request = ContentRequest {
            request_id: Some("req-1".into()),
            slide_id: "slide_0".into(),
            element_id: "shape_2".into(),
            content_type: Some("title".into()),
            user_input: Some("Write a title".into()),
            style_guide: Metadata::new(),
        };
        let first = mapper.generate(&t, &request).await.unwrap();
        let second = mapper.generate(&t, &request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.request_id, "req-1");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_id_reused_on_other_element_is_not_replayed() {
        let generator = Arc::new(FlakyGenerator { fail_on: "none", calls: AtomicUsize::new(0) });
        let mapper = ContentMapper::new(generator.clone(), 2);
        let t = template();
        let answered = ContentRequest {
            request_id: Some("r1".into()),
            slide_id: "slide_0".into(),
            element_id: "shape_2".into(),
            content_type: Some("title".into()),
            ..Default::default()
        };
        mapper.generate(&t, &answered).await.unwrap();

        let reused = ContentRequest {
            element_id: "shape_3".into(),
            content_type: Some("body".into()),
            ..answered.clone()
        };
        let outcome = mapper.generate_batch(&t, &[reused]).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.mappings.len(), 1);
        assert_eq!(outcome.mappings[0].element_id, "shape_3");
        assert_eq!(outcome.mappings[0].content_type, ContentType::Body);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        let replayed = mapper.generate_batch(&t, &[answered]).await;
        assert_eq!(replayed.mappings[0].element_id, "shape_2");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }
}
