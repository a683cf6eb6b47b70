//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use deckforge_core::{
    content::Metadata,
    hashing::canonical_json,
    mapping::{self, BatchIntent},
    sample::{DeckBuilder, SampleShape, SampleSlide},
    ContentGenerator, ContentMapper, ContentPrompt, ContentResponse, ContentType, DeckPipeline, EngineConfig,
    GenerationError, MappingError, MappingInput, Orchestrator, PipelineError, PreviewError, PreviewRenderer,
    PreviewTarget, TaskError, TaskStatus, Template, TemplateParser, TextStyle,
};

fn write_deck(dir: &Path, deck: DeckBuilder) -> PathBuf {
    let path = dir.join("deck.pptx");
    deck.write_to(&path).unwrap();
    path
}

/// One slide: a static text box and two empty placeholders.
fn single_slide_deck() -> DeckBuilder {
    DeckBuilder::new().slide(SampleSlide::blank(vec![
        SampleShape::text_box("Company confidential"),
        SampleShape::placeholder("title", ""),
        SampleShape::placeholder("body", ""),
    ]))
}

fn ids(template: &Template) -> Vec<(String, Vec<String>)> {
    template
        .slides
        .iter()
        .map(|s| (s.slide_id.clone(), s.elements.iter().map(|e| e.element_id.clone()).collect()))
        .collect()
}

fn create_pipeline(dir: &Path) -> DeckPipeline {
    let config = EngineConfig {
        storage_dir: dir.join("templates"),
        output_dir: dir.join("outputs"),
        ..EngineConfig::default()
    };
    DeckPipeline::new(config, Arc::new(deckforge_core::OfflineGenerator)).unwrap()
}

async fn wait_terminal(pipeline: &DeckPipeline, task_id: &str) -> TaskStatus {
    for _ in 0..200 {
        let status = pipeline.task_status(task_id).unwrap().status;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} did not finish");
}

#[test]
fn invariant_reparse_keeps_ids_and_mints_new_template_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_deck(dir.path(), DeckBuilder::starter());

    let a = TemplateParser::new(&path).parse().unwrap();
    let b = TemplateParser::new(&path).parse().unwrap();

    assert_ne!(a.template_id, b.template_id);
    assert_eq!(ids(&a), ids(&b));
}

#[test]
fn invariant_unknown_target_rejected_at_intake() {
    let dir = tempfile::tempdir().unwrap();
    let template = Arc::new(TemplateParser::new(write_deck(dir.path(), single_slide_deck())).parse().unwrap());
    let orchestrator = Orchestrator::new(dir.path().join("outputs")).unwrap();

    let unknown = mapping::ContentMapping {
        template_id: template.template_id.clone(),
        slide_id: "slide_0".into(),
        element_id: "shape_42".into(),
        content: "x".into(),
        content_type: ContentType::Body,
        style: None,
    };
    let result = orchestrator.create(template, vec![unknown]);

    assert!(matches!(result, Err(TaskError::Mapping(MappingError::UnknownTarget { .. }))));
    assert!(orchestrator.is_empty());
}

#[test]
fn invariant_status_is_monotonic_and_run_is_one_shot() {
    let dir = tempfile::tempdir().unwrap();
    let template = Arc::new(TemplateParser::new(write_deck(dir.path(), single_slide_deck())).parse().unwrap());
    let orchestrator = Arc::new(Orchestrator::new(dir.path().join("outputs")).unwrap());

    let m = mapping::build(&template, "slide_0", "shape_2", "Hello", "title").unwrap();
    let task = orchestrator.create(template, vec![m]).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    // Concurrent runs: exactly one performs the work.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let o = Arc::clone(&orchestrator);
            let id = task.task_id.clone();
            std::thread::spawn(move || o.run(&id).unwrap())
        })
        .collect();
    for handle in handles {
        let status = handle.join().unwrap();
        assert_ne!(status, TaskStatus::Pending);
    }

    let done = orchestrator.status(&task.task_id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.started_at.is_some());
    let path = done.output_path.clone().unwrap();

    assert_eq!(orchestrator.run(&task.task_id).unwrap(), TaskStatus::Completed);
    let again = orchestrator.status(&task.task_id).unwrap();
    assert_eq!(again.output_path, Some(path));
    assert_eq!(again.artifact_hash, done.artifact_hash);
    assert_eq!(again.completed_at, done.completed_at);
}

#[test]
fn invariant_last_mapping_wins() {
    let dir = tempfile::tempdir().unwrap();
    let template = Arc::new(TemplateParser::new(write_deck(dir.path(), single_slide_deck())).parse().unwrap());
    let orchestrator = Orchestrator::new(dir.path().join("outputs")).unwrap();

    let first = mapping::build(&template, "slide_0", "shape_2", "First", "title").unwrap();
    let second = mapping::build(&template, "slide_0", "shape_2", "Second", "title").unwrap();
    let task = orchestrator.create(template, vec![first, second]).unwrap();
    orchestrator.run(&task.task_id).unwrap();

    let artifact = orchestrator.artifact_path(&task.task_id).unwrap();
    let written = TemplateParser::new(&artifact).parse().unwrap();
    assert_eq!(written.element("slide_0", "shape_2").unwrap().content, "Second");
}

#[test]
fn invariant_last_mapping_wins_style_too() {
    let dir = tempfile::tempdir().unwrap();
    let template = Arc::new(TemplateParser::new(write_deck(dir.path(), single_slide_deck())).parse().unwrap());
    let authored = template.element("slide_0", "shape_2").unwrap().style.clone();
    let orchestrator = Orchestrator::new(dir.path().join("outputs")).unwrap();

    let loud = TextStyle { size: Some(72.0), color: Some("#FF0000".into()), bold: Some(true), italic: None };
    let first = mapping::build(&template, "slide_0", "shape_2", "First", "title").unwrap().with_style(loud);
    let second = mapping::build(&template, "slide_0", "shape_2", "Second", "title").unwrap();
    let task = orchestrator.create(template, vec![first, second]).unwrap();
    assert_eq!(orchestrator.run(&task.task_id).unwrap(), TaskStatus::Completed);

    let artifact = orchestrator.artifact_path(&task.task_id).unwrap();
    let written = TemplateParser::new(&artifact).parse().unwrap();
    let element = written.element("slide_0", "shape_2").unwrap();
    assert_eq!(element.content, "Second");
    assert_eq!(element.style, authored);
}

#[test]
fn invariant_artifact_not_ready_then_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let template = Arc::new(TemplateParser::new(write_deck(dir.path(), single_slide_deck())).parse().unwrap());
    let orchestrator = Orchestrator::new(dir.path().join("outputs")).unwrap();

    let m = mapping::build(&template, "slide_0", "shape_2", "Hello", "title").unwrap();
    let task = orchestrator.create(template, vec![m]).unwrap();
    assert!(matches!(
        orchestrator.artifact(&task.task_id),
        Err(TaskError::NotReady { status: TaskStatus::Pending, .. })
    ));

    orchestrator.run(&task.task_id).unwrap();
    let a = orchestrator.artifact(&task.task_id).unwrap();
    let b = orchestrator.artifact(&task.task_id).unwrap();
    assert!(!a.is_empty());
    assert_eq!(a, b);
    assert_eq!(
        orchestrator.status(&task.task_id).unwrap().artifact_hash.unwrap(),
        deckforge_core::compute_artifact_hash(&a)
    );
}

#[tokio::test]
async fn invariant_hello_example_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let deck = DeckBuilder::new().slide(SampleSlide::blank(vec![SampleShape::placeholder("title", "")]));
    let pipeline = create_pipeline(dir.path());
    let template = pipeline.upload_template("hello.pptx", &deck.build().unwrap()).unwrap();
    assert_eq!(ids(&template), vec![("slide_0".to_string(), vec!["shape_1".to_string()])]);

    let input: MappingInput = serde_json::from_value(serde_json::json!({
        "slide_id": "slide_0",
        "element_id": "shape_1",
        "content": "Hello",
        "content_type": "title"
    }))
    .unwrap();
    let task = pipeline.submit_generation(&template.template_id, &[input]).unwrap();
    assert_eq!(wait_terminal(&pipeline, &task.task_id).await, TaskStatus::Completed);

    let bytes = pipeline.download(&task.task_id).unwrap();
    let out = dir.path().join("downloaded.pptx");
    std::fs::write(&out, bytes).unwrap();
    let written = TemplateParser::new(&out).parse().unwrap();
    assert_eq!(written.element("slide_0", "shape_1").unwrap().content, "Hello");

    let png = pipeline.preview(&PreviewTarget::Task(task.task_id.clone()), 0).unwrap();
    assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
}

/// Slow for titles, failing for bodies.
struct UnevenGenerator;

#[async_trait]
impl ContentGenerator for UnevenGenerator {
    async fn generate(&self, prompt: &ContentPrompt) -> Result<ContentResponse, GenerationError> {
        match prompt.content_type {
            ContentType::Body => Err(GenerationError::Unavailable("rate limited".into())),
            other => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(ContentResponse::new("Generated", other))
            }
        }
    }
}

#[tokio::test]
async fn invariant_batch_covers_exactly_the_placeholders() {
    let dir = tempfile::tempdir().unwrap();
    let template = TemplateParser::new(write_deck(dir.path(), single_slide_deck())).parse().unwrap();
    let intent = BatchIntent { topic: "edge computing".into(), style_guide: Metadata::new(), overrides: vec![] };

    let reliable = ContentMapper::new(Arc::new(deckforge_core::OfflineGenerator), 4);
    let outcome = reliable.fill_placeholders(&template, &intent).await;
    assert_eq!(outcome.mappings.len(), 2);
    assert!(outcome.is_complete());
    for (response, mapping) in outcome.responses.iter().zip(&outcome.mappings) {
        assert_eq!(response.metadata_str("slide_id"), Some(mapping.slide_id.as_str()));
        assert_eq!(response.metadata_str("element_id"), Some(mapping.element_id.as_str()));
    }

    // Seed text is empty, so both classify as titles unless overridden.
    let mut partial_intent = intent.clone();
    partial_intent.overrides.push(mapping::TypeOverride {
        slide_id: "slide_0".into(),
        element_id: "shape_3".into(),
        content_type: ContentType::Body,
    });
    let uneven = ContentMapper::new(Arc::new(UnevenGenerator), 4);
    let outcome = uneven.fill_placeholders(&template, &partial_intent).await;
    assert_eq!(outcome.mappings.len() + outcome.failures.len(), 2);
    assert_eq!(outcome.mappings[0].element_id, "shape_2");
    assert_eq!(outcome.failures[0].element_id, "shape_3");
}

#[test]
fn invariant_preview_index_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let deck = DeckBuilder::starter().slide(SampleSlide::blank(vec![SampleShape::picture()]));
    let template = TemplateParser::new(write_deck(dir.path(), deck)).parse().unwrap();
    assert_eq!(template.slides.len(), 3);

    let result = PreviewRenderer::default().render(&template, 5);
    assert!(matches!(result, Err(PreviewError::IndexOutOfRange { index: 5, count: 3 })));
}

#[test]
fn invariant_invalid_content_type_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = create_pipeline(dir.path());
    let template = pipeline.upload_template("deck.pptx", &single_slide_deck().build().unwrap()).unwrap();

    let input = MappingInput {
        slide_id: "slide_0".into(),
        element_id: "shape_2".into(),
        content: "x".into(),
        content_type: "headline".into(),
        metadata: Metadata::new(),
    };
    let result = pipeline.submit_generation(&template.template_id, &[input]);
    assert!(matches!(result, Err(PipelineError::Mapping(MappingError::InvalidContentType(_)))));
    assert!(pipeline.orchestrator().is_empty());
}

#[test]
fn invariant_canonical_json_deterministic() {
    use serde_json::json;

    let obj1 = json!({"z": 1, "a": 2, "m": {"b": 1, "a": 2}});
    let obj2 = json!({"a": 2, "m": {"a": 2, "b": 1}, "z": 1});

    assert_eq!(canonical_json(&obj1).unwrap(), canonical_json(&obj2).unwrap());
}
