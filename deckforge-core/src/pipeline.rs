//! Deck Pipeline - Single Entry Point
//!
//! CRITICAL: every path that produces a deck goes through the
//! orchestrator's intake, which validates each mapping. No bypass.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::content::{ContentGenerator, ContentResponse};
use crate::mapping::{
    self, BatchIntent, BatchOutcome, ContentClassifier, ContentMapper, ContentMapping, ContentRequest,
    MappingError, MappingInput,
};
use crate::orchestrator::{Orchestrator, TaskError, TaskSnapshot};
use crate::parser::{new_template_id, ParseError, TemplateParser};
use crate::preview::{PreviewError, PreviewRenderer, PreviewTarget};
use crate::retention::RetentionPolicy;
use crate::templates::{Template, TemplateRegistry, TemplateSummary};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template upload rejected: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// The deck pipeline - single entry point for all template operations
pub struct DeckPipeline {
    config: EngineConfig,
    registry: TemplateRegistry,
    mapper: ContentMapper,
    orchestrator: Arc<Orchestrator>,
    renderer: PreviewRenderer,
}

impl DeckPipeline {
    /// Open the storage directories in `config` and restore stored templates.
    pub fn new(config: EngineConfig, generator: Arc<dyn ContentGenerator>) -> Result<Self, PipelineError> {
        fs::create_dir_all(&config.storage_dir)?;
        let registry = TemplateRegistry::load_from_dir(&config.storage_dir)?;
        let orchestrator = Arc::new(Orchestrator::new(&config.output_dir)?);
        tracing::info!(
            storage_dir = %config.storage_dir.display(),
            templates = registry.list().len(),
            "Deck pipeline ready"
        );
        Ok(Self {
            mapper: ContentMapper::new(generator, config.max_concurrent_generations),
            renderer: PreviewRenderer::new(config.preview_width),
            registry,
            orchestrator,
            config,
        })
    }

    /// Replace the content-type classifier used for batch inference.
    pub fn with_classifier(mut self, classifier: Arc<dyn ContentClassifier>) -> Self {
        self.mapper = self.mapper.with_classifier(classifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        self.config.retention()
    }

    // --- Templates ---

    /// Store and parse an uploaded deck. An upload that fails to parse or
    /// to persist leaves nothing behind.
    pub fn upload_template(&self, filename: &str, bytes: &[u8]) -> Result<Arc<Template>, PipelineError> {
        self.store_upload(&new_template_id(), filename, bytes)
    }

    fn store_upload(&self, template_id: &str, filename: &str, bytes: &[u8]) -> Result<Arc<Template>, PipelineError> {
        let path = self.config.storage_dir.join(format!("{}.pptx", template_id));
        let stored = StoredUpload::write(path, bytes)?;

        let name = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| template_id.to_string());
        let parsed = TemplateParser::new(&stored.path)
            .with_template_id(template_id)
            .with_name(name)
            .parse();

        let template = match parsed {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!(filename, error = %e, "Rejected template upload");
                return Err(e.into());
            }
        };

        TemplateRegistry::persist(&template, &self.config.storage_dir)?;
        stored.keep();
        tracing::info!(
            template_id = %template.template_id,
            slides = template.slides.len(),
            placeholders = template.placeholders().count(),
            "Template uploaded"
        );
        Ok(self.registry.register(template))
    }

    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.registry.list().iter().map(|t| t.summary()).collect()
    }

    pub fn get_template(&self, template_id: &str) -> Result<Arc<Template>, PipelineError> {
        self.registry
            .get(template_id)
            .ok_or_else(|| PipelineError::TemplateNotFound(template_id.to_string()))
    }

    // --- Content ---

    pub async fn generate_content(
        &self,
        template_id: &str,
        request: &ContentRequest,
    ) -> Result<ContentResponse, PipelineError> {
        let template = self.get_template(template_id)?;
        Ok(self.mapper.generate(&template, request).await?)
    }

    pub async fn generate_batch(
        &self,
        template_id: &str,
        requests: &[ContentRequest],
    ) -> Result<BatchOutcome, PipelineError> {
        let template = self.get_template(template_id)?;
        Ok(self.mapper.generate_batch(&template, requests).await)
    }

    /// Generate content for every editable placeholder of a template.
    pub async fn fill_placeholders(
        &self,
        template_id: &str,
        intent: &BatchIntent,
    ) -> Result<BatchOutcome, PipelineError> {
        let template = self.get_template(template_id)?;
        Ok(self.mapper.fill_placeholders(&template, intent).await)
    }

    // --- Generation ---

    /// Validate caller mappings and start a generation task.
    pub fn submit_generation(
        &self,
        template_id: &str,
        inputs: &[MappingInput],
    ) -> Result<TaskSnapshot, PipelineError> {
        let template = self.get_template(template_id)?;
        let mappings = inputs
            .iter()
            .map(|input| mapping::from_input(&template, input))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.orchestrator.submit(template, mappings)?)
    }

    /// Start a generation task from already-built mappings.
    pub fn submit_mappings(
        &self,
        template_id: &str,
        mappings: Vec<ContentMapping>,
    ) -> Result<TaskSnapshot, PipelineError> {
        let template = self.get_template(template_id)?;
        Ok(self.orchestrator.submit(template, mappings)?)
    }

    pub fn task_status(&self, task_id: &str) -> Result<TaskSnapshot, PipelineError> {
        Ok(self.orchestrator.status(task_id)?)
    }

    pub fn download(&self, task_id: &str) -> Result<Vec<u8>, PipelineError> {
        Ok(self.orchestrator.artifact(task_id)?)
    }

    // --- Preview ---

    pub fn preview(&self, target: &PreviewTarget, slide_index: usize) -> Result<Vec<u8>, PipelineError> {
        let png = match target {
            PreviewTarget::Template(id) => self.renderer.render(&*self.get_template(id)?, slide_index)?,
            PreviewTarget::Task(id) => {
                let path = self.orchestrator.artifact_path(id).map_err(PreviewError::from)?;
                self.renderer.render_file(&path, slide_index)?
            }
        };
        Ok(png)
    }
}

/// An uploaded deck on disk, removed on drop unless kept.
struct StoredUpload {
    path: PathBuf,
    keep: bool,
}

impl StoredUpload {
    fn write(path: PathBuf, bytes: &[u8]) -> std::io::Result<Self> {
        fs::write(&path, bytes)?;
        Ok(Self { path, keep: false })
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove stored upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::OfflineGenerator;
    use crate::sample::DeckBuilder;

    fn pipeline(dir: &Path) -> DeckPipeline {
        let config = EngineConfig {
            storage_dir: dir.join("templates"),
            output_dir: dir.join("outputs"),
            ..EngineConfig::default()
        };
        DeckPipeline::new(config, Arc::new(OfflineGenerator)).unwrap()
    }

    #[test]
    fn test_upload_persists_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let uploaded = {
            let p = pipeline(dir.path());
            p.upload_template("Quarterly.pptx", &DeckBuilder::starter().build().unwrap()).unwrap()
        };
        assert_eq!(uploaded.name, "Quarterly");

        let restored = pipeline(dir.path());
        let summaries = restored.list_templates();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].template_id, uploaded.template_id);
        assert_eq!(summaries[0].placeholder_count, 4);
    }

    #[test]
    fn test_unpersisted_upload_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let template_id = "template_0123456789abcdef0123456789abcdef";
        let templates = dir.path().join("templates");
        // A directory where the manifest belongs makes the manifest write fail.
        fs::create_dir(templates.join(format!("{}.json", template_id))).unwrap();

        let err = p
            .store_upload(template_id, "Quarterly.pptx", &DeckBuilder::starter().build().unwrap())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(p.list_templates().is_empty());
        assert!(!templates.join(format!("{}.pptx", template_id)).exists());
    }

    #[test]
    fn test_rejected_upload_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let err = p.upload_template("broken.pptx", b"definitely not a deck").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(ParseError::Container(_))));
        assert!(p.list_templates().is_empty());
        assert_eq!(fs::read_dir(dir.path().join("templates")).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_template() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        assert!(matches!(p.get_template("template_missing"), Err(PipelineError::TemplateNotFound(_))));
        assert!(matches!(
            p.preview(&PreviewTarget::Template("template_missing".into()), 0),
            Err(PipelineError::TemplateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_preview_of_pending_task_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let template = p.upload_template("deck.pptx", &DeckBuilder::starter().build().unwrap()).unwrap();
        let snapshot = p
            .orchestrator()
            .create(
                template.clone(),
                vec![mapping::build(&template, "slide_0", "shape_1", "Hi", "title").unwrap()],
            )
            .unwrap();
        let err = p.preview(&PreviewTarget::Task(snapshot.task_id), 0).unwrap_err();
        assert!(matches!(err, PipelineError::Preview(PreviewError::Task(TaskError::NotReady { .. }))));
    }
}
