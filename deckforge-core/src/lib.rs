//! DeckForge Core - Template-Driven Deck Generation
//!
//! # The Six Laws (Non-Negotiable)
//! 1. Templates Are Read-Only Once Parsed
//! 2. Every Mapping Names a Real Placeholder
//! 3. A Task Runs Exactly Once
//! 4. Failures Are Polled, Not Thrown
//! 5. Identity Is Always Explicit
//! 6. Generators Suggest, Engine Enforces

pub mod templates;
pub mod ooxml;
pub mod parser;
pub mod style;
pub mod content;
pub mod mapping;
pub mod writer;
pub mod orchestrator;
pub mod preview;
pub mod retention;
pub mod hashing;
pub mod config;
pub mod sample;
pub mod pipeline;

pub use templates::{Element, ElementType, Slide, SlideType, Template, TemplateId, TemplateRegistry, TemplateSummary};
pub use parser::{ParseError, TemplateParser};
pub use style::{StyleError, TextStyle};
pub use content::{ContentGenerator, ContentPrompt, ContentResponse, ContentType, GenerationError, OfflineGenerator};
pub use mapping::{
    BatchIntent, BatchOutcome, ContentClassifier, ContentMapper, ContentMapping, ContentRequest,
    HeuristicClassifier, LayoutClassifier, MappingError, MappingInput,
};
pub use orchestrator::{Orchestrator, TaskError, TaskSnapshot, TaskStatus};
pub use preview::{PreviewError, PreviewRenderer, PreviewTarget};
pub use retention::RetentionPolicy;
pub use hashing::{canonical_json, compute_artifact_hash, compute_job_hash};
pub use config::EngineConfig;
pub use pipeline::{DeckPipeline, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
