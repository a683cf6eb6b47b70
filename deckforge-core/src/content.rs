//! Content Generation Capability
//!
//! The language model behind content generation is an external
//! collaborator. The engine only sees [`ContentGenerator`]: given a
//! content type, a prompt and a style guide it returns text plus metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Title,
    Subtitle,
    #[serde(alias = "paragraph")]
    Body,
    Bullets,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unrecognized content type: {0}")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(ContentType::Title),
            "subtitle" => Ok(ContentType::Subtitle),
            "body" | "paragraph" => Ok(ContentType::Body),
            "bullets" => Ok(ContentType::Bullets),
            _ => Err(UnknownContentType(s.to_string())),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentType::Title => "title",
            ContentType::Subtitle => "subtitle",
            ContentType::Body => "body",
            ContentType::Bullets => "bullets",
        };
        f.write_str(name)
    }
}

/// What the capability is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPrompt {
    pub content_type: ContentType,
    pub prompt: String,
    #[serde(default)]
    pub style_guide: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentResponse {
    pub request_id: String,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ContentResponse {
    pub fn new(content: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            content: content.into(),
            content_type,
            metadata: Metadata::new(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Content generator unavailable: {0}")]
    Unavailable(String),

    #[error("Content generator rejected the prompt: {0}")]
    Rejected(String),

    #[error("Content generator returned no content")]
    Empty,
}

/// External content-generation capability. May be slow and may fail.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &ContentPrompt) -> Result<ContentResponse, GenerationError>;
}

/// Deterministic generator that needs no model: shapes the prompt's
/// subject into text of the requested type. Backs the CLI.
#[derive(Debug, Clone, Default)]
pub struct OfflineGenerator;

impl OfflineGenerator {
    fn subject(prompt: &str) -> String {
        let subject = match prompt.find(" about ") {
            Some(pos) => prompt[pos + " about ".len()..].trim(),
            None => prompt.trim(),
        };
        subject.trim_end_matches(['.', '!', '?']).to_string()
    }

    fn title_case(text: &str) -> String {
        text.split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn compose(content_type: ContentType, prompt: &str, style_guide: &Metadata) -> String {
        let subject = Self::subject(prompt);
        let tone = style_guide.get("tone").and_then(|v| v.as_str()).unwrap_or("clear");
        match content_type {
            ContentType::Title => Self::title_case(&subject),
            ContentType::Subtitle => format!("A {} look at {}", tone, subject),
            ContentType::Body => format!(
                "{} shapes how we plan the coming quarter. This section summarizes where we stand, what changed, and what we expect next.",
                Self::title_case(&subject)
            ),
            ContentType::Bullets => ["Where we stand", "What changed", "What comes next"]
                .iter()
                .map(|point| format!("• {}: {}", point, subject))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[async_trait]
impl ContentGenerator for OfflineGenerator {
    async fn generate(&self, prompt: &ContentPrompt) -> Result<ContentResponse, GenerationError> {
        let content = Self::compose(prompt.content_type, &prompt.prompt, &prompt.style_guide);
        if content.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        let mut response = ContentResponse::new(content, prompt.content_type);
        response
            .metadata
            .insert("generator".to_string(), serde_json::Value::from("offline"));
        Ok(response)
    }
}
