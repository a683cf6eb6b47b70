//! Engine Configuration - Environment-Driven Settings
//!
//! Every setting has a default; unparseable values fall back to it.

use std::path::PathBuf;
use std::str::FromStr;

use crate::preview::DEFAULT_PREVIEW_WIDTH;
use crate::retention::{RetentionPolicy, DEFAULT_RETENTION_HOURS};

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local use.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Where uploaded templates and their manifests are stored.
    pub storage_dir: PathBuf,
    /// Where generated artifacts are written.
    pub output_dir: PathBuf,
    /// Preview image width in pixels.
    pub preview_width: u32,
    /// How long finished tasks are kept, in hours.
    pub retention_hours: i64,
    /// Upper bound on concurrent calls to the content generator.
    pub max_concurrent_generations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("storage/templates"),
            output_dir: PathBuf::from("storage/outputs"),
            preview_width: DEFAULT_PREVIEW_WIDTH,
            retention_hours: DEFAULT_RETENTION_HOURS,
            max_concurrent_generations: 4,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                | Default             |
    /// |----------------------------------------|---------------------|
    /// | `DECKFORGE_STORAGE_DIR`                | `storage/templates` |
    /// | `DECKFORGE_OUTPUT_DIR`                 | `storage/outputs`   |
    /// | `DECKFORGE_PREVIEW_WIDTH`              | `960`               |
    /// | `DECKFORGE_RETENTION_HOURS`            | `24`                |
    /// | `DECKFORGE_MAX_CONCURRENT_GENERATIONS` | `4`                 |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            storage_dir: lookup("DECKFORGE_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            output_dir: lookup("DECKFORGE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            preview_width: parse_or(&lookup, "DECKFORGE_PREVIEW_WIDTH", defaults.preview_width),
            retention_hours: parse_or(&lookup, "DECKFORGE_RETENTION_HOURS", defaults.retention_hours),
            max_concurrent_generations: parse_or(
                &lookup,
                "DECKFORGE_MAX_CONCURRENT_GENERATIONS",
                defaults.max_concurrent_generations,
            )
            .max(1),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::hours(self.retention_hours)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Ignoring invalid configuration value");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(EngineConfig::from_lookup(|_| None), EngineConfig::default());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let env = HashMap::from([
            ("DECKFORGE_OUTPUT_DIR", "/tmp/out"),
            ("DECKFORGE_PREVIEW_WIDTH", "1280"),
            ("DECKFORGE_RETENTION_HOURS", "soon"),
            ("DECKFORGE_MAX_CONCURRENT_GENERATIONS", "0"),
        ]);
        let config = EngineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.storage_dir, PathBuf::from("storage/templates"));
        assert_eq!(config.preview_width, 1280);
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.max_concurrent_generations, 1);
    }
}
