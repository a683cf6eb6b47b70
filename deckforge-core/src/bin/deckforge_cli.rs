//! DeckForge CLI - Bridge interface for other processes
//!
//! Commands: sample, upload, templates, show, preview, fill, generate
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a generation task fails

use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deckforge_core::{
    content::Metadata, mapping::BatchIntent, sample::DeckBuilder, DeckPipeline, EngineConfig, MappingInput,
    OfflineGenerator, PipelineError, PreviewTarget, TaskSnapshot, TaskStatus,
};

#[derive(Parser)]
#[command(name = "deckforge-cli")]
#[command(about = "DeckForge CLI - Template-driven deck generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Template storage directory (overrides DECKFORGE_STORAGE_DIR)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Artifact output directory (overrides DECKFORGE_OUTPUT_DIR)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample deck usable as a template
    Sample {
        #[arg(long, default_value = "sample.pptx")]
        out: PathBuf,
    },

    /// Upload a deck as a template
    Upload {
        /// Path to the .pptx file
        file: PathBuf,
    },

    /// List stored templates
    Templates,

    /// Show a template's slides and elements
    Show {
        #[arg(short, long)]
        template: String,
    },

    /// Render a slide preview as PNG
    Preview {
        #[arg(short, long)]
        template: String,

        #[arg(long, default_value_t = 0)]
        slide_index: usize,

        /// Write the PNG here instead of printing it as base64
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate content for every placeholder, then build the deck
    Fill {
        #[arg(short, long)]
        template: String,

        #[arg(long)]
        topic: String,

        /// JSON object passed to the generator as style guide
        #[arg(long)]
        style_guide: Option<String>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Build a deck from explicit content mappings
    Generate {
        #[arg(short, long)]
        template: String,

        /// JSON payload: {"content_mappings": [{slide_id, element_id, content, content_type, metadata?}]}
        #[arg(short, long)]
        payload: String,

        #[command(flatten)]
        wait: WaitArgs,
    },
}

#[derive(clap::Args)]
struct WaitArgs {
    /// Copy the finished deck here
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    max_attempts: u32,

    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

#[derive(Deserialize)]
struct GeneratePayload {
    content_mappings: Vec<MappingInput>,
}

fn print(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    print(&json!({"success": false, "error": error.to_string()}));
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deckforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Sample { out } = &cli.command {
        return match DeckBuilder::starter().write_to(out) {
            Ok(()) => {
                print(&json!({"success": true, "path": out}));
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        };
    }

    let mut config = EngineConfig::from_env();
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    let pipeline = match DeckPipeline::new(config, Arc::new(OfflineGenerator)) {
        Ok(p) => p,
        Err(e) => return fail(format!("Failed to open storage: {}", e)),
    };

    match cli.command {
        Commands::Sample { .. } => ExitCode::SUCCESS,

        Commands::Upload { file } => {
            let bytes = match std::fs::read(&file) {
                Ok(b) => b,
                Err(e) => return fail(format!("Cannot read {}: {}", file.display(), e)),
            };
            let filename = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            match pipeline.upload_template(&filename, &bytes) {
                Ok(template) => {
                    print(&json!({"success": true, "template": template.summary()}));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }

        Commands::Templates => {
            print(&json!(pipeline.list_templates()));
            ExitCode::SUCCESS
        }

        Commands::Show { template } => match pipeline.get_template(&template) {
            Ok(t) => {
                print(&json!(&*t));
                ExitCode::SUCCESS
            }
            Err(e) => fail(e),
        },

        Commands::Preview { template, slide_index, out } => {
            match pipeline.preview(&PreviewTarget::Template(template), slide_index) {
                Ok(png) => match out {
                    Some(path) => match std::fs::write(&path, &png) {
                        Ok(()) => {
                            print(&json!({"success": true, "path": path, "bytes": png.len()}));
                            ExitCode::SUCCESS
                        }
                        Err(e) => fail(e),
                    },
                    None => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
                        print(&json!({"success": true, "slide_index": slide_index, "png_base64": encoded}));
                        ExitCode::SUCCESS
                    }
                },
                Err(e) => fail(e),
            }
        }

        Commands::Fill { template, topic, style_guide, wait } => {
            let style_guide: Metadata = match style_guide.as_deref().map(serde_json::from_str).transpose() {
                Ok(guide) => guide.unwrap_or_default(),
                Err(e) => return fail(format!("Invalid style guide: {}", e)),
            };
            let intent = BatchIntent { topic, style_guide, overrides: Vec::new() };
            let outcome = match pipeline.fill_placeholders(&template, &intent).await {
                Ok(o) => o,
                Err(e) => return fail(e),
            };
            let failures = json!(outcome.failures);
            let submitted = pipeline.submit_mappings(&template, outcome.mappings);
            finish(&pipeline, submitted, &wait, failures).await
        }

        Commands::Generate { template, payload, wait } => {
            let payload: GeneratePayload = match serde_json::from_str(&payload) {
                Ok(p) => p,
                Err(e) => return fail(format!("Invalid payload: {}", e)),
            };
            let submitted = pipeline.submit_generation(&template, &payload.content_mappings);
            finish(&pipeline, submitted, &wait, json!([])).await
        }
    }
}

/// Poll a submitted task at a fixed interval, then report it.
async fn finish(
    pipeline: &DeckPipeline,
    submitted: Result<TaskSnapshot, PipelineError>,
    wait: &WaitArgs,
    failures: serde_json::Value,
) -> ExitCode {
    let mut snapshot = match submitted {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    for attempt in 1..=wait.max_attempts {
        snapshot = match pipeline.task_status(&snapshot.task_id) {
            Ok(s) => s,
            Err(e) => return fail(e),
        };
        tracing::debug!(task_id = %snapshot.task_id, attempt, status = %snapshot.status, "Polled task");
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(wait.interval_ms)).await;
    }

    match snapshot.status {
        TaskStatus::Completed => {
            if let Some(out) = &wait.out {
                if let Err(e) = save(pipeline, &snapshot.task_id, out) {
                    return fail(e);
                }
            }
            print(&json!({"success": true, "task": snapshot, "failures": failures}));
            ExitCode::SUCCESS
        }
        TaskStatus::Failed => {
            print(&json!({"success": false, "task": snapshot, "failures": failures}));
            ExitCode::from(2)
        }
        _ => fail(format!(
            "Task {} still {} after {} attempts",
            snapshot.task_id, snapshot.status, wait.max_attempts
        )),
    }
}

fn save(pipeline: &DeckPipeline, task_id: &str, out: &Path) -> Result<(), String> {
    let bytes = pipeline.download(task_id).map_err(|e| e.to_string())?;
    std::fs::write(out, bytes).map_err(|e| format!("Cannot write {}: {}", out.display(), e))
}
