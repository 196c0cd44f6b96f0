// crawlkeeper CLI
//
// Thin front end over the library: URL canonicalization, the discovery gate,
// a checkpointed validation run and read-only views of checkpoints and the
// feedback file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crawlkeeper::checkpoint::CheckpointManager;
use crawlkeeper::config::{FeedbackConfig, PipelineConfig};
use crawlkeeper::feedback::FeedbackStore;
use crawlkeeper::identity::{CanonicalUrl, DedupIndex};
use crawlkeeper::pipeline::{DiscoveryGate, GateDecision, load_candidates};

#[derive(Parser, Debug)]
#[command(
    name = "crawlkeeper",
    version,
    about = "Resilient crawl orchestration: canonical URLs, checkpoints, circuit breakers and feedback"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical form and content hash of each URL
    Canonicalize {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Run candidates through the discovery gate and print the admitted ones
    Admit {
        /// One URL per line, optionally followed by tab-separated source and confidence
        #[arg(long)]
        input: PathBuf,

        /// Feedback file consulted for suppression and confidence
        #[arg(long, default_value = "feedback.json")]
        feedback: PathBuf,
    },

    /// Validate every URL of an input file, resuming from the stage checkpoint
    Validate {
        /// One URL per line, optionally followed by tab-separated source and confidence
        #[arg(long)]
        input: PathBuf,

        /// JSON config file; defaults are used when absent
        #[arg(long)]
        config: Option<PathBuf>,

        /// Checkpoint directory used when no config file is given
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,

        /// Override the stage name
        #[arg(long)]
        stage: Option<String>,
    },

    /// Summarize every stage checkpoint in a directory
    Status {
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,
    },

    /// Print the quality report of a feedback file
    Feedback {
        #[arg(long, default_value = "feedback.json")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Canonicalize { urls } => canonicalize(&urls),
        Command::Admit { input, feedback } => admit(input, feedback).await,
        Command::Validate {
            input,
            config,
            checkpoint_dir,
            stage,
        } => validate(input, config, checkpoint_dir, stage).await,
        Command::Status { checkpoint_dir } => status(checkpoint_dir).await,
        Command::Feedback { file } => feedback(file).await,
    }
}

fn canonicalize(urls: &[String]) -> Result<()> {
    for raw in urls {
        match CanonicalUrl::parse(raw) {
            Ok(url) => println!("{}\t{}", url.content_hash(), url.as_str()),
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

async fn admit(input: PathBuf, feedback_path: PathBuf) -> Result<()> {
    let candidates = load_candidates(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let feedback = Arc::new(
        FeedbackStore::open(&feedback_path, FeedbackConfig::default())
            .await
            .context("Failed to load feedback file")?,
    );
    let gate = DiscoveryGate::new(Arc::new(DedupIndex::new()), Arc::clone(&feedback));

    for candidate in &candidates {
        match gate.admit(candidate) {
            GateDecision::Admitted(admitted) => println!(
                "{}\t{}\t{:.3}",
                admitted.url.as_str(),
                admitted.source,
                admitted.confidence
            ),
            GateDecision::Malformed(e) => log::warn!("{e}"),
            GateDecision::Duplicate => log::debug!("Duplicate: {}", candidate.url),
            GateDecision::LowQualityPattern { pattern } => {
                log::info!("Suppressed {} (pattern {pattern})", candidate.url);
            }
            GateDecision::ThrottledSource { source } => {
                log::info!("Suppressed {} (source {source} throttled)", candidate.url);
            }
        }
    }

    feedback.save().await.context("Failed to save feedback file")?;
    Ok(())
}

async fn validate(
    input: PathBuf,
    config_path: Option<PathBuf>,
    checkpoint_dir: PathBuf,
    stage: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::from_json_file(&path)?,
        None => PipelineConfig::builder()
            .checkpoint_dir(checkpoint_dir)
            .build()
            .context("Invalid default configuration")?,
    };
    if let Some(stage) = stage {
        config = config.with_stage_name(stage);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; finishing in-flight requests and pausing");
            on_signal.cancel();
        }
    });

    let report = crawlkeeper::validate(&config, &input, &cancel)
        .await
        .with_context(|| format!("Validation of {} failed", input.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn status(checkpoint_dir: PathBuf) -> Result<()> {
    let manager = CheckpointManager::new(checkpoint_dir, Default::default());
    let summaries = manager
        .stage_summaries()
        .await
        .context("Failed to read checkpoints")?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

async fn feedback(file: PathBuf) -> Result<()> {
    let store = FeedbackStore::open(&file, FeedbackConfig::default())
        .await
        .context("Failed to load feedback file")?;
    println!("{}", serde_json::to_string_pretty(&store.quality_report())?);
    Ok(())
}
