//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use outreach_core::OutreachService;
use outreach_shared::{
    AppConfig, JobId, JobInputs, JobStatus, TemplateKind, config_file_path, init_config,
    load_config, validate_api_key,
};
use outreach_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Outreach: generate personalized outreach messages.
#[derive(Parser)]
#[command(
    name = "outreach",
    version,
    about = "Generate personalized outreach messages from templates.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate an outreach message and wait for the result.
    Generate {
        /// Path to the template file ({{placeholder}} syntax).
        #[arg(short, long)]
        template: PathBuf,

        /// Recipient's full name.
        #[arg(short, long)]
        name: String,

        /// Recipient's area of interest.
        #[arg(short, long)]
        interest: String,

        /// Template kind: research, book, or general (inferred if omitted).
        #[arg(short, long)]
        kind: Option<String>,

        /// Owner identifier recorded with the job.
        #[arg(long, default_value = "cli", env = "OUTREACH_OWNER")]
        owner: String,
    },

    /// Show the status of a previously submitted job.
    Status {
        /// Job id to look up.
        job_id: String,
    },

    /// Print a stored artifact body.
    Artifact {
        /// Artifact id to look up.
        artifact_id: String,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Create a default config file at ~/.outreach/outreach.toml.
    Init,
    /// Print the config file path.
    Path,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "outreach=info",
        1 => "outreach=debug",
        _ => "outreach=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate {
            template,
            name,
            interest,
            kind,
            owner,
        } => cmd_generate(&template, &name, &interest, kind.as_deref(), &owner).await,
        Command::Status { job_id } => cmd_status(&job_id).await,
        Command::Artifact { artifact_id } => cmd_artifact(&artifact_id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => {
                let path = init_config()?;
                println!("Created {}", path.display());
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", config_file_path()?.display());
                Ok(())
            }
        },
    }
}

async fn cmd_generate(
    template: &Path,
    name: &str,
    interest: &str,
    kind: Option<&str>,
    owner: &str,
) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config.search.api_key_env)?;
    validate_api_key(&config.synthesis.api_key_env)?;

    let template_text = std::fs::read_to_string(template)
        .map_err(|e| eyre!("could not read template {}: {e}", template.display()))?;

    let template_kind = kind
        .map(|k| k.parse::<TemplateKind>().map_err(|e| eyre!(e)))
        .transpose()?;

    let storage = open_storage(&config).await?;
    let service = OutreachService::start_from_config(storage, &config)?;

    let inputs = JobInputs {
        template_text,
        recipient_name: name.to_string(),
        recipient_interest: interest.to_string(),
        template_kind,
    };
    let job_id = service.submit(owner, inputs).await?;
    info!(job_id = %job_id, "job submitted");

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid spinner template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("waiting for worker...");

    let poll_interval = Duration::from_millis(config.defaults.poll_interval_ms);
    let (status, payload) = loop {
        tokio::time::sleep(poll_interval).await;

        let Some((status, payload)) = service.get_status(&job_id).await? else {
            continue;
        };
        if status.is_terminal() {
            break (status, payload);
        }
        if let Some(step) = &payload.current_step {
            let phase = payload.step_status.as_deref().unwrap_or("running");
            spinner.set_message(format!("{step} ({phase})"));
        }
    };
    spinner.finish_and_clear();

    match status {
        JobStatus::Completed => {
            let artifact_id = payload
                .artifact_id
                .ok_or_else(|| eyre!("completed job has no artifact id"))?;
            let artifact = service
                .get_artifact(&artifact_id)
                .await?
                .ok_or_else(|| eyre!("artifact {artifact_id} not found"))?;

            println!("{}", artifact.body);
            if let Some(total) = payload.total_duration_ms {
                info!(artifact_id = %artifact_id, total_ms = total, "message generated");
            }
            Ok(())
        }
        _ => {
            let step = payload.failed_step.as_deref().unwrap_or("unknown step");
            let class = payload.error_type.as_deref().unwrap_or("unknown_error");
            let message = payload.error_message.as_deref().unwrap_or("no details");
            Err(eyre!("job failed in {step} ({class}): {message}"))
        }
    }
}

async fn cmd_status(job_id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let job_id: JobId = job_id.parse().map_err(|e| eyre!("invalid job id: {e}"))?;
    match storage.get_job(&job_id).await? {
        Some((status, payload)) => {
            println!("status: {status}");
            if let Some(step) = &payload.current_step {
                println!(
                    "step:   {step} ({})",
                    payload.step_status.as_deref().unwrap_or("running")
                );
            }
            for timing in &payload.step_timings {
                println!("  {}: {}ms", timing.step, timing.duration_ms);
            }
            if let Some(artifact_id) = &payload.artifact_id {
                println!("artifact: {artifact_id}");
            }
            if let Some(error_type) = &payload.error_type {
                println!(
                    "error: {error_type} in {}: {}",
                    payload.failed_step.as_deref().unwrap_or("unknown step"),
                    payload.error_message.as_deref().unwrap_or("no details"),
                );
            }
            Ok(())
        }
        None => Err(eyre!("no job found with id {job_id}")),
    }
}

async fn cmd_artifact(artifact_id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let artifact_id = artifact_id
        .parse()
        .map_err(|e| eyre!("invalid artifact id: {e}"))?;
    match storage.get_artifact(&artifact_id).await? {
        Some(artifact) => {
            println!("{}", artifact.body);
            Ok(())
        }
        None => Err(eyre!("no artifact found with id {artifact_id}")),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open the job database, expanding a leading `~` in the configured path.
async fn open_storage(config: &AppConfig) -> Result<std::sync::Arc<Storage>> {
    let raw = &config.defaults.db_path;
    let path = match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .ok_or_else(|| eyre!("could not determine home directory"))?
            .join(rest),
        None => PathBuf::from(raw),
    };
    Ok(std::sync::Arc::new(Storage::open(&path).await?))
}
