//! `stagedeploy` - staged, resumable deployments from the command line.

mod aws;
mod prompt;
mod stages;

use anyhow::Context;
use clap::Parser;
use stagedeploy::cancellation::CancellationToken;
use stagedeploy::cleanup::CleanupManager;
use stagedeploy::config::{ConfigResolver, Configuration, DeploySettings, InvocationConfig};
use stagedeploy::errors::{DeployError, ProgressError};
use stagedeploy::namespace::ResourceNamespace;
use stagedeploy::orchestrator::Orchestrator;
use stagedeploy::progress::{FileProgressStore, ProgressRecord, ProgressStore};
use stagedeploy::stages::StageContext;
use stagedeploy::utils::format_timestamp;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aws::AwsCli;

const DEFAULT_SETTINGS_FILE: &str = "stagedeploy.toml";

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CLEANUP_FAILED: u8 = 3;
const EXIT_INTERRUPTED: u8 = 130;

/// Deploy, resume and tear down staged infrastructure
#[derive(Parser, Debug)]
#[command(name = "stagedeploy", version, about, long_about = None)]
struct Cli {
    /// Deployment identifier (stack and resource name prefix)
    #[arg(long)]
    name: Option<String>,

    /// Target region
    #[arg(long)]
    region: Option<String>,

    /// Environment tag
    #[arg(long)]
    environment: Option<String>,

    /// Credential profile
    #[arg(long)]
    profile: Option<String>,

    /// Skip local tool and service reachability checks
    #[arg(long)]
    skip_prerequisites: bool,

    /// Use --name exactly as given instead of appending a random suffix
    #[arg(long)]
    no_identifier_suffix: bool,

    /// Remove every resource of the deployment, then exit
    #[arg(long, conflicts_with = "resume_from_stage")]
    cleanup: bool,

    /// Continue a previous run from this stage
    #[arg(long, value_name = "STAGE", value_parser = parse_stage)]
    resume_from_stage: Option<usize>,

    /// Print the saved progress, then exit
    #[arg(long, conflicts_with_all = ["cleanup", "reset_progress"])]
    show_progress: bool,

    /// Delete the saved progress, then exit
    #[arg(long, conflicts_with = "cleanup")]
    reset_progress: bool,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Settings file (defaults to ./stagedeploy.toml when present)
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Print the stages, then exit
    #[arg(long)]
    list_stages: bool,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn invocation(&self) -> InvocationConfig {
        InvocationConfig {
            name: self.name.clone(),
            region: self.region.clone(),
            environment: self.environment.clone(),
            profile: self.profile.clone(),
            skip_prerequisites: self.skip_prerequisites,
            no_identifier_suffix: self.no_identifier_suffix,
        }
    }
}

fn parse_stage(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("stages are numbered from 1".to_string()),
        Ok(stage) => Ok(stage),
        Err(e) => Err(e.to_string()),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(?cli, "Parsed arguments");

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Fatal error: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let settings = DeploySettings::load_or_default(
        cli.settings.as_deref(),
        Path::new(DEFAULT_SETTINGS_FILE),
    )?;
    let store = Arc::new(FileProgressStore::new(&settings.progress_file));

    if cli.show_progress {
        let record = store.load().context("reading saved progress")?;
        println!("{}", render_progress(record.as_ref(), &settings.program_name));
        return Ok(0);
    }
    if cli.reset_progress {
        store.reset()?;
        println!("Progress reset ({})", store.location());
        return Ok(0);
    }

    let registry = stages::registry()?;
    if cli.list_stages {
        for (index, name) in registry.names() {
            println!("{index:>2}. {name}");
        }
        return Ok(0);
    }

    let confirm = prompt::for_session(cli.yes);
    let requested = cli.resume_from_stage.unwrap_or(0);
    let fresh = requested == 0 && !cli.cleanup;
    let stored = load_progress(store.as_ref(), fresh)?;
    let invocation = cli.invocation();
    let stored = ConfigResolver::matching_record(&invocation, stored.as_ref());
    let resolver = ConfigResolver::new();

    if cli.cleanup {
        // Cleanup targets an existing deployment, so it recalls and never suffixes.
        let resolution = resolver.resolve(&invocation, 1, stored)?;
        let config = resolution.configuration;
        let owns_record = owns_record(stored, &config);
        return cleanup(config, &settings, store.as_ref(), owns_record, confirm.as_ref()).await;
    }

    let resolution = resolver.resolve(&invocation, requested, stored)?;
    let config = resolution.configuration;
    let planned = resolver
        .plan_start(requested, stored, &config, registry.len(), confirm.as_ref())
        .await;
    let start = match planned {
        Ok(start) => start,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(exit_code(&e));
        }
    };
    info!(
        deployment = %config.name,
        region = %config.region,
        environment = %config.environment,
        profile = %config.profile,
        start,
        "Starting deployment"
    );

    let cancel = Arc::new(CancellationToken::new());
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping the active stage");
                cancel.cancel("interrupted by operator");
            }
        });
    }

    let provider = Arc::new(AwsCli::new(&config));
    let settings = Arc::new(settings);
    let ctx = StageContext::new(config, provider, Arc::clone(&settings), confirm)
        .with_start_stage(start);
    let orchestrator = Orchestrator::new(registry, store).with_cancellation(cancel);

    match orchestrator.run(&ctx, start).await {
        Ok(report) => {
            println!(
                "Deployment {} complete: {} stage(s) run, {} skipped, {:.1}s",
                ctx.config.name,
                report.executed.len(),
                report.skipped.len(),
                report.duration.as_secs_f64()
            );
            println!("To tear it down:\n  {}", ctx.config.cleanup_command(&settings.program_name));
            Ok(0)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            let retry = e
                .resume_command()
                .map_or_else(|| ctx.resume_command(start), str::to_string);
            eprintln!("\nTo resume:\n  {retry}");
            Ok(exit_code(&e))
        }
    }
}

/// Reads the saved progress.
///
/// A fresh run overwrites the record anyway, so an unreadable one is only
/// reported. Resume and cleanup need it and fail instead.
fn load_progress(store: &dyn ProgressStore, fresh: bool) -> anyhow::Result<Option<ProgressRecord>> {
    match store.load() {
        Err(ProgressError::Malformed(reason)) if fresh => {
            warn!(location = %store.location(), reason, "Ignoring unreadable progress record");
            Ok(None)
        }
        loaded => loaded.context("reading saved progress (--reset-progress discards it)"),
    }
}

/// True when the saved progress belongs to the deployment being removed.
fn owns_record(stored: Option<&ProgressRecord>, config: &Configuration) -> bool {
    stored.is_some_and(|record| record.is_for(&config.name))
}

async fn cleanup(
    config: Configuration,
    settings: &DeploySettings,
    store: &dyn ProgressStore,
    owns_record: bool,
    confirm: &dyn stagedeploy::prompt::Confirm,
) -> anyhow::Result<u8> {
    let question = format!(
        "Delete every resource of deployment {} in {} (profile {})?",
        config.name, config.region, config.profile
    );
    if !confirm.confirm(&question).await {
        println!("Cleanup cancelled");
        return Ok(0);
    }

    let provider = AwsCli::new(&config);
    let namespace = ResourceNamespace::new(&settings.namespace, &config);
    let policy = settings.poll_policy(settings.timeouts.stack_delete_seconds);
    let result = CleanupManager::new(&provider, &provider, &provider, &namespace, policy)
        .with_batch_size(settings.deploy.purge_batch_size)
        .cleanup(&config)
        .await;

    println!("{result}");
    if result.is_success() {
        if owns_record {
            store.reset()?;
        } else {
            debug!(deployment = %config.name, "Saved progress belongs to another deployment, keeping it");
        }
        Ok(0)
    } else {
        Ok(EXIT_CLEANUP_FAILED)
    }
}

/// Process exit status for a failed run.
fn exit_code(error: &DeployError) -> u8 {
    match error {
        DeployError::Interrupted { .. } => EXIT_INTERRUPTED,
        DeployError::InvalidResumeStage { .. } => EXIT_USAGE,
        _ => EXIT_FAILURE,
    }
}

/// Human-readable view of the saved progress.
fn render_progress(record: Option<&ProgressRecord>, program: &str) -> String {
    let Some(record) = record else {
        return "No progress found".to_string();
    };
    let config = &record.configuration;
    format!(
        "Last completed stage: {} ({})\n\
         Completed at:         {}\n\
         Deployment:           {}\n\
         Region:               {}\n\
         Environment:          {}\n\
         Profile:              {}\n\
         \n\
         Resume with:\n  {}",
        record.last_completed_stage,
        record.last_completed_stage_name,
        format_timestamp(&record.timestamp),
        config.name,
        config.region,
        config.environment,
        config.profile,
        config.resume_command(program, record.last_completed_stage + 1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_show_progress_without_record() {
        assert_eq!(render_progress(None, "stagedeploy"), "No progress found");
    }

    #[test]
    fn test_show_progress_with_record() {
        let record = ProgressRecord::now(2, "Deploy infrastructure stack", Configuration::new("demo-a1b2c3"));
        let shown = render_progress(Some(&record), "stagedeploy");

        assert!(shown.starts_with("Last completed stage: 2 (Deploy infrastructure stack)"));
        assert!(shown.contains("stagedeploy --resume-from-stage 3 --name demo-a1b2c3"));
    }

    #[test]
    fn test_stage_zero_is_a_usage_error() {
        let err = Cli::try_parse_from(["stagedeploy", "--resume-from-stage", "0"]).unwrap_err();
        assert_eq!(err.exit_code(), i32::from(EXIT_USAGE));
    }

    #[test]
    fn test_cleanup_and_resume_conflict() {
        assert!(Cli::try_parse_from(["stagedeploy", "--cleanup", "--resume-from-stage", "2"]).is_err());
    }

    #[test]
    fn test_invocation_keeps_defaults_unset() {
        let cli = Cli::try_parse_from(["stagedeploy", "--region", "eu-west-1", "-vv"]).unwrap();
        let invocation = cli.invocation();

        assert_eq!(cli.verbose, 2);
        assert_eq!(invocation.region.as_deref(), Some("eu-west-1"));
        assert!(invocation.name.is_none());
        assert!(!invocation.no_identifier_suffix);
    }

    #[test]
    fn test_cleanup_only_owns_the_matching_record() {
        let record = ProgressRecord::now(4, "Upload assets", Configuration::new("demo-a1b2c3"));

        assert!(owns_record(Some(&record), &Configuration::new("demo-a1b2c3")));
        assert!(!owns_record(Some(&record), &Configuration::new("other")));
        assert!(!owns_record(None, &Configuration::new("demo-a1b2c3")));
    }

    #[test]
    fn test_cleanup_of_another_deployment_ignores_the_record() {
        let record = ProgressRecord::now(4, "Upload assets", Configuration::new("demo-a1b2c3"));
        let cli = Cli::try_parse_from(["stagedeploy", "--cleanup", "--name", "other"]).unwrap();
        let invocation = cli.invocation();

        let stored = ConfigResolver::matching_record(&invocation, Some(&record));
        let config = ConfigResolver::new().resolve(&invocation, 1, stored).unwrap().configuration;

        assert!(stored.is_none());
        assert_eq!(config.name, "other");
        assert!(!owns_record(stored, &config));
    }

    #[test]
    fn test_fresh_run_skips_unreadable_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress");
        std::fs::write(&path, "PROFILE=prod\nnot a record\n").unwrap();
        let store = FileProgressStore::new(&path);

        assert!(load_progress(&store, true).unwrap().is_none());
        let err = load_progress(&store, false).unwrap_err();
        assert!(format!("{err:#}").contains("Malformed progress record"));
    }

    #[test]
    fn test_exit_codes() {
        let interrupted = DeployError::Interrupted {
            index: 3,
            name: "Verify service role".to_string(),
            resume_command: String::new(),
        };
        assert_eq!(exit_code(&interrupted), 130);
        assert_eq!(exit_code(&DeployError::InvalidResumeStage { requested: 9, max: 8 }), 2);
        assert_eq!(exit_code(&DeployError::Preflight("no aws".to_string())), 1);
    }
}
