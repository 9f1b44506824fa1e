use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ingestor::cancel::CancelToken;
use ingestor::cli::output::{render_history, render_report, render_sources};
use ingestor::cli::{Cli, Commands};
use ingestor::clock::SystemClock;
use ingestor::config::{Config, SourceCatalog};
use ingestor::errors::IngestResult;
use ingestor::services::{JsonLinesSink, Orchestrator, RunFilter};
use ingestor::sources::{AdapterRegistry, RetryPolicy};
use ingestor::storage::{
    FingerprintStore, JobRepository, SqliteFingerprintStore, SqliteJobRepository,
    SqliteSourceRepository, SqliteStorage,
};

fn main() {
    init_tracing();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    // stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> IngestResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize storage
    let storage = SqliteStorage::new(&config.db_path)?;
    let source_repo = Arc::new(SqliteSourceRepository::new(storage.clone()));
    let fingerprints = Arc::new(SqliteFingerprintStore::new(storage.clone()));
    let job_repo = Arc::new(SqliteJobRepository::new(storage));

    let adapters = AdapterRegistry::with_defaults(config.request_timeout, RetryPolicy::default())?;
    let orchestrator = Orchestrator::new(
        config.orchestrator_config(),
        source_repo,
        fingerprints.clone(),
        job_repo.clone(),
        adapters,
        Arc::new(JsonLinesSink::new(&config.sink_path)),
        Arc::new(SystemClock),
    );

    let catalog = SourceCatalog::load(&config.sources_path)?;
    orchestrator.sync_catalog(catalog.sources())?;

    match cli.command {
        Commands::Run {
            sources,
            languages,
            max_articles,
            dry_run,
            force,
            deadline_secs,
            json,
        } => {
            let filter = RunFilter::all()
                .sources(sources)
                .languages(languages)
                .max_articles(max_articles)
                .force(force);
            cmd_run(
                &orchestrator,
                filter,
                dry_run,
                deadline_secs.map(Duration::from_secs),
                json,
            )
        }
        Commands::Sources => cmd_sources(&orchestrator),
        Commands::Reactivate { id } => cmd_reactivate(&orchestrator, &id),
        Commands::History { id, limit } => cmd_history(job_repo.as_ref(), &id, limit),
        Commands::Prune { days } => cmd_prune(fingerprints.as_ref(), days),
    }
}

fn cmd_run(
    orchestrator: &Orchestrator,
    filter: RunFilter,
    dry_run: bool,
    deadline: Option<Duration>,
    json: bool,
) -> IngestResult<()> {
    let runtime = tokio::runtime::Runtime::new()?;

    let report = runtime.block_on(async {
        let cancel = CancelToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                on_signal.cancel();
            }
        });

        orchestrator
            .run_acquisition(filter, dry_run, cancel, deadline)
            .await
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }

    Ok(())
}

fn cmd_sources(orchestrator: &Orchestrator) -> IngestResult<()> {
    let sources = orchestrator.overview()?;

    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    print!("{}", render_sources(&sources));
    Ok(())
}

fn cmd_reactivate(orchestrator: &Orchestrator, id: &str) -> IngestResult<()> {
    let health = orchestrator.reactivate(id)?;
    println!(
        "Reactivated {} (status: {}, health: {})",
        id, health.status, health.score
    );
    Ok(())
}

fn cmd_history(jobs: &dyn JobRepository, id: &str, limit: usize) -> IngestResult<()> {
    let recent = jobs.recent(id, limit)?;
    print!("{}", render_history(id, &recent));
    Ok(())
}

fn cmd_prune(fingerprints: &dyn FingerprintStore, days: u32) -> IngestResult<()> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
    let removed = fingerprints.prune_before(cutoff)?;
    info!(removed, %cutoff, "pruned fingerprints");
    println!("Pruned {} fingerprints older than {} days.", removed, days);
    Ok(())
}
