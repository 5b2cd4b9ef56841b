//! ABOUTME: borgwatch entry point with serve, collect, and migrate commands
//! ABOUTME: Builds the configured snapshot source and runs the scheduler next to the API

use bw_collector::Reconciler;
use bw_config::{Config, InvocationKind};
use bw_core::telemetry;
use bw_db::Db;
use bw_obs::ObsState;
use bw_scheduler::{CycleOutcome, CycleScheduler, ScheduledRepository, SchedulerConfig};
use bw_source::{
    BorgmaticSource, ContainerInvocation, DirectInvocation, SnapshotSource,
};
use bw_web::AppState;
use clap::{Parser, Subcommand};
use std::{future::Future, process, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "borgwatch")]
#[command(about = "Collects borgmatic repository state and serves it over HTTP", long_about = None)]
struct Cli {
    /// Configuration file used instead of ./borgwatch.toml
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// `production` switches logs to JSON
    #[arg(long, global = true, env = "BORGWATCH_ENV", default_value = "development")]
    env: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Commands {
    /// Run the collection scheduler and the read API (default)
    Serve,
    /// Run a single collection cycle and print its report
    Collect,
    /// Create or upgrade the database schema and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.env, "borgwatch");

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => {
            tracing::debug!(?config, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let db = match Db::with_options(
        &config.database.path,
        config.database.pool_size,
        config.database.sqlite_wal,
    )
    .await
    {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, db).await,
        Commands::Collect => collect(config, db).await,
        Commands::Migrate => migrate(db).await,
    };

    if let Err(e) = result {
        tracing::error!("borgwatch exited with error: {}", e);
        process::exit(1);
    }
}

fn build_source(config: &Config) -> Arc<dyn SnapshotSource> {
    let collector = &config.collector;
    match collector.invocation {
        InvocationKind::Direct => Arc::new(
            BorgmaticSource::new(DirectInvocation::new(
                &collector.borgmatic_bin,
                collector.source_timeout(),
            ))
            .with_config_path(collector.config_path.clone())
            .with_database_dumps(collector.collect_database_dumps),
        ),
        InvocationKind::Container => Arc::new(
            BorgmaticSource::new(ContainerInvocation::new(
                &collector.container_runtime,
                &collector.container,
                &collector.borgmatic_bin,
                collector.source_timeout(),
            ))
            .with_config_path(collector.config_path.clone())
            .with_database_dumps(collector.collect_database_dumps),
        ),
    }
}

fn build_scheduler(config: &Config, db: Db, obs: &ObsState) -> CycleScheduler {
    let repositories = config
        .repositories
        .iter()
        .map(|r| ScheduledRepository::new(&r.name, r.path.clone()))
        .collect();
    let reconciler = Arc::new(Reconciler::new(db, config.collector.store_timeout()));

    CycleScheduler::new(
        SchedulerConfig {
            interval: config.collector.interval(),
            max_concurrent_repositories: config.collector.max_concurrent_repositories,
        },
        repositories,
        build_source(config),
        reconciler,
        obs.metrics.clone(),
    )
}

async fn serve(config: Config, db: Db) -> bw_core::Result<()> {
    let obs = ObsState::new();
    let scheduler = build_scheduler(&config, db.clone(), &obs);
    let cancel = CancellationToken::new();

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(
        bind_addr = %bind_addr,
        repositories = config.repositories.len(),
        "borgwatch serving"
    );

    let web_future = bw_web::start_server(&bind_addr, AppState::new(db, obs.clone()));
    let scheduler_future = scheduler.run(cancel.clone());
    let grace = config.collector.store_timeout() + SHUTDOWN_MARGIN;

    supervise(web_future, scheduler_future, &cancel, grace, &obs).await
}

/// Extra time past the store timeout given to in-flight reconciles at shutdown
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(5);

/// Run the web server and the scheduler until either stops
///
/// The web server owns signal handling. When it stops, collection is
/// cancelled and the scheduler gets `grace` to commit or roll back whatever
/// reconcile is in flight before it is dropped.
async fn supervise<W, S>(
    web: W,
    scheduler: S,
    cancel: &CancellationToken,
    grace: Duration,
    obs: &ObsState,
) -> bw_core::Result<()>
where
    W: Future<Output = bw_core::Result<()>>,
    S: Future<Output = bw_core::Result<()>>,
{
    tokio::pin!(scheduler);

    tokio::select! {
        web_result = web => {
            tracing::info!("Web server stopped; cancelling collection");
            cancel.cancel();
            match tokio::time::timeout(grace, &mut scheduler).await {
                Ok(Ok(())) => tracing::info!("Collection scheduler drained"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Collection scheduler failed while draining")
                }
                Err(_) => tracing::warn!(
                    grace = %humantime::format_duration(grace),
                    "Collection scheduler did not drain in time"
                ),
            }
            web_result
        }
        scheduler_result = &mut scheduler => {
            obs.readiness.set_ready(false);
            tracing::error!("Collection scheduler stopped");
            scheduler_result
        }
    }
}

async fn collect(config: Config, db: Db) -> bw_core::Result<()> {
    let obs = ObsState::new();
    let scheduler = build_scheduler(&config, db, &obs);
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight reconciliations");
            signal_token.cancel();
        }
    });

    match scheduler.run_cycle(&cancel).await? {
        CycleOutcome::Completed(report) => {
            let json = serde_json::to_string_pretty(&report).map_err(|e| {
                bw_core::Error::Validation(format!("Failed to render report: {}", e))
            })?;
            println!("{}", json);
        }
        CycleOutcome::Skipped => tracing::warn!("Another cycle was already running"),
    }
    Ok(())
}

async fn migrate(db: Db) -> bw_core::Result<()> {
    db.migrate().await?;
    let stats = db.stats().await?;
    for (table, count) in &stats.table_counts {
        tracing::info!(table = %table, rows = count, "Table ready");
    }
    Ok(())
}
