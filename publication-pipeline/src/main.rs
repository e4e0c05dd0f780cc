use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use interfaces::{BaselineDraftingService, DraftingService, PublicationState, SecretStore};
use publication_pipeline::secrets::require_secret;
use publication_pipeline::sources::build_sources;
use publication_pipeline::{
    ChatCompletionDraftingService, Clock, Database, DraftingLoop, EnvSecretStore, Fetcher, FsBlobStore,
    PipelineConfig, PublicationCursor, PublicationIntake, PublicationStore, RunStateStore, SourceConfig, SourceScheduler,
    SqlitePublicationStore, SqliteRunStateStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "publication-pipeline", about = "Ingest materials from sources and draft them for approval")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "PIPELINE_CONFIG", default_value = "pipeline.json")]
    config: PathBuf,

    /// Overrides `database_url` from the configuration file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the drafting loop until Ctrl-C
    Run,
    /// Run a single scheduler tick
    Tick,
    /// Run a single drafting cycle
    Draft,
    /// List publications in a state
    List {
        #[arg(long, default_value = "pending-approval")]
        state: PublicationState,
    },
    /// Show persisted run state of every source
    Sources,
    /// Make a source due on the next tick
    ForceRerun { name: String },
    /// Attach an image from the blob store to a publication awaiting approval
    AttachImage {
        id: Uuid,
        key: String,
        #[arg(long, env = "PIPELINE_BLOB_DIR", default_value = "blobs")]
        blob_dir: PathBuf,
    },
}

struct App {
    config_path: PathBuf,
    config: PipelineConfig,
    database: Database,
    clock: Arc<dyn Clock>,
    secrets: Arc<dyn SecretStore>,
    fetcher: Arc<Fetcher>,
    store: Arc<dyn PublicationStore>,
    run_state: Arc<SqliteRunStateStore>,
}

impl App {
    async fn connect(cli: &Cli) -> Result<Self> {
        let config = PipelineConfig::load(&cli.config)?;
        let database_url = cli.database_url.clone().unwrap_or_else(|| config.database_url.clone());
        let database = Database::connect(&database_url)
            .await
            .with_context(|| format!("cannot open database {}", database_url))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            config_path: cli.config.clone(),
            fetcher: Arc::new(Fetcher::new(config.fetch.clone())?),
            store: Arc::new(SqlitePublicationStore::new(&database).with_clock(clock.clone())),
            run_state: Arc::new(SqliteRunStateStore::new(&database)),
            secrets: Arc::new(EnvSecretStore::new()),
            database,
            clock,
            config,
        })
    }

    async fn scheduler(&self) -> Result<SourceScheduler> {
        let sink = Arc::new(PublicationIntake::new(self.store.clone()));
        let scheduler = SourceScheduler::new(self.config.scheduler.clone(), self.clock.clone(), self.run_state.clone(), sink);
        let sources = build_sources(&self.config.sources, self.fetcher.clone(), self.secrets.as_ref(), self.clock.clone()).await?;
        scheduler.set_sources(sources).await;
        Ok(scheduler)
    }

    async fn drafting_loop(&self) -> Result<DraftingLoop> {
        let service: Arc<dyn DraftingService> = match &self.config.drafting.service {
            Some(service) => {
                let api_key = require_secret(self.secrets.as_ref(), &service.api_key_secret).await?;
                Arc::new(ChatCompletionDraftingService::new(service, api_key)?)
            }
            None => {
                info!("No drafting service configured; using baseline drafts");
                Arc::new(BaselineDraftingService)
            }
        };
        Ok(DraftingLoop::new(self.store.clone(), service, self.config.drafting.clone()))
    }
}

/// Re-read the configuration periodically and swap the source set when it
/// changes.
async fn reload_sources(app: Arc<App>, scheduler: Arc<SourceScheduler>, cancel: CancellationToken) {
    let Some(interval) = app.config.scheduler.reload_interval() else {
        return;
    };
    let mut current: Vec<SourceConfig> = app.config.sources.clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let reloaded = match PipelineConfig::load(&app.config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring configuration reload: {}", e);
                continue;
            }
        };
        if reloaded.sources == current {
            continue;
        }
        match build_sources(&reloaded.sources, app.fetcher.clone(), app.secrets.as_ref(), app.clock.clone()).await {
            Ok(sources) => {
                scheduler.set_sources(sources).await;
                current = reloaded.sources;
            }
            Err(e) => warn!("Keeping previous sources; reload failed: {}", e),
        }
    }
}

async fn run(app: App) -> Result<()> {
    let app = Arc::new(app);
    let scheduler = Arc::new(app.scheduler().await?);
    let drafting = Arc::new(app.drafting_loop().await?);
    let cancel = CancellationToken::new();

    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });
    let drafting_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { drafting.run(cancel).await }
    });
    let reload_task = tokio::spawn(reload_sources(app.clone(), scheduler, cancel.clone()));

    tokio::signal::ctrl_c().await.context("cannot listen for Ctrl-C")?;
    info!("Shutdown requested");
    cancel.cancel();

    let (scheduler_result, drafting_result, reload_result) = tokio::join!(scheduler_task, drafting_task, reload_task);
    for (name, result) in [("scheduler", scheduler_result), ("drafting loop", drafting_result), ("config reload", reload_result)] {
        if let Err(e) = result {
            error!("{} task failed: {}", name, e);
        }
    }
    info!("Publication pipeline stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let app = App::connect(&cli).await?;
    let database = app.database.clone();

    match cli.command {
        Command::Run => run(app).await?,
        Command::Tick => {
            let report = app.scheduler().await?.tick(&CancellationToken::new()).await?;
            if !report.ran() {
                println!("Execution period has not elapsed; nothing polled");
            }
            for outcome in &report.outcomes {
                match &outcome.error {
                    Some(e) => println!("{:<24} failed: {}", outcome.source, e),
                    None => println!("{:<24} {} items", outcome.source, outcome.items_found),
                }
            }
            for skipped in &report.skipped {
                println!("{:<24} skipped (ran recently)", skipped);
            }
        }
        Command::Draft => {
            let report = app.drafting_loop().await?.process_cycle(&CancellationToken::new()).await?;
            println!("{} drafted, {} failed", report.drafted.len(), report.failed.len());
        }
        Command::List { state } => {
            let mut cursor = PublicationCursor::new(app.store.clone(), state);
            for (index, publication) in cursor.list().await? {
                println!(
                    "{:>3}. {} [{}] {} ({})",
                    index,
                    publication.id,
                    publication.information_source,
                    publication.title,
                    publication.creation_date.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Sources => {
            for (name, state) in app.run_state.list().await? {
                let last_run = state
                    .last_run_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:<48} last run {} ({} requests in window)", name, last_run, state.request_count);
            }
        }
        Command::ForceRerun { name } => {
            let scheduler = app.scheduler().await?;
            if scheduler.force_rerun(&name).await? {
                println!("{} will run on the next tick", name);
            } else {
                println!("No run state recorded for {}", name);
            }
        }
        Command::AttachImage { id, key, blob_dir } => {
            let blobs = FsBlobStore::new(blob_dir);
            let mut cursor = PublicationCursor::new(app.store.clone(), PublicationState::PendingApproval);
            match cursor.center_on(id).await {
                Err(e) if e.is_stale() => anyhow::bail!("{} is not awaiting approval", id),
                result => result?,
            };
            cursor.attach_image(&blobs, &key).await?;
            println!("Attached {} to {}", key, id);
        }
    }
    database.close().await;
    Ok(())
}
