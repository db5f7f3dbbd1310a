use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sync_bus::{BroadcastBus, MessageBus};
use sync_destinations::adapters::{GitDestination, ObjectStorageDestination, SheetDestination, ShowcaseDestination};
use sync_destinations::{DestinationAdapter, DestinationRegistry, UploadWorker};
use sync_enrichers::build_registry;
use sync_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use sync_orchestrator::Orchestrator;
use sync_router::Router;
use sync_runtime::EnricherRuntime;
use sync_server::{serve, AppState};
use sync_store::{ConfigStore, EngineConfig, FsArtifactStore, JsonFileStore, StateStore};
use sync_types::{Destination, Tier};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sync-engine")]
#[command(about = "Headless FitGlue activity sync pipeline runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs every pipeline-runtime worker plus the HTTP ingest/status surface.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_guard, _info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)
                .context("failed to initialize logging")?;

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let runtime = build_runtime(&state_dir).await?;
            log_startup_paths(&state_dir, &addr);
            runtime.spawn_workers();
            serve(addr, runtime.app_state()).await?;
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("FITGLUE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".fitglue")
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting sync-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display(),
    );
}

/// Every long-running worker plus the shared handles the HTTP surface needs.
/// `spawn_workers` fires off one `tokio::spawn` per pipeline-runtime stage
/// (spec section 5): admission, enrichment, routing, one upload worker per
/// destination, and the pending-input poller.
struct Runtime {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<FsArtifactStore>,
    config: EngineConfig,
    orchestrator: Arc<Orchestrator>,
    enricher_runtime: Arc<EnricherRuntime>,
    router: Arc<Router>,
    upload_workers: Vec<Arc<UploadWorker>>,
}

impl Runtime {
    fn app_state(&self) -> AppState {
        AppState::new(self.bus.clone(), self.store.clone(), self.artifacts.clone())
    }

    fn spawn_workers(&self) {
        tokio::spawn(self.orchestrator.clone().run());
        tokio::spawn(self.enricher_runtime.clone().run());
        tokio::spawn(self.router.clone().run());
        for worker in &self.upload_workers {
            tokio::spawn(worker.clone().run());
        }
        info!(
            destinations = self.upload_workers.len(),
            inlining_threshold_bytes = self.config.inlining_threshold_bytes,
            "pipeline workers started"
        );
    }
}

async fn build_runtime(state_dir: &PathBuf) -> anyhow::Result<Runtime> {
    let config_store = ConfigStore::new(state_dir.join("config.json")).await?;
    let config = config_store.get().await;

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(state_dir.join("state")).await?);
    let artifacts = Arc::new(FsArtifactStore::new(
        state_dir.join(&config.artifact_bucket_root),
    ));
    let artifacts_dyn: Arc<dyn sync_store::ArtifactStore> = artifacts.clone();
    let bus: Arc<dyn MessageBus> = Arc::new(BroadcastBus::new());

    let orchestrator = Arc::new(Orchestrator::new(bus.clone(), store.clone()));

    let enricher_registry = build_registry(store.clone());
    let enricher_runtime = Arc::new(EnricherRuntime::new(
        bus.clone(),
        store.clone(),
        artifacts_dyn.clone(),
        enricher_registry,
        Duration::from_secs(30),
        config.inlining_threshold_bytes,
    ));

    let router = Arc::new(Router::new(bus.clone(), store.clone(), artifacts_dyn.clone()));

    let http_client = reqwest::Client::new();
    let destination_adapters: Vec<Arc<dyn DestinationAdapter>> = vec![
        Arc::new(SheetDestination::new(http_client.clone())),
        Arc::new(GitDestination::new(http_client.clone())),
        Arc::new(ObjectStorageDestination::new(http_client.clone())),
        Arc::new(ShowcaseDestination::new(http_client.clone(), Tier::Pro)),
    ];
    let destination_registry = DestinationRegistry::new(destination_adapters);
    let upload_workers = [
        Destination::GoogleSheets,
        Destination::GitRepo,
        Destination::ObjectStorage,
        Destination::PublicShowcase,
    ]
    .into_iter()
    .filter_map(|destination| destination_registry.get(destination))
    .map(|adapter| {
        Arc::new(UploadWorker::new(
            bus.clone(),
            store.clone(),
            artifacts_dyn.clone(),
            adapter,
        ))
    })
    .collect();

    Ok(Runtime {
        bus,
        store,
        artifacts,
        config,
        orchestrator,
        enricher_runtime,
        router,
        upload_workers,
    })
}
