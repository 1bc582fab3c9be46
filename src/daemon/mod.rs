// Background daemon: heartbeat scheduler plus optional outbox watcher
//
// Runs until Ctrl-C or SIGTERM. Shutdown stops the timer and the watcher;
// an AI call already in flight is left to finish on its own.

pub mod lifecycle;

pub use lifecycle::{DaemonLifecycle, StopOutcome};

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::claude::{AiClient, ClaudeCli};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::heartbeat::{ActivityLog, Heartbeat, HeartbeatDeps};
use crate::identity::Identity;
use crate::outbox::{self, Outbox, SpeechDispatcher, WatchOptions};
use crate::store::Store;

/// Shared handles built from a loaded config
#[derive(Clone)]
pub struct Services {
    pub store: Arc<Store>,
    pub identity: Identity,
    pub outbox: Outbox,
    pub client: Arc<dyn AiClient>,
}

impl Services {
    /// Open the database and make sure identity files and the outbox exist
    pub fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(Store::open(&config.db_path())?);
        let identity = Identity::new(config.data_dir());
        identity.ensure_files()?;
        let outbox = Outbox::new(config.outbox_dir());
        outbox.ensure_dir()?;
        let client: Arc<dyn AiClient> =
            Arc::new(ClaudeCli::new(config.claude.clone(), identity.clone()));

        Ok(Self {
            store,
            identity,
            outbox,
            client,
        })
    }

    pub fn heartbeat(&self, config: &Config) -> Heartbeat {
        let deps = HeartbeatDeps {
            store: self.store.clone(),
            client: self.client.clone(),
            identity: self.identity.clone(),
            outbox: self.outbox.clone(),
            activity: Some(ActivityLog::new(config.logs_dir())),
        };
        Heartbeat::new(deps, config.heartbeat_interval())
    }

    pub fn conversation(&self) -> Conversation {
        Conversation::new(
            self.client.clone(),
            self.store.clone(),
            self.identity.clone(),
            self.outbox.clone(),
        )
    }
}

/// Run the daemon in the foreground until a shutdown signal arrives
pub async fn run(config: Config) -> Result<()> {
    let lifecycle = DaemonLifecycle::new(config.pid_path());
    lifecycle.acquire()?;

    let result = serve(&config).await;

    if let Err(e) = lifecycle.cleanup() {
        warn!("{:#}", e);
    }
    result
}

async fn serve(config: &Config) -> Result<()> {
    let services = Services::open(config)?;
    let heartbeat = services.heartbeat(config);

    if config.heartbeat.enabled {
        heartbeat.start();
    } else {
        info!("Heartbeat disabled in config");
    }

    let cancel = CancellationToken::new();
    let watcher = if config.outbox.watch {
        let dispatcher = Arc::new(SpeechDispatcher::from_settings(&config.speech));
        Some(tokio::spawn(outbox::watch(
            services.outbox.clone(),
            dispatcher,
            WatchOptions::from_config(config),
            cancel.clone(),
        )))
    } else {
        None
    };

    info!(pid = std::process::id(), "fryler daemon running");
    shutdown_signal().await;
    info!("Shutting down");

    heartbeat.stop();
    cancel.cancel();
    if let Some(watcher) = watcher {
        match watcher.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Outbox watcher ended with error: {:#}", e),
            Err(e) => warn!("Outbox watcher task failed: {}", e),
        }
    }

    let status = heartbeat.status();
    info!(
        ticks = status.ticks_run,
        skipped = status.ticks_skipped,
        completed = status.tasks_completed,
        failed = status.tasks_failed,
        in_flight = status.in_flight,
        "Daemon stopped"
    );
    Ok(())
}

/// Ctrl-C anywhere, SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
