//! Long-running assistant process: hardware, session task and IPC server.

pub mod handler;

use crate::config::Config;
use crate::error::{EvaError, Result};
use crate::store::{CareStore, JsonFileStore, MemoryStore};
use std::sync::Arc;

/// Open the configured application store: a JSON file, or memory when no path is set.
pub fn open_store(config: &Config) -> Result<Arc<dyn CareStore>> {
    match &config.store.path {
        Some(path) => {
            let store = JsonFileStore::open(path)?;
            tracing::info!(path = %store.path().display(), "using JSON store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("no store path configured, state is kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run the assistant until SIGINT, SIGTERM or an IPC `shutdown`.
///
/// With `foreground`, toggle-state changes are printed to stdout.
#[cfg(feature = "cpal-audio")]
pub async fn run_daemon(
    config: Config,
    socket_path: Option<std::path::PathBuf>,
    foreground: bool,
) -> Result<()> {
    use crate::assistant::VoiceAssistant;
    use crate::ipc::server::IpcServer;
    use crate::notify::{LogNotifier, Notifier};
    use crate::session::{SessionParts, VoiceSession};
    use tokio::sync::Notify;

    config.validate()?;

    let store = open_store(&config)?;
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let parts = SessionParts::from_config(&config, Arc::clone(&store), Arc::clone(&notifier))?;
    let session = VoiceSession::new(config.live.clone(), parts);
    let (assistant, assistant_task) = VoiceAssistant::spawn(session, store, notifier);

    if foreground {
        let mut states = assistant.subscribe();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                println!("[{}]", state);
            }
        });
    }

    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path));
    let shutdown = Arc::new(Notify::new());
    let handler = handler::AssistantCommandHandler::new(assistant.clone(), Arc::clone(&shutdown));

    let running = Arc::clone(&server);
    let server_task = tokio::spawn(async move { running.start(handler).await });
    tracing::info!("assistant ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("signal handler: {}", e);
            }
            tracing::info!("received SIGTERM, shutting down");
        }
        _ = shutdown.notified() => tracing::info!("shutdown requested over IPC"),
    }

    if let Err(e) = assistant.shutdown().await {
        tracing::debug!("assistant already stopped: {}", e);
    }
    if let Err(e) = assistant_task.await {
        tracing::error!("assistant task failed: {}", e);
    }

    server.stop()?;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("IPC server failed: {}", e),
        Err(e) => tracing::error!("IPC server task failed: {}", e),
    }

    tracing::info!("assistant stopped");
    Ok(())
}

#[cfg(all(feature = "cpal-audio", unix))]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| EvaError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(all(feature = "cpal-audio", not(unix)))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
