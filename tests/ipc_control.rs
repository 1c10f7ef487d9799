//! Toggle control over the Unix socket, from client call to session state.

use eva_voice::assistant::{ToggleState, VoiceAssistant};
use eva_voice::audio::playback::MockPlayback;
use eva_voice::audio::recorder::MockAudioSource;
use eva_voice::captions::{Captions, MockRecognizer};
use eva_voice::config::LiveConfig;
use eva_voice::daemon::handler::AssistantCommandHandler;
use eva_voice::ipc::client::send_command;
use eva_voice::ipc::protocol::{Command, Response};
use eva_voice::ipc::server::IpcServer;
use eva_voice::live::backend::{MockBackend, MockBackendProbe};
use eva_voice::notify::{LogNotifier, Notifier};
use eva_voice::session::{CapturePipeline, PlaybackPipeline, SessionParts, VoiceSession};
use eva_voice::store::{CareStore, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

struct Daemon {
    _dir: TempDir,
    socket: PathBuf,
    server: Arc<IpcServer>,
    shutdown: Arc<Notify>,
    backend: MockBackendProbe,
}

async fn spawn_daemon() -> Daemon {
    let backend = MockBackend::new();
    let backend_probe = backend.probe();
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let store: Arc<dyn CareStore> = Arc::new(MemoryStore::new());
    let session = VoiceSession::new(
        LiveConfig::default(),
        SessionParts {
            backend: Arc::new(backend),
            capture: CapturePipeline::new(
                Box::new(MockAudioSource::new()),
                160,
                Duration::from_millis(2),
            ),
            playback: PlaybackPipeline::new(Box::new(MockPlayback::new())),
            captions: Captions::with_recognizer(
                Box::new(MockRecognizer::new()),
                Arc::clone(&notifier),
            ),
            store: Arc::clone(&store),
            notifier: Arc::clone(&notifier),
        },
    );
    let (assistant, _task) = VoiceAssistant::spawn(session, store, notifier);

    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("eva.sock");
    let server = Arc::new(IpcServer::new(socket.clone()));
    let shutdown = Arc::new(Notify::new());
    let handler = AssistantCommandHandler::new(assistant.clone(), Arc::clone(&shutdown));
    let running = Arc::clone(&server);
    tokio::spawn(async move { running.start(handler).await });

    for _ in 0..100 {
        if socket.exists() && assistant.state() == ToggleState::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Daemon {
        _dir: dir,
        socket,
        server,
        shutdown,
        backend: backend_probe,
    }
}

#[tokio::test]
async fn status_reports_idle_with_captions() {
    let daemon = spawn_daemon().await;

    let response = send_command(&daemon.socket, Command::Status).await.unwrap();
    assert_eq!(
        response,
        Response::Status {
            state: ToggleState::Idle,
            disabled: false,
            captions: true,
        }
    );
    daemon.server.stop().unwrap();
}

#[tokio::test]
async fn toggle_twice_opens_then_closes_the_session() {
    let daemon = spawn_daemon().await;

    let response = send_command(&daemon.socket, Command::Toggle).await.unwrap();
    assert_eq!(
        response,
        Response::State {
            state: ToggleState::Active
        }
    );
    assert!(daemon.backend.is_open());

    let response = send_command(&daemon.socket, Command::Toggle).await.unwrap();
    assert_eq!(
        response,
        Response::State {
            state: ToggleState::Idle
        }
    );
    assert!(!daemon.backend.is_open());
    daemon.server.stop().unwrap();
}

#[tokio::test]
async fn shutdown_command_signals_the_daemon() {
    let daemon = spawn_daemon().await;
    let notified = daemon.shutdown.notified();

    send_command(&daemon.socket, Command::Start).await.unwrap();
    let response = send_command(&daemon.socket, Command::Shutdown)
        .await
        .unwrap();
    assert_eq!(response, Response::Ok);

    tokio::time::timeout(Duration::from_secs(1), notified)
        .await
        .unwrap();
    assert!(!daemon.backend.is_open());
    daemon.server.stop().unwrap();
}
