//! Async Unix socket server exposing the toggle control.

use crate::error::{EvaError, Result};
use crate::ipc::protocol::{Command, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Handles one decoded command.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Response;
}

pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/eva-voice.sock`, or a per-user path under /tmp.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("eva-voice.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/eva-voice-{}.sock", uid))
        }
    }

    /// Accept connections until [`IpcServer::stop`] is called.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| EvaError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| EvaError::IpcSocket {
            message: format!("Failed to bind to socket: {}", e),
        })?;
        tracing::info!(socket = %self.socket_path.display(), "IPC server listening");

        let handler = Arc::new(handler);

        while !self.shutdown.load(Ordering::SeqCst) {
            // Wake periodically to observe the shutdown flag
            let accept_result =
                tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept())
                    .await;

            match accept_result {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(EvaError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Stop accepting and remove the socket file.
    pub fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| EvaError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: CommandHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| EvaError::IpcConnection {
            message: format!("Failed to read from client: {}", e),
        })?;

    let response = match Command::from_json(line.trim()) {
        Ok(command) => {
            tracing::debug!(?command, "IPC command");
            handler.handle(command).await
        }
        Err(e) => Response::Error {
            message: format!("Failed to parse command: {}", e),
        },
    };

    let mut response_json = response.to_json().map_err(|e| EvaError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;
    response_json.push('\n');

    writer
        .write_all(response_json.as_bytes())
        .await
        .map_err(|e| EvaError::IpcConnection {
            message: format!("Failed to write to client: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| EvaError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok(())
}
