//! Unix socket server for the command surface

use crate::protocol::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct ControlServer {
    path: PathBuf,
    listener: UnixListener,
    broadcast_tx: broadcast::Sender<String>,
}

impl ControlServer {
    pub async fn bind(path: &Path) -> std::io::Result<Self> {
        // A stale socket from a previous run blocks bind.
        let _ = std::fs::remove_file(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        let (broadcast_tx, _) = broadcast::channel(64);
        info!("Control socket listening on {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            broadcast_tx,
        })
    }

    pub fn broadcast_sender(&self) -> broadcast::Sender<String> {
        self.broadcast_tx.clone()
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn error_line(message: &str) -> String {
    let fallback = serde_json::json!({
        "type": "response",
        "id": null,
        "data": { "error": message },
    });
    fallback.to_string() + "\n"
}

fn encode(response: &Response) -> String {
    match serde_json::to_string(response) {
        Ok(json) => json + "\n",
        Err(e) => error_line(&e.to_string()),
    }
}

pub async fn handle_client<H>(
    stream: UnixStream,
    mut broadcast_rx: broadcast::Receiver<String>,
    handler: Arc<H>,
) where
    H: RequestHandler + Send + Sync + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let response = match serde_json::from_str::<Request>(line.trim()) {
                            Ok(request) => {
                                debug!(?request, "control request");
                                handler.handle(request).await
                            }
                            Err(e) => {
                                warn!("Invalid request: {}", e);
                                Response::error(e)
                            }
                        };
                        if let Err(e) = writer.write_all(encode(&response).as_bytes()).await {
                            error!("Failed to write response: {}", e);
                            break;
                        }
                        line.clear();
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        break;
                    }
                }
            }
            result = broadcast_rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Err(e) = writer.write_all((msg + "\n").as_bytes()).await {
                            error!("Failed to broadcast: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "client lagging behind status broadcasts");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[async_trait::async_trait]
pub trait RequestHandler {
    async fn handle(&self, request: Request) -> Response;
}
