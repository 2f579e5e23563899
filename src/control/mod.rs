//! Control transport: newline-delimited JSON over a Unix socket or
//! TCP listener. Each session gets a greeting line, then exchanges one
//! JSON request per line for one JSON response per line. Session buffers
//! are capped so a misbehaving client can't grow the daemon's memory
//! without bound.

pub mod commands;
pub mod compact;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::bot::BotHandle;
use crate::limits;

#[derive(Clone, Debug)]
pub enum Bind {
    Unix(PathBuf),
    Tcp(String, u16),
}

#[derive(Serialize)]
struct Greeting {
    program: &'static str,
    major: u32,
    minor: u32,
    patch: u32,
}

fn greeting_line() -> String {
    let g = Greeting {
        program: "frippy",
        major: 0,
        minor: 6,
        patch: 0,
    };
    format!("{}\n", serde_json::to_string(&g).unwrap())
}

#[derive(Deserialize)]
struct Request {
    command: String,
    #[serde(flatten)]
    rest: Value,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: u32,
    #[serde(rename = "errorCategory")]
    error_category: String,
    message: String,
}

/// Runs the control listener until `shutdown` resolves, spawning one task
/// per accepted connection (still cooperatively scheduled: the listener
/// and every session are futures on the same single-threaded runtime).
pub async fn serve(bind: Bind, bot: BotHandle, mut shutdown: mpsc::Receiver<()>) -> std::io::Result<()> {
    match bind {
        Bind::Unix(path) => {
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    accepted = listener.accept() => {
                        let (stream, _) = accepted?;
                        let bot = bot.clone();
                        tokio::task::spawn_local(async move {
                            handle_session(stream, bot).await;
                        });
                    }
                }
            }
        }
        Bind::Tcp(host, port) => {
            let listener = TcpListener::bind((host.as_str(), port)).await?;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    accepted = listener.accept() => {
                        let (stream, _) = accepted?;
                        let bot = bot.clone();
                        tokio::task::spawn_local(async move {
                            handle_session(stream, bot).await;
                        });
                    }
                }
            }
        }
    }
}

trait Session: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin {}
impl Session for UnixStream {}
impl Session for TcpStream {}

async fn handle_session<S: Session>(stream: S, bot: BotHandle) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::with_capacity(limits::CONTROL_SESSION_BUF_CAP, reader);

    if writer.write_all(greeting_line().as_bytes()).await.is_err() {
        return;
    }

    let mut line = String::new();
    let mut out_queued: usize = 0;
    loop {
        line.clear();
        let n = match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        if n > limits::CONTROL_SESSION_BUF_CAP {
            let _ = writer.write_all(b"{\"error\":1,\"errorCategory\":\"bot\",\"message\":\"request too large\"}\n").await;
            return;
        }

        let trimmed = line.trim_end();
        let response = if trimmed.trim_start().starts_with('{') {
            match serde_json::from_str::<Request>(trimmed) {
                Ok(req) => commands::dispatch(&bot, &req.command, req.rest).await,
                Err(_) => serde_json::to_string(&ErrorResponse {
                    error: crate::error::BotError::IncompleteMessage.code(),
                    error_category: "bot".to_string(),
                    message: "malformed request".to_string(),
                })
                .unwrap(),
            }
        } else {
            compact::handle_line(&bot, trimmed).await
        };

        out_queued += response.len();
        if out_queued > limits::CONTROL_SESSION_QUEUE_CAP {
            return;
        }
        if writer.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        if writer.write_all(b"\n").await.is_err() {
            return;
        }
        out_queued = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    /// Binds a real Unix socket under a tempdir and round-trips one
    /// greeting plus one JSON request, exercising `serve`/`handle_session`
    /// rather than calling `commands::dispatch` directly.
    #[tokio::test]
    async fn unix_socket_round_trips_a_command() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("frippy.sock");
                let bot = Bot::new();
                let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

                let server = tokio::task::spawn_local(serve(Bind::Unix(path.clone()), bot, shutdown_rx));

                let mut stream = loop {
                    match UnixStream::connect(&path).await {
                        Ok(s) => break s,
                        Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
                    }
                };

                let (read_half, mut write_half) = stream.split();
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                assert!(line.contains("\"program\":\"frippy\""), "{line}");

                write_half.write_all(b"{\"command\":\"server-list\"}\n").await.unwrap();
                line.clear();
                reader.read_line(&mut line).await.unwrap();
                assert!(line.contains("\"list\":[]"), "{line}");

                drop(shutdown_tx);
                let _ = server.await;
            })
            .await;
    }
}
