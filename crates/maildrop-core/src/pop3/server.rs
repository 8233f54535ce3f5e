//! POP3 Server
//!
//! Accepts TCP connections and drives one [`Pop3Interpreter`] per
//! connection.

use super::interpreter::Pop3Interpreter;
use super::response::Pop3Response;

use anyhow::Result;
use maildrop_common::config::Pop3Config;
use maildrop_storage::MaildropStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// POP3 Server
pub struct Pop3Server {
    config: Pop3Config,
    hostname: String,
    store: Arc<dyn MaildropStore>,
    connection_semaphore: Arc<Semaphore>,
    max_connections: u32,
    next_connection_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Pop3Server {
    /// Create a new POP3 server
    pub fn new(config: Pop3Config, hostname: impl Into<String>, store: Arc<dyn MaildropStore>) -> Self {
        let max_connections = u32::try_from(config.max_connections.max(1)).unwrap_or(u32::MAX);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            hostname: hostname.into(),
            store,
            connection_semaphore: Arc::new(Semaphore::new(max_connections as usize)),
            max_connections,
            next_connection_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Bind the configured address and serve until [`Pop3Server::shutdown`]
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener).await
    }

    /// Stop accepting connections and close every open session the same
    /// way an idle timeout does. `serve` returns once all sessions are gone.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "POP3 server listening on {} (timeout {}s, max {} connections)",
            listener.local_addr()?,
            self.config.timeout_secs,
            self.config.max_connections
        );

        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_requested(&mut shutdown) => break,
            };

            match accepted {
                Ok((stream, addr)) => {
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("POP3: Max connections reached, rejecting {}", addr);
                            continue;
                        }
                    };

                    let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let server = self.clone();

                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr, connection_id).await {
                            error!("POP3 connection error from {}: {}", addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("POP3 accept error: {}", e);
                }
            }
        }

        drop(listener);
        info!(
            "POP3 server stopping, waiting for {} open sessions",
            self.max_connections as usize - self.connection_semaphore.available_permits()
        );
        // Every connection task holds one permit until its session is closed out
        let _drained = self.connection_semaphore.acquire_many(self.max_connections).await?;
        info!("POP3 server stopped");
        Ok(())
    }

    /// Handle a single POP3 connection
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        connection_id: u64,
    ) -> Result<()> {
        info!(connection = connection_id, "New POP3 connection from {}", addr);

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut interpreter = Pop3Interpreter::new(self.store.clone());
        let mut shutdown = self.shutdown.subscribe();
        let idle = Duration::from_secs(self.config.timeout_secs);

        writer
            .write_all(Pop3Response::greeting(&self.hostname).as_bytes())
            .await?;
        writer.flush().await?;

        let mut buf = Vec::new();

        loop {
            buf.clear();

            let read = tokio::select! {
                read = tokio::time::timeout(idle, reader.read_until(b'\n', &mut buf)) => read,
                _ = shutdown_requested(&mut shutdown) => {
                    info!(connection = connection_id, "POP3 server shutting down, closing {}", addr);
                    interpreter.timeout().await;
                    break;
                }
            };

            match read {
                Ok(Ok(0)) => {
                    info!(connection = connection_id, "POP3 connection closed by client {}", addr);
                    interpreter.timeout().await;
                    break;
                }
                Ok(Ok(_)) => {
                    // Invalid UTF-8 is replaced, not fatal; the command then fails validation.
                    let line = String::from_utf8_lossy(trim_line_ending(&buf));
                    debug!(connection = connection_id, "POP3 received from {}: {}", addr, line);

                    let response = interpreter.handle_input(&line).await;
                    if let Err(e) = write_response(&mut writer, &response).await {
                        interpreter.timeout().await;
                        return Err(e.into());
                    }

                    if interpreter.is_ended() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    error!(connection = connection_id, "POP3 read error from {}: {}", addr, e);
                    interpreter.timeout().await;
                    break;
                }
                Err(_) => {
                    warn!(connection = connection_id, "POP3 connection timeout for {}", addr);
                    interpreter.timeout().await;
                    break;
                }
            }
        }

        info!(connection = connection_id, "POP3 connection closed for {}", addr);
        Ok(())
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    &line[..end]
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &str) -> std::io::Result<()> {
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}
