//! maildrop - POP3 server entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use maildrop_common::config::{Config, LoggingConfig, StoreBackend, StoreConfig};
use maildrop_core::Pop3Server;
use maildrop_storage::password::hash_password;
use maildrop_storage::{DatabasePool, MaildropStore, MemoryMaildropStore, PgMaildropStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "maildrop")]
#[command(about = "POP3 server for database-backed maildrops")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (defaults to ./maildrop.toml, then /etc/maildrop/maildrop.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding [pop3].bind
    port: Option<u16>,

    /// Idle timeout in seconds, overriding [pop3].timeout_secs
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the Argon2 hash of a password for the maildrops table
    HashPassword {
        /// Plaintext password
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::HashPassword { password }) = args.command {
        println!("{}", hash_password(&password)?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(port) = args.port {
        config.pop3.set_port(port);
    }
    if let Some(timeout) = args.timeout {
        config.pop3.timeout_secs = timeout;
    }

    init_logging(&config.logging);

    info!("Starting maildrop POP3 server...");

    let store = open_store(&config).await?;

    let server = Arc::new(Pop3Server::new(
        config.pop3.clone(),
        config.server.hostname.clone(),
        store,
    ));

    info!("Starting POP3 server on {}", config.pop3.bind);

    let mut runner = tokio::spawn(server.clone().run());

    tokio::select! {
        result = &mut runner => {
            result??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
            // Open sessions are closed out (locks released, marks discarded) before exit
            server.shutdown();
            runner.await??;
        }
    }

    info!("maildrop shutdown complete");

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn MaildropStore>> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            db_pool.health_check().await?;

            Ok(Arc::new(PgMaildropStore::new(db_pool)))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; deletions are lost on exit");
            Ok(Arc::new(seed_memory_store(&config.store).await?))
        }
    }
}

async fn seed_memory_store(config: &StoreConfig) -> Result<MemoryMaildropStore> {
    let store = MemoryMaildropStore::new();
    for mailbox in &config.mailboxes {
        store.add_mailbox(&mailbox.name, &mailbox.password).await;
        for path in &mailbox.messages {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read message {}", path.display()))?;
            store.add_message(&mailbox.name, &content).await?;
        }
        info!(
            mailbox = %mailbox.name,
            messages = mailbox.messages.len(),
            "Loaded mailbox"
        );
    }
    Ok(store)
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .init();
    }
}
