use std::sync::Arc;

use futures::StreamExt;
use secrecy::SecretString;
use tracing_subscriber::prelude::*;

use telkeep::config::{Config, ConfigHandle};
use telkeep::gateway::TelegramGateway;
use telkeep::pipeline::types::ChannelId;
use telkeep::queue::{QueueManager, WorkerDeps};
use telkeep::store::LibSqlIndex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging: env-filtered stderr plus a daily-rolling file.
    let log_dir = std::env::var("TELKEEP_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "telkeep.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_else(|_| {
        eprintln!("Error: TELEGRAM_BOT_TOKEN not set");
        eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC-DEF...");
        std::process::exit(1);
    });

    let config_path =
        std::env::var("TELKEEP_CONFIG").unwrap_or_else(|_| "./telkeep.json".to_string());
    let db_path =
        std::env::var("TELKEEP_DB_PATH").unwrap_or_else(|_| "./data/telkeep.db".to_string());

    let config = Config::load(std::path::Path::new(&config_path));
    let channels: Vec<ChannelId> = config
        .channels
        .iter()
        .map(|c| ChannelId::new(c.clone()))
        .collect();

    eprintln!("📣 Telkeep v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {config_path}");
    eprintln!("   Index: {db_path}");
    eprintln!(
        "   Channels: {}",
        if channels.is_empty() {
            "none configured".to_string()
        } else {
            config.channels.join(", ")
        }
    );
    eprintln!(
        "   Emoji map: {} entries, cleaner keywords: {}\n",
        config.emoji_map.len(),
        config.cleaner.keywords.len()
    );

    // No index means no safe dedup — fatal at startup only.
    let index = Arc::new(
        LibSqlIndex::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open duplicate index at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    let gateway = Arc::new(TelegramGateway::new(SecretString::from(bot_token)));
    if let Err(e) = gateway.health_check().await {
        tracing::warn!(error = %e, "Telegram health check failed; continuing");
    }

    let manager = QueueManager::new(WorkerDeps {
        gateway: Arc::clone(&gateway) as Arc<dyn telkeep::gateway::Gateway>,
        index,
        config: ConfigHandle::new(config),
    });

    let mut updates = gateway.updates(channels);

    loop {
        tokio::select! {
            maybe_event = updates.next() => {
                match maybe_event {
                    Some(event) => {
                        if let Err(e) = manager.submit(event).await {
                            tracing::warn!(error = %e, "Event dropped");
                        }
                    }
                    None => {
                        tracing::warn!("Event stream ended");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
