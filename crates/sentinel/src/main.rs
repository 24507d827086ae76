use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use market_sentinel::capability::{builtin_registry, CapabilityDeps};
use market_sentinel::channel::{
    ConversationChannel, InboundMessage, LogNotifier, Notifier, TelegramChannel,
};
use market_sentinel::config::{self, SentinelConfig};
use market_sentinel::constants::INBOUND_CHANNEL_CAPACITY;
use market_sentinel::core::{
    DecisionCore, HealthStats, HeartbeatScheduler, RequestRouter, TriggerDetector,
};
use market_sentinel::execution::{Exchange, PaperExchange, TradeGuard};
use market_sentinel::logging;
use market_sentinel::market::build_gateway;
use market_sentinel::oracle::{HttpOracle, PolicyOracle};
use market_sentinel::store::{SqliteStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = config::config_dir();
    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    info!(
        instruments = config.instruments.instruments.len(),
        providers = config.providers.providers.len(),
        triggers = config.signals.triggers.len(),
        dry_run = config.execution.dry_run,
        "market sentinel starting"
    );

    // -----------------------------------------------------------------------
    // Component construction (dependency injection order)
    // -----------------------------------------------------------------------

    // 1. Audit store (creates the SQLite file and runs migrations)
    if let Some(parent) = Path::new(&config.app.store.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create store directory")?;
        }
    }
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::new(&config.app.store.path)
            .await
            .context("failed to initialize audit store")?,
    );

    // 2. Market data gateway and trigger detector
    let gateway = Arc::new(build_gateway(&config.providers)?);
    let detector = Arc::new(TriggerDetector::new(config.signals.triggers.clone()));

    // 3. Paper exchange and trade guard
    let exchange: Arc<dyn Exchange> = Arc::new(PaperExchange::new(&config.execution.paper));
    let guard = Arc::new(TradeGuard::from_config(&config.execution.guard));

    // 4. Outbound channel (Telegram when configured, log-only otherwise)
    let telegram = init_telegram(&config)?;
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(t) => t.clone(),
        None => Arc::new(LogNotifier),
    };
    let conversations: Arc<dyn ConversationChannel> = match &telegram {
        Some(t) => t.clone(),
        None => Arc::new(LogNotifier),
    };

    // 5. Capability registry
    let health = Arc::new(HealthStats::new());
    let deps = CapabilityDeps {
        gateway: gateway.clone(),
        instruments: Arc::new(config.instruments.instruments.clone()),
        signals: Arc::new(config.signals.clone()),
        scheduler: Arc::new(config.scheduler.clone()),
        exchange,
        guard,
        health: health.clone(),
        store: store.clone(),
        notifier,
    };
    let registry = Arc::new(builtin_registry(deps, config.execution.retry_attempts)?);
    info!(capabilities = registry.len(), "capability registry built");

    // 6. Policy oracle
    let api_key = config
        .oracle
        .api_key_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty());
    let oracle: Arc<dyn PolicyOracle> = Arc::new(HttpOracle::new(&config.oracle, api_key)?);

    // 7. Decision core
    let decision = Arc::new(DecisionCore::new(
        registry,
        oracle,
        store.clone(),
        health.clone(),
        Duration::from_secs(config.oracle.timeout_seconds),
        Duration::from_secs(config.execution.capability_timeout_seconds),
    ));

    // 8. Heartbeat scheduler and request router
    let scheduler = Arc::new(HeartbeatScheduler::new(
        config.instruments.instruments.clone(),
        gateway,
        detector,
        decision.clone(),
        store,
        health.clone(),
        Arc::new(config.signals.clone()),
        config.scheduler.clone(),
    ));
    let router = Arc::new(RequestRouter::new(decision, conversations, health));

    info!("all components initialized");

    // -----------------------------------------------------------------------
    // Launch concurrent tasks
    // -----------------------------------------------------------------------

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_CHANNEL_CAPACITY);
    let shutdown = CancellationToken::new();

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));
    let router_handle = tokio::spawn(router.run(inbound_rx, shutdown.clone()));

    let poller_handle = match telegram {
        Some(t) => Some(tokio::spawn(t.run_poller(inbound_tx, shutdown.clone()))),
        None => {
            info!("no conversational channel configured, inbound messages disabled");
            drop(inbound_tx);
            None
        }
    };

    info!("all tasks running, press Ctrl+C to shutdown");

    // -----------------------------------------------------------------------
    // Wait for shutdown signal
    // -----------------------------------------------------------------------

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping gracefully...");
    shutdown.cancel();

    let (scheduler_res, router_res) = tokio::join!(scheduler_handle, router_handle);
    if let Err(e) = scheduler_res {
        error!(error = %e, "heartbeat scheduler task panicked");
    }
    if let Err(e) = router_res {
        error!(error = %e, "request router task panicked");
    }
    if let Some(handle) = poller_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "telegram poller task panicked");
        }
    }

    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Initialization helpers
// ---------------------------------------------------------------------------

/// Build the Telegram channel when `channel.json` is present.
///
/// Validation already checked that the token env var is set.
fn init_telegram(config: &SentinelConfig) -> Result<Option<Arc<TelegramChannel>>> {
    let Some(channel) = &config.channel else {
        info!("channel.json absent, notifications go to the log");
        return Ok(None);
    };
    let telegram = &channel.telegram;
    let token = std::env::var(&telegram.bot_token_env)
        .with_context(|| format!("{} is not set", telegram.bot_token_env))?;
    let client = TelegramChannel::new(telegram, &token)?;
    info!(notify_chat_id = telegram.notify_chat_id, "telegram channel initialized");
    Ok(Some(Arc::new(client)))
}
