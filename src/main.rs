//! Prodial predictive dialing engine
//!
//! Wires the contact pool, pacing controller, call lifecycle, and dial queue
//! orchestrator into a running process. Call placement goes through a
//! provider stub that logs each dial; provider callbacks are read from stdin
//! as header blocks; terminal calls are appended to a JSONL record file. The
//! placement and record seams are traits, so a real SIP trunk or database
//! integration plugs in without touching the engine.

use async_trait::async_trait;
use prodial_core::config::DialerConfig;
use prodial_core::models::{Call, Contact, DialerMetrics, PredictiveDialerConfig};
use prodial_core::traits::{CallPlacementService, CallRecordSink, PlacementRequest};
use prodial_core::DialerError;
use prodial_engine::{CallLifecycle, ContactPool, DialQueueOrchestrator, PacingController};
use prodial_events::{ProviderEvent, ProviderEventHandler};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Placement stub that logs each dial and echoes a provider id
///
/// Stands in for the SIP trunk integration. The provider callbacks that
/// would normally drive the lifecycle arrive through `prodial-events`.
struct LoggingPlacement;

#[async_trait]
impl CallPlacementService for LoggingPlacement {
    async fn place_call(&self, request: &PlacementRequest) -> Result<String, DialerError> {
        info!(
            "Placing call {} to {} for campaign {} (caller id {})",
            request.call_id, request.phone_number, request.campaign_id, request.caller_id
        );
        Ok(format!("prov-{}", request.call_id))
    }
}

/// Record sink that appends terminal calls to a JSONL file
struct JsonlRecordSink {
    path: PathBuf,
}

#[async_trait]
impl CallRecordSink for JsonlRecordSink {
    async fn record_call(&self, call: &Call) -> Result<(), DialerError> {
        let mut line = serde_json::to_string(call)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Contact seed file entry (JSON array of these)
#[derive(serde::Deserialize)]
struct SeedContact {
    id: i64,
    list_id: i64,
    phone_number: String,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "prodial={},prodial_engine={},prodial_events={},prodial_core={}",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

async fn load_seed_contacts(pool: &ContactPool, campaign_id: i64, path: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let seeds: Vec<SeedContact> = serde_json::from_str(&raw)?;

    let mut contacts = Vec::with_capacity(seeds.len());
    for seed in seeds {
        pool.attach_list(campaign_id, seed.list_id);
        contacts.push(Contact::new(
            seed.id,
            seed.list_id,
            seed.phone_number,
            seed.max_attempts,
        ));
    }
    let loaded = pool.load_contacts(contacts);
    info!("Seeded {} contacts from {}", loaded, path);
    Ok(())
}

/// Feed provider events from stdin into the lifecycle
///
/// Events arrive as header blocks separated by blank lines, the same format
/// a webhook receiver would hand over. Lets an operator (or a test harness
/// piping a fixture file) drive call progress without a provider connection.
async fn run_event_intake(handler: ProviderEventHandler) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut block = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            if !block.is_empty() {
                let event = ProviderEvent::parse(&block);
                handler.handle(&event).await;
                block.clear();
            }
            continue;
        }
        block.push_str(&line);
        block.push('\n');
    }

    if !block.is_empty() {
        let event = ProviderEvent::parse(&block);
        handler.handle(&event).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting prodial engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from environment and config files
    let config = DialerConfig::load()?;
    info!(
        "Engine config: tick {}s, lock TTL {}s, caller id {}",
        config.engine.tick_interval_secs, config.engine.lock_ttl_secs, config.engine.caller_id
    );

    let campaign_id: i64 = env::var("PRODIAL_CAMPAIGN_ID")
        .unwrap_or_else(|_| "1".to_string())
        .parse()
        .unwrap_or(1);
    let max_concurrent: u32 = env::var("PRODIAL_MAX_CONCURRENT")
        .unwrap_or_else(|_| "20".to_string())
        .parse()
        .unwrap_or(20);
    let available_agents: u32 = env::var("PRODIAL_AVAILABLE_AGENTS")
        .unwrap_or_else(|_| "0".to_string())
        .parse()
        .unwrap_or(0);
    let record_path =
        env::var("PRODIAL_RECORD_FILE").unwrap_or_else(|_| "call_records.jsonl".to_string());

    // Wire the services
    let pool = Arc::new(ContactPool::new(config.retry.clone()));
    let pacing = Arc::new(PacingController::new(config.pacing.clone()));
    let sink = Arc::new(JsonlRecordSink {
        path: PathBuf::from(&record_path),
    });
    let lifecycle = Arc::new(CallLifecycle::new(
        Arc::clone(&pool),
        Arc::clone(&pacing),
        sink as Arc<dyn CallRecordSink>,
    ));
    let orchestrator = Arc::new(DialQueueOrchestrator::new(
        Arc::clone(&pool),
        Arc::clone(&pacing),
        Arc::clone(&lifecycle),
        Arc::new(LoggingPlacement) as Arc<dyn CallPlacementService>,
        config.engine.clone(),
    ));

    // Seed the pool if a contacts file is configured
    match env::var("PRODIAL_CONTACTS_FILE") {
        Ok(path) => load_seed_contacts(&pool, campaign_id, &path).await?,
        Err(_) => warn!("PRODIAL_CONTACTS_FILE not set, starting with an empty pool"),
    }

    // Provider callbacks come in on stdin as header blocks
    let handler = ProviderEventHandler::new(Arc::clone(&lifecycle));
    let intake = tokio::spawn(run_event_intake(handler));

    // Start the campaign dial loop
    Arc::clone(&orchestrator)
        .start_campaign(PredictiveDialerConfig::autodial(campaign_id, max_concurrent))
        .await?;

    // Until an agent-presence feed is wired in, agent availability comes
    // from the environment as a static gauge
    if available_agents > 0 {
        pacing.update_metrics(
            campaign_id,
            &DialerMetrics {
                available_agents,
                ..Default::default()
            },
        )?;
        info!("Campaign {} seeded with {} available agents", campaign_id, available_agents);
    } else {
        warn!(
            "PRODIAL_AVAILABLE_AGENTS is 0, campaign {} will not dial until metrics arrive",
            campaign_id
        );
    }

    info!(
        "Campaign {} running (max concurrent {}), press Ctrl-C to stop",
        campaign_id, max_concurrent
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping dial loops");
    intake.abort();
    orchestrator.shutdown().await;

    let stats = lifecycle.statistics();
    info!(
        "Final call statistics: {} total, {} completed, {} failed, {} abandoned",
        stats.total, stats.completed, stats.failed, stats.abandoned
    );

    Ok(())
}
