//! Feed Courier — binary entrypoint.
//! Loads config, opens the history store, starts the scheduler and the status
//! HTTP surface, and stops on Ctrl-C.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use feed_courier::api::{self, AppState};
use feed_courier::config::Config;
use feed_courier::history::HistoryStore;
use feed_courier::ingest::http::HttpSourceClient;
use feed_courier::logging;
use feed_courier::metrics::Metrics;
use feed_courier::notify::log_sink::LogSink;
use feed_courier::notify::telegram::TelegramSink;
use feed_courier::notify::{DeliveryChannel, DeliveryPolicy, MessageSink};
use feed_courier::pipeline::Pipeline;
use feed_courier::scheduler::{Scheduler, SchedulerConfig};
use feed_courier::status::StatusMonitor;

const ENV_STATUS_ADDR: &str = "COURIER_STATUS_ADDR";
const DEFAULT_STATUS_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    // Invalid config never reaches the scheduler.
    let cfg = Config::load_default().context("loading config")?;
    let _log_guard = logging::init(cfg.settings.log_dir.as_deref())?;
    tracing::info!(sources = cfg.sources.len(), dry_run = cfg.delivery.dry_run, "config loaded");

    let metrics = Metrics::init(cfg.settings.run_interval().as_secs())?;

    let history = Arc::new(
        HistoryStore::open(cfg.settings.history_path())
            .with_context(|| format!("opening history {}", cfg.settings.history_path().display()))?,
    );
    let status = Arc::new(StatusMonitor::load(
        cfg.settings.status_path(),
        cfg.settings.run_interval(),
    ));

    let sink: Arc<dyn MessageSink> = if cfg.delivery.dry_run {
        tracing::warn!("dry run: messages go to the log, not to Telegram");
        Arc::new(LogSink)
    } else {
        Arc::new(TelegramSink::new(&cfg.telegram).with_timeout(cfg.http.request_timeout_secs))
    };
    let channel = DeliveryChannel::new(sink, DeliveryPolicy::from_config(&cfg));
    let client = Arc::new(HttpSourceClient::new(&cfg.http)?);

    let pipeline = Arc::new(Pipeline::from_config(&cfg, client, history, channel));
    let scheduler = Arc::new(Scheduler::new(
        pipeline,
        status,
        SchedulerConfig::from_config(&cfg),
    ));

    let addr: SocketAddr = std::env::var(ENV_STATUS_ADDR)
        .unwrap_or_else(|_| DEFAULT_STATUS_ADDR.to_string())
        .parse()
        .with_context(|| format!("parsing {ENV_STATUS_ADDR}"))?;
    let app = api::router(
        AppState {
            scheduler: scheduler.clone(),
        },
        &metrics,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding status server on {addr}"))?;
    tracing::info!(%addr, "status server listening");

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let sched_task = {
        let mut rx = stop_rx.clone();
        tokio::spawn(scheduler.run(async move {
            let _ = rx.changed().await;
        }))
    };

    let mut rx = stop_rx;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = rx.changed().await;
    });
    let server_task = tokio::spawn(async move { server.await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    let _ = stop_tx.send(true);

    let _ = sched_task.await;
    server_task.await.context("status server task")??;
    Ok(())
}
