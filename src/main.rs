//! News relay binary entrypoint.
//! Loads config, wires the pipeline and delivery sinks, optionally serves the
//! status surface, then runs one cycle per interval until Ctrl-C.

use anyhow::{anyhow, Context};
use metrics::histogram;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_relay::api::{create_router, AppState};
use news_relay::config::load_config_default;
use news_relay::delivery::{DeliveryDriver, DeliverySink, LogSink};
use news_relay::ingest::{PageAdapter, Pipeline};
use news_relay::ingest::scrape::BrowserRenderService;
use news_relay::metrics::Metrics;
use news_relay::notify::{DiscordWebhook, NotifierMux};
use news_relay::relevance::{Lexicon, RelevanceScorer};
use news_relay::resilience::{ErrorHandler, ResilienceContext, Severity};
use news_relay::telemetry::{Telemetry, TelemetryEvent};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("news_relay=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut cfg = load_config_default();
    if let Some(minutes) = env_nonempty("POST_INTERVAL").and_then(|v| v.parse::<u64>().ok()) {
        if minutes > 0 {
            cfg.delivery.interval_minutes = minutes;
        }
    }
    let cfg = Arc::new(cfg);

    let metrics = match Metrics::init(cfg.cache.ttl_secs) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let mut errors = ErrorHandler::new();
    if let Some(url) = env_nonempty("DISCORD_ADMIN_WEBHOOK_URL") {
        let mux = NotifierMux::new().with(Arc::new(DiscordWebhook::new(url)));
        errors = errors.with_notifier(Arc::new(mux));
    }
    let ctx = Arc::new(ResilienceContext::new(errors, &cfg.cache));
    ctx.start_cleanup();

    let telemetry = Arc::new(Telemetry::new());
    telemetry.subscribe(|e: &TelemetryEvent| {
        if let TelemetryEvent::OperationComplete(m) = e {
            histogram!("operation_duration_ms", "operation" => m.operation.clone())
                .record(m.duration.as_secs_f64() * 1_000.0);
        }
    });

    let mut pages = PageAdapter::new(ctx.errors.clone()).with_cache(ctx.source_cache());
    match BrowserRenderService::from_env() {
        Some(svc) => pages = pages.with_fetcher(Arc::new(svc)),
        None => info!("BROWSER_RENDER_URL not set; dynamic sources will fail softly"),
    }
    let pipeline = Arc::new(
        Pipeline::new(&ctx, telemetry.clone())
            .with_pages(pages)
            .with_scorer(RelevanceScorer::new(Lexicon::from_env_or_builtin())),
    );

    let sink: Arc<dyn DeliverySink> = match env_nonempty("DISCORD_WEBHOOK_URL") {
        Some(url) => Arc::new(DiscordWebhook::new(url)),
        None => {
            info!("DISCORD_WEBHOOK_URL not set; delivering to the log");
            Arc::new(LogSink)
        }
    };
    let driver = Arc::new(DeliveryDriver::new(
        sink,
        ctx.errors.clone(),
        telemetry.clone(),
        &cfg.delivery,
    ));

    let state = AppState::new(cfg.clone(), ctx.errors.clone(), telemetry.clone());
    if let Some(addr) = env_nonempty("STATUS_ADDR") {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding status server on {addr}"))?;
        let router = create_router(state.clone(), metrics.as_ref());
        info!(%addr, "status server listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "status server stopped");
            }
        });
    }

    let every = Duration::from_secs(cfg.delivery.interval_minutes * 60);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(
        sources = cfg.enabled_sources().count(),
        interval_minutes = cfg.delivery.interval_minutes,
        "news relay started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (p, d, c, s) = (pipeline.clone(), driver.clone(), cfg.clone(), state.clone());
                let cycle = tokio::spawn(async move {
                    let outcome = p.run_cycle(&c).await;
                    s.record_cycle(&outcome);
                    d.deliver(&outcome.articles).await
                });
                match cycle.await {
                    Ok(Ok(report)) => info!(delivered = report.delivered, skipped = report.skipped_seen, "cycle delivered"),
                    Ok(Err(e)) => warn!(error = %format!("{e:#}"), "cycle delivery aborted"),
                    Err(join) => {
                        let err = anyhow!("cycle task failed: {join}");
                        ctx.errors
                            .handle_error(&err, "cycle", Severity::Critical, serde_json::Value::Null)
                            .await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    ctx.shutdown();
    Ok(())
}
