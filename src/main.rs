mod config;
mod db;
mod domain;
mod middleware;
mod services;
mod state;
mod web;

use crate::config::Config;
use crate::services::ai::{HeuristicEngine, OpenAiEngine, SuggestionEngine};
use crate::state::{AppState, SharedState};
use axum::http::{header, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Loaded configuration: {:?}", config);

    tracing::info!("Connecting to database...");
    let pool = db::connect(&config.database_url, config.database_max_connections)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    db::migrate(&pool).await.map_err(|e| {
        tracing::error!("Failed to run database migrations: {}", e);
        e
    })?;
    tracing::info!("Database migrations completed");

    if let Some((email, password)) = &config.seed_admin {
        db::seed::seed_admin(&pool, email, password).await?;
    }

    let engine: Arc<dyn SuggestionEngine> = match &config.openai_api_key {
        Some(key) => Arc::new(OpenAiEngine::new(key.clone(), config.openai_model.clone())),
        None => {
            tracing::warn!("OPENAI_API_KEY not set; using rule-based suggestions");
            Arc::new(HeuristicEngine)
        }
    };
    tracing::info!("Suggestion engine: {}", engine.name());

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(&config.public_base_url)?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let shared: SharedState = Arc::new(AppState::new(pool, config, engine));

    let mut scheduler = JobScheduler::new().await?;

    // Follow-up reminders, overdue tasks and queued exports: every minute
    let shared_for_minutely = shared.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let state = shared_for_minutely.clone();
            Box::pin(async move {
                match services::reminders::run_once(&state.pool, chrono::Utc::now()).await {
                    Ok((0, 0)) => {}
                    Ok((follow_ups, tasks)) => tracing::info!(
                        "Reminders sent: {} follow-ups, {} overdue tasks",
                        follow_ups,
                        tasks
                    ),
                    Err(e) => tracing::error!("Reminder run failed: {}", e),
                }
                match services::exporter::run_once(&state.pool, &state.config).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Processed {} export jobs", n),
                    Err(e) => tracing::error!("Export run failed: {}", e),
                }
            })
        })?)
        .await?;

    let shared_for_campaigns = shared.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let state = shared_for_campaigns.clone();
            Box::pin(async move {
                match services::campaign_runner::run_once(&state.pool).await {
                    Ok(summary) => tracing::info!(
                        "Campaign run: {} campaigns, {} executed, {} skipped, {} finished",
                        summary.campaigns,
                        summary.executed,
                        summary.skipped,
                        summary.finished
                    ),
                    Err(e) => tracing::error!("Campaign run failed: {}", e),
                }
            })
        })?)
        .await?;

    // Metrics, limiter housekeeping and expired reset tokens: hourly
    let shared_for_hourly = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_hourly.clone();
            Box::pin(async move {
                match services::metrics::refresh_all(&state.pool).await {
                    Ok(users) => tracing::info!("Dashboard metrics refreshed for {} users", users),
                    Err(e) => tracing::error!("Metrics refresh failed: {}", e),
                }
                let active = state.login_limiter.cleanup().await + state.reset_limiter.cleanup().await;
                tracing::debug!("Rate limiters tracking {} clients", active);
                match db::password_resets::purge_expired(&state.pool, chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Purged {} spent password reset tokens", n),
                    Err(e) => tracing::error!("Failed to purge reset tokens: {}", e),
                }
            })
        })?)
        .await?;

    let shared_for_nightly = shared.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let state = shared_for_nightly.clone();
            Box::pin(async move {
                tracing::info!("Starting nightly rescore...");
                match services::activity::rescore_all(&state.pool).await {
                    Ok(n) => tracing::info!("Rescored {} leads", n),
                    Err(e) => tracing::error!("Nightly rescore failed: {}", e),
                }
                match services::suggestions::sweep_stale(&state.pool).await {
                    Ok(n) => tracing::info!("Suggestion sweep created {} suggestions", n),
                    Err(e) => tracing::error!("Suggestion sweep failed: {}", e),
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Reminders + exports: every minute");
    tracing::info!("  - Campaign runner: every 5 min");
    tracing::info!("  - Metrics + cleanup: hourly");
    tracing::info!("  - Rescore + suggestion sweep: 03:00 UTC");

    let app = web::routes(shared.clone())
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let addr = shared.config.bind_addr.clone();
    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {}", e);
    }
    shared.pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
