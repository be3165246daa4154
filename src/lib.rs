//! Core library for Tender Sniper. Wires the monitoring pipeline
//! together and exposes the HTTP surface: health/readiness probes and
//! the payment webhook. The chat front-end, admin tooling and billing
//! live outside this crate and talk to it through the store and the
//! collaborator traits.

pub mod ai;
mod config;
pub mod dictionaries;
pub mod error;
pub mod matcher;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod portal;
pub mod report;
pub mod search;
pub mod sheets;
pub mod store;
pub mod translit;
pub mod util;

pub use config::AppConfig;
pub use error::{SendOutcome, SniperError};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::ai::expander::QueryExpander;
use crate::ai::relevance::RelevanceChecker;
use crate::ai::{LlmApi, OpenAiClient};
use crate::dictionaries::Dictionaries;
use crate::matcher::SmartMatcher;
use crate::monitor::{MonitorConfig, MonitoringLoop, MonitorStats};
use crate::notify::{Notifier, TelegramApi};
use crate::portal::ZakupkiClient;
use crate::search::InstantSearch;
use crate::sheets::{GoogleSheetsApi, SheetsApi};
use crate::store::Db;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub started_at: DateTime<Utc>,
    pub monitor_stats: Arc<MonitorStats>,
    pub llm_configured: bool,
}

/// Everything `main` needs after bootstrap: HTTP state plus the
/// long-running monitoring loop.
pub struct Service {
    pub state: AppState,
    pub monitor: Arc<MonitoringLoop>,
    pub search: Arc<InstantSearch>,
    pub expander: Arc<QueryExpander>,
}

/// Build the full service from configuration. Fatal on broken
/// configuration (bad dictionary override, unreachable database);
/// missing optional collaborators degrade features instead.
pub async fn build_service(config: &AppConfig) -> anyhow::Result<Service> {
    let dicts = Arc::new(match config.dictionaries_path.as_deref() {
        Some(path) => Dictionaries::from_path(path)?,
        None => Dictionaries::embedded(),
    });

    let db = Db::connect(&config.database_url).await?;

    let llm: Option<Arc<dyn LlmApi>> = match (&config.openai_api_key, config.ai_disabled) {
        (Some(key), false) => Some(Arc::new(OpenAiClient::new(key)?)),
        (None, false) => {
            tracing::warn!("OPENAI_API_KEY not set; AI stages run in fallback mode");
            None
        }
        (_, true) => {
            tracing::info!("AI disabled by configuration");
            None
        }
    };
    let llm_configured = llm.is_some();

    let portal = Arc::new(ZakupkiClient::new(config.proxy_url.as_deref())?);
    let matcher = Arc::new(SmartMatcher::new(Arc::clone(&dicts)));
    let relevance = Arc::new(RelevanceChecker::new(llm.clone()));
    let expander = Arc::new(QueryExpander::new(llm.clone()));
    let search = Arc::new(InstantSearch::new(
        portal,
        matcher,
        relevance,
        Arc::clone(&dicts),
    ));

    let chat = Arc::new(TelegramApi::new(&config.bot_token)?);
    let notifier = Arc::new(Notifier::new(chat));

    let sheets: Option<Arc<dyn SheetsApi>> = match &config.sheets_token {
        Some(token) => Some(Arc::new(GoogleSheetsApi::new(token)?)),
        None => None,
    };

    let monitor = Arc::new(MonitoringLoop::new(
        db.clone(),
        Arc::clone(&search),
        notifier,
        sheets,
        MonitorConfig {
            poll_interval: config.poll_interval,
            worker_pool: config.worker_pool,
            spreadsheet_id: config.spreadsheet_id.clone(),
        },
    ));

    let state = AppState {
        db,
        started_at: Utc::now(),
        monitor_stats: Arc::clone(&monitor.stats),
        llm_configured,
    };

    Ok(Service {
        state,
        monitor,
        search,
        expander,
    })
}

/// Build the Axum router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .route("/payment/webhook", post(payment_webhook_handler))
        .with_state(state)
}

/// `GET /health` — 200 when every component check passes, 503 when
/// degraded. Components: database, llm configuration, monitoring loop.
async fn health_handler(State(state): State<AppState>) -> axum::response::Response {
    let mut checks = serde_json::Map::new();

    let db_ok = state.db.ping().await.is_ok();
    checks.insert(
        "database".into(),
        serde_json::Value::String(if db_ok { "ok".into() } else { "error".into() }),
    );
    checks.insert(
        "llm".into(),
        serde_json::Value::String(if state.llm_configured {
            "ok".into()
        } else {
            "fallback".into()
        }),
    );
    let cycles = state.monitor_stats.cycles.load(Ordering::Relaxed);
    checks.insert(
        "monitoring".into(),
        serde_json::Value::String(if cycles > 0 { "ok".into() } else { "starting".into() }),
    );

    let status = if db_ok { "healthy" } else { "degraded" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": status,
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "checks": checks,
        "stats": {
            "cycles": cycles,
            "filters_processed": state.monitor_stats.filters_processed.load(Ordering::Relaxed),
            "notifications_delivered": state.monitor_stats.notifications_delivered.load(Ordering::Relaxed),
            "errors": state.monitor_stats.errors.load(Ordering::Relaxed),
        },
    });
    (code, Json(body)).into_response()
}

/// `GET /ready` — can the service take traffic.
async fn ready_handler(State(state): State<AppState>) -> axum::response::Response {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ready": true }))).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false })),
        )
            .into_response(),
    }
}

/// `GET /live` — is the process alive at all.
async fn live_handler() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "alive": true }))).into_response()
}

/// `POST /payment/webhook` — the billing collaborator's notification.
/// Validated minimally and persisted to the audit log; subscription
/// handling happens outside the core.
async fn payment_webhook_handler(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, axum::extract::rejection::JsonRejection>,
) -> axum::response::Response {
    let Ok(Json(body)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid JSON" })),
        )
            .into_response();
    };

    let event = body.get("event").and_then(|v| v.as_str());
    let object = body.get("object");
    if event.is_none() || object.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing event or object" })),
        )
            .into_response();
    }

    let user_id = object
        .and_then(|o| o.get("metadata"))
        .and_then(|m| m.get("user_id"))
        .and_then(|v| v.as_str().and_then(|s| s.parse::<i64>().ok()).or(v.as_i64()))
        .unwrap_or(0);

    tracing::info!(event = event.unwrap_or(""), user = user_id, "payment webhook received");
    if let Err(err) = state
        .db
        .log_action(user_id, "payment_webhook", Some(&body))
        .await
    {
        tracing::error!(error = %err, "failed to persist payment webhook");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "storage failure" })),
        )
            .into_response();
    }

    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}
