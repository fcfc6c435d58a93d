use crate::dispatcher::ScrapeReport;
use crate::exporter::Exporter;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    exporter: Arc<Exporter>,
    agent_id: Arc<str>,
    last_scrape: Arc<RwLock<Option<ScrapeSummary>>>,
}

impl AppState {
    pub fn new(exporter: Exporter, agent_id: impl Into<Arc<str>>) -> Self {
        Self {
            exporter: Arc::new(exporter),
            agent_id: agent_id.into(),
            last_scrape: Arc::new(RwLock::new(None)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub finished_at: DateTime<Utc>,
    pub collectors: Vec<CollectorSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectorSummary {
    pub name: String,
    pub success: bool,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeSummary {
    fn from_report(report: &ScrapeReport) -> Self {
        Self {
            finished_at: Utc::now(),
            collectors: report
                .outcomes
                .iter()
                .map(|o| CollectorSummary {
                    name: o.name.to_string(),
                    success: o.is_success(),
                    duration_seconds: o.duration.as_secs_f64(),
                    error: o.result.as_ref().err().map(|e| e.to_string()),
                })
                .collect(),
        }
    }

    fn is_success(&self) -> bool {
        self.collectors.iter().all(|c| c.success)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent_id: String,
    pub enabled_collectors: Vec<&'static str>,
    pub last_scrape: Option<ScrapeSummary>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down gracefully");
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.exporter.scrape().await {
        Ok((body, report)) => {
            *state.last_scrape.write().await = Some(ScrapeSummary::from_report(&report));
            ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to render scrape");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let last_scrape = state.last_scrape.read().await.clone();
    let status = match &last_scrape {
        None => "unknown",
        Some(summary) if summary.is_success() => "ok",
        Some(_) => "degraded",
    };

    Json(HealthResponse {
        status,
        agent_id: state.agent_id.to_string(),
        enabled_collectors: state.exporter.dispatcher().names(),
        last_scrape,
    })
}
