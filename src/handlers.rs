//! HTTP endpoints of the paywall server.
//!
//! - `GET <paywall.path>` – the protected resource, behind [`PaywallLayer`]
//! - `GET /health` – listener state and payment counts
//! - `POST /dev/pay` – settles an invoice of the in-memory backend (memory mode only)

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lnpaywall_axum::PaywallLayer;
use lnpaywall_types::backend::{BackendError, MemoryBackend, PaymentBackend};
use lnpaywall_types::table::{PaymentTable, TableStats};
use serde::Serialize;
use tokio::sync::watch;
use tracing::instrument;

use crate::listener::ListenerStatus;

/// State shared by the non-paywalled endpoints.
#[derive(Debug, Clone)]
pub struct AppState {
    pub table: PaymentTable,
    pub listener_status: watch::Receiver<ListenerStatus>,
    /// Present only when the in-memory backend is in use.
    pub memory_backend: Option<MemoryBackend>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub listener: ListenerStatus,
    pub payments: TableStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/dev/pay", post(post_dev_pay))
}

/// Serves `content` at `path`, gated by `paywall`.
pub fn protected_routes<B>(path: &str, paywall: PaywallLayer<B>, content: String) -> Router
where
    B: PaymentBackend + 'static,
{
    let handler = move || {
        let content = content.clone();
        async move { content }
    };
    Router::new().route(path, get(handler).layer(paywall))
}

/// `GET /health`: 200 while settlements are being observed, 503 otherwise.
#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let listener = *state.listener_status.borrow();
    let (code, status) = if listener.is_connected() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status,
            listener,
            payments: state.table.stats(),
        }),
    )
}

/// `POST /dev/pay`: pays the invoice whose payable request is the request body.
#[instrument(skip_all)]
pub async fn post_dev_pay(State(state): State<AppState>, body: String) -> Response {
    let Some(backend) = state.memory_backend else {
        return error_response(StatusCode::NOT_FOUND, "Not available with this backend");
    };
    match backend.pay(body.trim()) {
        Ok(event) => {
            tracing::info!(invoice = %event.id, "Simulated payment");
            (StatusCode::OK, Json(event)).into_response()
        }
        Err(BackendError::UnknownInvoice(_)) => {
            error_response(StatusCode::NOT_FOUND, "Unknown invoice")
        }
        Err(error) => {
            tracing::warn!(%error, "Simulated payment failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Unable to pay invoice")
        }
    }
}
