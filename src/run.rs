//! Server startup: configuration, backend, settlement listener and HTTP surface.

use axum::Router;
use axum::http::{HeaderName, Method};
use dotenvy::dotenv;
use lnpaywall_axum::Paywall;
use lnpaywall_types::memo::MemoCodec;
use lnpaywall_types::table::PaymentTable;
use std::net::SocketAddr;
use tower_http::cors;

use crate::backend::ConfiguredBackend;
use crate::config::Config;
use crate::handlers::{self, AppState};
use crate::listener::{Backoff, SettlementListener};
use crate::sweeper::spawn_pending_sweeper;
use crate::util::{SigDown, Telemetry};

/// Runs the paywall server until SIGTERM or SIGINT.
///
/// - Loads `.env` variables.
/// - Initializes logging and, if configured, OpenTelemetry export.
/// - Builds the payment backend and starts the settlement listener.
/// - Serves the protected resource, `/health` and (memory mode) `/dev/pay`.
///
/// Binds to the address given by the `host` and `port` settings (`HOST`, `PORT`).
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let paywall_config = config.paywall();
    let header_name = HeaderName::try_from(paywall_config.header_name.as_str())?;
    let codec = MemoCodec::new(paywall_config.separator.as_str())?;

    let backend = ConfiguredBackend::from_config(config.backend())?;
    let table = PaymentTable::new();

    let sig_down = SigDown::try_new()?;
    let cancellation = sig_down.cancellation_token();

    let listener = SettlementListener::new(backend.clone(), table.clone())
        .with_memo_codec(codec.clone())
        .with_backoff(Backoff::new(
            config.listener().initial_backoff(),
            config.listener().max_backoff(),
        ))
        .spawn(cancellation.clone());
    let sweeper = config
        .pending_ttl()
        .map(|ttl| spawn_pending_sweeper(table.clone(), ttl, cancellation.clone()));

    let paywall = Paywall::new(backend.clone(), table.clone())
        .with_amount_sat(paywall_config.amount_sat)
        .with_description(paywall_config.description.clone())
        .with_memo_codec(codec)
        .with_header_name(header_name.clone());
    let state = AppState {
        table,
        listener_status: listener.status(),
        memory_backend: backend.as_memory().cloned(),
    };

    let http_endpoints = Router::new()
        .merge(handlers::protected_routes(
            &paywall_config.path,
            paywall.layer(),
            paywall_config.content.clone(),
        ))
        .merge(handlers::routes().with_state(state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any)
                .expose_headers([header_name]),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!(path = %paywall_config.path, "Starting server at http://{}", addr);

    let tcp_listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = cancellation.clone();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(tcp_listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    cancellation.cancel();
    listener.join().await;
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            tracing::error!(error = %e, "Pending sweeper task failed");
        }
    }
    sig_down.recv().await;
    tracing::info!("Server stopped");
    Ok(())
}
