//! Lightning paywall HTTP server.
//!
//! Serves a resource behind HTTP 402: clients without a correlation token receive a
//! Lightning invoice, and once the invoice settles the token unlocks the resource.
//!
//! Endpoints:
//! - `GET /weather` (configurable) – the paywalled resource
//! - `GET /health` – settlement listener state and payment counts
//! - `POST /dev/pay` – simulate payment of an in-memory invoice
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON configuration file
//! - `HOST`, `PORT` control binding address
//! - `LND_REST_URL`, `LN_RPC_HOST`, `NETWORK` shape LND defaults
//! - `OTEL_*` variables enable OpenTelemetry export

use std::process;

use lnpaywall::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
