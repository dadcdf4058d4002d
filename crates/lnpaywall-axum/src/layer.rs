//! Axum middleware gating routes behind Lightning invoices.
//!
//! Requests without a correlation token receive `402 Payment Required` with a
//! freshly minted invoice. Once the invoice is reported settled (by a settlement
//! listener writing to the same [`PaymentTable`]), requests carrying the token are
//! passed through to the wrapped handler.
//!
//! ## Example Usage
//!
//! ```rust
//! use axum::{Router, routing::get};
//! use lnpaywall_axum::Paywall;
//! use lnpaywall_types::backend::MemoryBackend;
//! use lnpaywall_types::table::PaymentTable;
//!
//! let table = PaymentTable::new();
//! let paywall = Paywall::new(MemoryBackend::new(), table.clone())
//!     .with_amount_sat(1)
//!     .with_description("Weather report");
//!
//! let app: Router = Router::new().route(
//!     "/weather",
//!     get(weather).layer(paywall.layer()),
//! );
//!
//! async fn weather() -> &'static str {
//!     "Weather report: 15 degrees Celsius, cloudy and with a chance of Lightning."
//! }
//! ```

use axum_core::extract::Request;
use axum_core::response::Response;
use http::HeaderName;
use lnpaywall_types::backend::PaymentBackend;
use lnpaywall_types::memo::{MemoCodec, MemoError};
use lnpaywall_types::table::PaymentTable;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use crate::gate::AccessGate;
use crate::paygate::{DEFAULT_TOKEN_HEADER, Paygate};

/// Builder for the paywall layer.
///
/// Create one per protected resource; clones share the gate and its table.
#[derive(Debug)]
pub struct Paywall<B> {
    gate: AccessGate<B>,
    header_name: HeaderName,
}

impl<B> Paywall<B> {
    pub fn new(backend: B, table: PaymentTable) -> Self {
        Self {
            gate: AccessGate::new(backend, table),
            header_name: HeaderName::from_static(DEFAULT_TOKEN_HEADER),
        }
    }

    /// Sets the invoice amount in satoshis (default: 1).
    pub fn with_amount_sat(mut self, amount_sat: u64) -> Self {
        self.gate = self.gate.with_amount_sat(amount_sat);
        self
    }

    /// Sets the human-readable part of the invoice memo.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.gate = self.gate.with_description(description);
        self
    }

    /// Uses `separator` between memo description and token (default: `||`).
    pub fn with_separator(self, separator: &str) -> Result<Self, MemoError> {
        let codec = MemoCodec::new(separator)?;
        Ok(self.with_memo_codec(codec))
    }

    pub fn with_memo_codec(mut self, codec: MemoCodec) -> Self {
        self.gate = self.gate.with_memo_codec(codec);
        self
    }

    /// Sets the header used to receive and return the correlation token.
    pub fn with_header_name(mut self, header_name: HeaderName) -> Self {
        self.header_name = header_name;
        self
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    pub fn gate(&self) -> &AccessGate<B> {
        &self.gate
    }

    /// Freezes the configuration into a cloneable [`PaywallLayer`].
    pub fn layer(self) -> PaywallLayer<B> {
        PaywallLayer {
            paygate: Paygate {
                gate: Arc::new(self.gate),
                header_name: self.header_name,
            },
        }
    }
}

/// Tower layer produced by [`Paywall::layer`].
#[derive(Debug)]
pub struct PaywallLayer<B> {
    paygate: Paygate<B>,
}

impl<B> Clone for PaywallLayer<B> {
    fn clone(&self) -> Self {
        Self {
            paygate: self.paygate.clone(),
        }
    }
}

impl<S, B> Layer<S> for PaywallLayer<B>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaywallService<B>;

    fn layer(&self, inner: S) -> Self::Service {
        PaywallService {
            paygate: self.paygate.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service enforcing payment before calling the wrapped handler.
pub struct PaywallService<B> {
    paygate: Paygate<B>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<B> Clone for PaywallService<B> {
    fn clone(&self) -> Self {
        Self {
            paygate: self.paygate.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<B> Service<Request> for PaywallService<B>
where
    B: PaymentBackend + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        Box::pin(self.paygate.clone().handle_request(self.inner.clone(), req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::routing::get;
    use http::StatusCode;
    use lnpaywall_types::table::Settlement;
    use lnpaywall_types::token::CorrelationToken;
    use tower::ServiceExt;

    const CONTENT: &str = "Weather report: 15 degrees Celsius, cloudy and with a chance of Lightning.";

    fn app(backend: lnpaywall_types::backend::MemoryBackend, table: PaymentTable) -> Router {
        let paywall = Paywall::new(backend, table).with_description("Weather report");
        Router::new().route("/weather", get(|| async { CONTENT }).layer(paywall.layer()))
    }

    fn request(token: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/weather");
        if let Some(token) = token {
            builder = builder.header("X-Correlation-Token", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn tokenless_request_gets_402_with_token_and_invoice() {
        let backend = lnpaywall_types::backend::MemoryBackend::new();
        let table = PaymentTable::new();
        let response = app(backend.clone(), table.clone())
            .oneshot(request(None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let token: CorrelationToken = response
            .headers()
            .get("x-correlation-token")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_string(response).await;
        assert!(body.starts_with("lnmem"));
        assert!(table.get(&token).is_some());
        assert_eq!(backend.invoice_count(), 1);
    }

    #[tokio::test]
    async fn settled_token_reaches_handler() {
        let table = PaymentTable::new();
        table.set_settled("abc123".parse().unwrap(), Settlement::now(Some(1000)));
        let response = app(Default::default(), table)
            .oneshot(request(Some("abc123")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, CONTENT);
    }

    #[tokio::test]
    async fn unknown_token_gets_400() {
        let response = app(Default::default(), PaymentTable::new())
            .oneshot(request(Some("unknown-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Error: Invoice has not been paid");
    }

    #[tokio::test]
    async fn malformed_token_gets_400() {
        let long = "x".repeat(500);
        let response = app(Default::default(), PaymentTable::new())
            .oneshot(request(Some(&long)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Error: Invalid correlation token");
    }

    #[tokio::test]
    async fn backend_failure_gets_500_without_details() {
        let backend = lnpaywall_types::backend::MemoryBackend::new();
        backend.set_available(false);
        let table = PaymentTable::new();
        let response = app(backend, table.clone())
            .oneshot(request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Error: Unable to create invoice");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn custom_header_name() {
        let paywall = Paywall::new(lnpaywall_types::backend::MemoryBackend::new(), PaymentTable::new())
            .with_header_name(HeaderName::from_static("x-purchase-token"))
            .with_separator("//")
            .unwrap();
        let app = Router::new().route("/rain", get(|| async { "rain" }).layer(paywall.layer()));
        let response = app
            .oneshot(http::Request::builder().uri("/rain").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert!(response.headers().contains_key("x-purchase-token"));
    }
}
