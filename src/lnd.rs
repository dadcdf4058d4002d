//! [`PaymentBackend`] backed by LND's REST gateway.
//!
//! - `POST /v1/invoices` mints invoices.
//! - `GET /v1/invoices/subscribe` streams invoice updates as newline-delimited JSON,
//!   one `{"result": Invoice}` (or `{"error": Status}`) object per line.
//!
//! Every request carries the hex-encoded macaroon in `Grpc-Metadata-macaroon`. The
//! node's self-signed TLS certificate is trusted as an additional root.
//!
//! The backend remembers the highest `settle_index` seen on the feed and passes it to
//! every new subscription, so LND replays settlements that happened while the feed
//! was down.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use futures_util::{Stream, StreamExt, stream};
use lnpaywall_types::backend::{BackendError, InvoiceStream, PaymentBackend};
use lnpaywall_types::invoice::{Invoice, InvoiceEvent, InvoiceRequest, InvoiceState};
use reqwest::{Certificate, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

use crate::config::LndConfig;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest subscription line buffered while waiting for its newline.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[serde_as]
#[derive(Debug, Serialize)]
struct AddInvoiceBody<'a> {
    #[serde_as(as = "DisplayFromStr")]
    value: u64,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

/// Subset of `lnrpc.Invoice` the paywall reads. int64 fields arrive as strings.
#[serde_as]
#[derive(Debug, Deserialize)]
struct LndInvoice {
    #[serde(default)]
    memo: String,
    #[serde(default)]
    r_hash: String,
    #[serde(default)]
    state: Option<InvoiceState>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    amt_paid_msat: Option<u64>,
    /// Position in LND's settlement sequence; `"0"` until the invoice settles.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    settle_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LndStatus {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeLine {
    result: Option<LndInvoice>,
    error: Option<LndStatus>,
}

impl From<LndInvoice> for InvoiceEvent {
    fn from(invoice: LndInvoice) -> Self {
        InvoiceEvent {
            id: payment_hash_hex(&invoice.r_hash),
            state: invoice.state.unwrap_or(InvoiceState::Open),
            memo: invoice.memo,
            amount_paid_msat: invoice.amt_paid_msat,
        }
    }
}

/// LND serializes byte fields as base64; the hex form is what `lncli` shows.
fn payment_hash_hex(r_hash: &str) -> String {
    STANDARD
        .decode(r_hash)
        .or_else(|_| URL_SAFE.decode(r_hash))
        .map(hex::encode)
        .unwrap_or_else(|_| r_hash.to_string())
}

#[derive(Debug, Clone)]
pub struct LndRestBackend {
    client: Client,
    base_url: Url,
    macaroon_hex: Option<String>,
    request_timeout: Option<Duration>,
    /// Highest `settle_index` observed, shared by all clones.
    settle_index: Arc<AtomicU64>,
}

impl LndRestBackend {
    /// Backend talking to `base_url` with system TLS roots and no macaroon.
    pub fn new(base_url: Url) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    fn with_client(client: Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            macaroon_hex: None,
            request_timeout: None,
            settle_index: Arc::default(),
        }
    }

    pub fn with_macaroon_hex(mut self, macaroon_hex: impl Into<String>) -> Self {
        self.macaroon_hex = Some(macaroon_hex.into());
        self
    }

    /// Bounds each invoice creation call. The subscription stream is never timed out.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Reads the TLS certificate and macaroon files named by `config`.
    pub fn from_config(config: &LndConfig) -> Result<Self, BackendError> {
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(tls_cert) = &config.tls_cert {
            let pem = std::fs::read(tls_cert.as_path()).map_err(|e| {
                BackendError::Config(format!(
                    "unable to read TLS certificate {}: {e}",
                    tls_cert.display()
                ))
            })?;
            let certificate = Certificate::from_pem(&pem)
                .map_err(|e| BackendError::Config(format!("invalid TLS certificate: {e}")))?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;
        let mut backend = Self::with_client(client, config.rest_url.inner().clone());
        if let Some(timeout_ms) = config.request_timeout_ms {
            backend = backend.with_request_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(macaroon) = &config.macaroon {
            let bytes = std::fs::read(macaroon.as_path()).map_err(|e| {
                BackendError::Config(format!(
                    "unable to read macaroon {}: {e}",
                    macaroon.display()
                ))
            })?;
            backend = backend.with_macaroon_hex(hex::encode(bytes));
        }
        Ok(backend)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Settlements up to this index have been delivered on the feed.
    pub fn settle_index(&self) -> u64 {
        self.settle_index.load(Ordering::SeqCst)
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Config(e.to_string()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.macaroon_hex {
            Some(macaroon) => request.header(MACAROON_HEADER, macaroon),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl PaymentBackend for LndRestBackend {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, BackendError> {
        let url = self.endpoint("v1/invoices")?;
        let body = AddInvoiceBody {
            value: request.amount_sat,
            memo: &request.memo,
        };
        let mut post = self.client.post(url).json(&body);
        if let Some(timeout) = self.request_timeout {
            post = post.timeout(timeout);
        }
        let response = self.send(post).await?;
        let added: AddInvoiceResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        tracing::debug!(payment_request = %added.payment_request, "LND minted invoice");
        Ok(Invoice {
            id: payment_hash_hex(&added.r_hash),
            payment_request: added.payment_request,
        })
    }

    async fn subscribe_invoices(&self) -> Result<InvoiceStream, BackendError> {
        let mut url = self.endpoint("v1/invoices/subscribe")?;
        let settle_index = self.settle_index();
        if settle_index > 0 {
            url.query_pairs_mut()
                .append_pair("settle_index", &settle_index.to_string());
            tracing::info!(settle_index, "Replaying settlements after last seen index");
        }
        let response = self.send(self.client.get(url)).await?;
        Ok(ndjson_events(
            response.bytes_stream(),
            self.settle_index.clone(),
        ))
    }
}

/// Decodes one line of the subscription body. Blank and undecodable lines yield `None`.
///
/// Raises `settle_index` to the invoice's settle index, if higher.
fn decode_line(line: &[u8], settle_index: &AtomicU64) -> Option<Result<InvoiceEvent, BackendError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice::<SubscribeLine>(line) {
        Ok(SubscribeLine {
            result: Some(invoice),
            ..
        }) => {
            if let Some(index) = invoice.settle_index {
                settle_index.fetch_max(index, Ordering::SeqCst);
            }
            Some(Ok(invoice.into()))
        }
        Ok(SubscribeLine {
            error: Some(status),
            ..
        }) => Some(Err(BackendError::Rejected {
            status: status.code,
            message: status.message,
        })),
        Ok(_) => None,
        Err(error) => {
            tracing::warn!(%error, "Skipping undecodable invoice subscription line");
            None
        }
    }
}

/// Splits a chunked body into lines and decodes each into an invoice event.
///
/// A transport error, or a line longer than [`MAX_LINE_BYTES`], ends the stream
/// after being yielded once.
fn ndjson_events<S, C, E>(body: S, settle_index: Arc<AtomicU64>) -> InvoiceStream
where
    S: Stream<Item = Result<C, E>> + Send + 'static,
    C: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let body = body.boxed();
    stream::unfold(
        (body, Vec::<u8>::new(), false, settle_index),
        |(mut body, mut buffer, mut finished, settle_index)| async move {
            loop {
                if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    if let Some(item) = decode_line(&line, &settle_index) {
                        return Some((item, (body, buffer, finished, settle_index)));
                    }
                    continue;
                }
                if finished {
                    let rest = std::mem::take(&mut buffer);
                    return decode_line(&rest, &settle_index)
                        .map(|item| (item, (body, buffer, finished, settle_index)));
                }
                if buffer.len() > MAX_LINE_BYTES {
                    let item = Err(BackendError::Decode(format!(
                        "subscription line exceeds {MAX_LINE_BYTES} bytes"
                    )));
                    return Some((item, (body, Vec::new(), true, settle_index)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(error)) => {
                        let item = Err(BackendError::Transport(error.to_string()));
                        return Some((item, (body, Vec::new(), true, settle_index)));
                    }
                    None => finished = true,
                }
            }
        },
    )
    .boxed()
}
