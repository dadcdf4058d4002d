//! HTTP side of the access gate.
//!
//! [`Paygate`] reads the correlation token header, asks the [`AccessGate`] for a
//! decision and turns it into a response:
//!
//! - no token (or a blank header) → `402 Payment Required`, the new token in the
//!   token header and the payable request as `text/plain` body
//! - settled token → the wrapped service's response
//! - pending or unknown token → `400 Bad Request`
//! - unparsable token → `400 Bad Request`
//! - invoice could not be minted → `500 Internal Server Error`
//!
//! Error bodies are fixed messages and never carry backend details.

use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderName, StatusCode, header};
use lnpaywall_types::backend::PaymentBackend;
use lnpaywall_types::invoice::PaymentChallenge;
use lnpaywall_types::token::{CorrelationToken, TokenError};
use std::convert::Infallible;
use std::sync::Arc;
use tower::{Service, ServiceExt};

use crate::gate::{AccessGate, Decision, GateError};

/// Default name of the header carrying the correlation token in both directions.
pub const DEFAULT_TOKEN_HEADER: &str = "x-correlation-token";

#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    #[error("Invalid correlation token")]
    InvalidToken(#[from] TokenError),
    #[error("Invoice has not been paid")]
    NotPaid,
    #[error("Unable to create invoice")]
    Gate(#[from] GateError),
}

impl PaygateError {
    pub fn status(&self) -> StatusCode {
        match self {
            PaygateError::InvalidToken(_) | PaygateError::NotPaid => StatusCode::BAD_REQUEST,
            PaygateError::Gate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PaygateError {
    fn into_response(self) -> Response {
        (self.status(), format!("Error: {self}")).into_response()
    }
}

/// Per-request handle pairing the gate with the header it reads and writes.
#[derive(Debug)]
pub struct Paygate<B> {
    pub gate: Arc<AccessGate<B>>,
    pub header_name: HeaderName,
}

impl<B> Clone for Paygate<B> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            header_name: self.header_name.clone(),
        }
    }
}

impl<B> Paygate<B> {
    /// Extracts the offered token. A missing or blank header means no token.
    pub fn offered_token(&self, headers: &HeaderMap) -> Result<Option<CorrelationToken>, TokenError> {
        let Some(value) = headers.get(&self.header_name) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| TokenError::InvalidCharacter)?;
        if value.trim().is_empty() {
            return Ok(None);
        }
        value.parse().map(Some)
    }

    fn payment_required(&self, challenge: PaymentChallenge) -> Response {
        (
            StatusCode::PAYMENT_REQUIRED,
            [
                (self.header_name.clone(), challenge.token.into_inner()),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            challenge.payment_request,
        )
            .into_response()
    }
}

impl<B: PaymentBackend> Paygate<B> {
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "paywall.handle_request", skip_all)
    )]
    pub async fn handle_request<S>(self, inner: S, req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
    {
        match self.handle_request_fallible(inner, req).await {
            Ok(response) => Ok(response),
            Err(err) => {
                #[cfg(feature = "telemetry")]
                match &err {
                    PaygateError::Gate(cause) => {
                        tracing::error!(error = %cause, "Failed to issue payment challenge");
                    }
                    other => {
                        tracing::debug!(error = %other, "Access denied");
                    }
                }
                Ok(err.into_response())
            }
        }
    }

    async fn handle_request_fallible<S>(
        &self,
        inner: S,
        req: Request,
    ) -> Result<Response, PaygateError>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
    {
        let offered = self.offered_token(req.headers())?;
        match self.gate.decide(offered).await? {
            Decision::Grant(_token) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(token = %_token, "Access granted");
                let response = match inner.oneshot(req).await {
                    Ok(response) => response,
                    Err(infallible) => match infallible {},
                };
                Ok(response)
            }
            Decision::NotVerified(_) => Err(PaygateError::NotPaid),
            Decision::Challenge(challenge) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(token = %challenge.token, amount_sat = challenge.amount_sat, "Issued payment challenge");
                Ok(self.payment_required(challenge))
            }
        }
    }
}
