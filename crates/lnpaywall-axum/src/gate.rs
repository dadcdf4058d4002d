//! The access decision made for every request to a protected resource.
//!
//! [`AccessGate::decide`] maps the one input of a request, an optional correlation
//! token, onto one of three outcomes:
//!
//! | token offered | table state        | decision                    |
//! |---------------|--------------------|-----------------------------|
//! | no            | -                  | [`Decision::Challenge`]     |
//! | yes           | settled            | [`Decision::Grant`]         |
//! | yes           | pending or unknown | [`Decision::NotVerified`]   |
//!
//! The gate only reads the payment table, except for registering the pending entry
//! of a challenge it has just minted. Settlement is recorded elsewhere.

use chrono::Utc;
use lnpaywall_types::backend::{BackendError, PaymentBackend};
use lnpaywall_types::invoice::{InvoiceRequest, PaymentChallenge};
use lnpaywall_types::memo::{MemoCodec, MemoError};
use lnpaywall_types::table::PaymentTable;
use lnpaywall_types::token::CorrelationToken;

pub const DEFAULT_AMOUNT_SAT: u64 = 1;
pub const DEFAULT_DESCRIPTION: &str = "Paid resource";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The token is settled; serve the resource.
    Grant(CorrelationToken),
    /// The token is pending or was never seen.
    NotVerified(CorrelationToken),
    /// No token was offered; a new invoice was minted.
    Challenge(PaymentChallenge),
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Unable to create invoice: {0}")]
    Backend(#[from] BackendError),
    #[error("Unable to encode invoice memo: {0}")]
    Memo(#[from] MemoError),
}

/// Decision function over a payment backend and the shared payment table.
#[derive(Debug, Clone)]
pub struct AccessGate<B> {
    backend: B,
    table: PaymentTable,
    codec: MemoCodec,
    amount_sat: u64,
    description: String,
}

impl<B> AccessGate<B> {
    pub fn new(backend: B, table: PaymentTable) -> Self {
        Self {
            backend,
            table,
            codec: MemoCodec::default(),
            amount_sat: DEFAULT_AMOUNT_SAT,
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    pub fn with_amount_sat(mut self, amount_sat: u64) -> Self {
        self.amount_sat = amount_sat;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_memo_codec(mut self, codec: MemoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn table(&self) -> &PaymentTable {
        &self.table
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn amount_sat(&self) -> u64 {
        self.amount_sat
    }

    /// Read-only check of an offered token.
    pub fn check(&self, token: CorrelationToken) -> Decision {
        if self.table.is_settled(&token) {
            Decision::Grant(token)
        } else {
            Decision::NotVerified(token)
        }
    }
}

impl<B: PaymentBackend> AccessGate<B> {
    pub async fn decide(&self, offered: Option<CorrelationToken>) -> Result<Decision, GateError> {
        match offered {
            Some(token) => Ok(self.check(token)),
            None => self.issue_challenge().await.map(Decision::Challenge),
        }
    }

    /// Mints a new invoice bound to a fresh token.
    ///
    /// The token is registered as pending only after the backend accepted the
    /// invoice, so a failed mint leaves no trace in the table.
    pub async fn issue_challenge(&self) -> Result<PaymentChallenge, GateError> {
        let token = CorrelationToken::generate();
        let description = format!("{} at {}", self.description, Utc::now().to_rfc2822());
        let memo = self.codec.encode(&description, &token)?;
        let request = InvoiceRequest {
            amount_sat: self.amount_sat,
            memo,
        };
        let invoice = self.backend.create_invoice(&request).await?;
        self.table.register_pending(token.clone());
        Ok(PaymentChallenge {
            token,
            amount_sat: request.amount_sat,
            memo: request.memo,
            payment_request: invoice.payment_request,
        })
    }
}
