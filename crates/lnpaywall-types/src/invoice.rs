//! Invoice, settlement-event and challenge types exchanged with the payment backend.

use serde::{Deserialize, Serialize};

use crate::token::CorrelationToken;

/// Lifecycle state of an invoice as reported by the settlement feed.
///
/// Only [`InvoiceState::Settled`] is terminal-and-paid; every other state is ignored
/// by the settlement listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceState {
    Open,
    /// HTLCs are held but the preimage has not been released.
    Accepted,
    Settled,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl InvoiceState {
    pub fn is_settled(&self) -> bool {
        matches!(self, InvoiceState::Settled)
    }
}

/// Parameters for minting a new invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    /// Amount in satoshis, the smallest unit the invoice is denominated in.
    pub amount_sat: u64,
    pub memo: String,
}

/// A minted invoice as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Backend-specific identifier, e.g. the hex payment hash.
    pub id: String,
    /// The payable request string (BOLT 11 for Lightning).
    pub payment_request: String,
}

/// One item of the settlement feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceEvent {
    pub id: String,
    pub state: InvoiceState,
    pub memo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_paid_msat: Option<u64>,
}

/// A payable request for access, minted for one correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentChallenge {
    pub token: CorrelationToken,
    pub amount_sat: u64,
    pub memo: String,
    pub payment_request: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_uses_backend_spelling() {
        let state: InvoiceState = serde_json::from_str("\"SETTLED\"").unwrap();
        assert_eq!(state, InvoiceState::Settled);
        assert!(state.is_settled());
        assert_eq!(
            serde_json::to_string(&InvoiceState::Canceled).unwrap(),
            "\"CANCELED\""
        );
    }

    #[test]
    fn unknown_state_is_tolerated() {
        let state: InvoiceState = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(state, InvoiceState::Unknown);
        assert!(!state.is_settled());
    }
}
