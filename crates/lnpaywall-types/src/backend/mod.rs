//! The payment-network collaborator: minting invoices and streaming their settlement.
//!
//! [`PaymentBackend`] is the only seam between the paywall and the payment network.
//! The server ships an LND REST implementation; [`memory::MemoryBackend`] is an
//! in-process stand-in used by tests and by the `memory` runtime mode.

pub mod memory;

use futures_util::stream::BoxStream;
use std::sync::Arc;

use crate::invoice::{Invoice, InvoiceEvent, InvoiceRequest};

pub use memory::MemoryBackend;

/// Unbounded, ordered feed of invoice state changes.
///
/// The stream ending (or yielding an error) means the subscription is gone and has
/// to be re-established by the consumer.
pub type InvoiceStream = BoxStream<'static, Result<InvoiceEvent, BackendError>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Backend rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Unable to decode backend response: {0}")]
    Decode(String),
    #[error("Unknown invoice {0}")]
    UnknownInvoice(String),
    #[error("Backend unavailable")]
    Unavailable,
    #[error("Invalid backend configuration: {0}")]
    Config(String),
}

/// Asynchronous interface of a payment backend.
pub trait PaymentBackend: Send + Sync {
    /// Mints a new payable invoice for `request.amount_sat` carrying `request.memo`.
    ///
    /// This has side effects on the payment network and is not retried internally.
    fn create_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> impl Future<Output = Result<Invoice, BackendError>> + Send;

    /// Opens a new subscription to invoice state changes.
    fn subscribe_invoices(
        &self,
    ) -> impl Future<Output = Result<InvoiceStream, BackendError>> + Send;
}

impl<T: PaymentBackend> PaymentBackend for Arc<T> {
    fn create_invoice(
        &self,
        request: &InvoiceRequest,
    ) -> impl Future<Output = Result<Invoice, BackendError>> + Send {
        self.as_ref().create_invoice(request)
    }

    fn subscribe_invoices(
        &self,
    ) -> impl Future<Output = Result<InvoiceStream, BackendError>> + Send {
        self.as_ref().subscribe_invoices()
    }
}
