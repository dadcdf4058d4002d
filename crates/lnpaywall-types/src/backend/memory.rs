//! In-process payment backend.
//!
//! Mints fake payment requests and emits invoice events through a broadcast channel,
//! so the whole challenge → settlement → access flow can run without a Lightning node.

use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::{BackendError, InvoiceStream, PaymentBackend};
use crate::invoice::{Invoice, InvoiceEvent, InvoiceRequest, InvoiceState};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredInvoice {
    id: String,
    amount_sat: u64,
    memo: String,
}

#[derive(Debug)]
struct MemoryBackendInner {
    invoices: DashMap<String, StoredInvoice>,
    events: broadcast::Sender<InvoiceEvent>,
    next_index: AtomicU64,
    available: AtomicBool,
}

/// A [`PaymentBackend`] that keeps invoices in memory.
///
/// Clones share the same invoices and event feed. A subscriber that falls more than
/// the channel capacity behind gets an error and its stream ends; events it missed
/// are not replayed.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MemoryBackendInner {
                invoices: DashMap::new(),
                events,
                next_index: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Makes subsequent `create_invoice` calls fail with [`BackendError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of invoices minted so far.
    pub fn invoice_count(&self) -> usize {
        self.inner.invoices.len()
    }

    /// Number of live feed subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Simulates payment of `payment_request` and emits a `SETTLED` event for it.
    ///
    /// Paying twice emits a second, duplicate event.
    pub fn pay(&self, payment_request: &str) -> Result<InvoiceEvent, BackendError> {
        let stored = self
            .inner
            .invoices
            .get(payment_request)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackendError::UnknownInvoice(payment_request.to_string()))?;
        let event = InvoiceEvent {
            id: stored.id,
            state: InvoiceState::Settled,
            memo: stored.memo,
            amount_paid_msat: Some(stored.amount_sat * 1000),
        };
        self.emit(event.clone());
        tracing::debug!(payment_request, "memory backend settled invoice");
        Ok(event)
    }

    /// Pushes an arbitrary event onto the feed.
    pub fn emit(&self, event: InvoiceEvent) {
        // No subscribers is not an error: the event is simply unobserved.
        let _ = self.inner.events.send(event);
    }
}

impl PaymentBackend for MemoryBackend {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, BackendError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable);
        }
        let index = self.inner.next_index.fetch_add(1, Ordering::SeqCst);
        let id = format!("{index:064x}");
        let payment_request = format!("lnmem{}n1p{index:016x}", request.amount_sat);
        self.inner.invoices.insert(
            payment_request.clone(),
            StoredInvoice {
                id: id.clone(),
                amount_sat: request.amount_sat,
                memo: request.memo.clone(),
            },
        );
        self.emit(InvoiceEvent {
            id: id.clone(),
            state: InvoiceState::Open,
            memo: request.memo.clone(),
            amount_paid_msat: None,
        });
        Ok(Invoice {
            id,
            payment_request,
        })
    }

    async fn subscribe_invoices(&self) -> Result<InvoiceStream, BackendError> {
        let receiver = self.inner.events.subscribe();
        let events = stream::unfold(Some(receiver), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), Some(receiver))),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "memory invoice feed lagged, events dropped");
                    Some((Err(BackendError::Unavailable), None))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(events.boxed())
    }
}
