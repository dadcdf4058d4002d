//! Settlement listener: turns the backend's invoice feed into settled table entries.
//!
//! The listener owns its subscription for the lifetime of the process. For every
//! event it:
//!
//! 1. ignores any state other than `SETTLED`,
//! 2. decodes the correlation token from the memo (malformed memos are logged and dropped),
//! 3. upserts the token as settled in the shared [`PaymentTable`].
//!
//! When the feed ends or fails, the listener reports [`ListenerStatus::Reconnecting`]
//! and resubscribes after an exponential backoff. Request handling is unaffected;
//! tokens simply stay pending until the feed is back.

use futures_util::StreamExt;
use lnpaywall_types::backend::{InvoiceStream, PaymentBackend};
use lnpaywall_types::invoice::{InvoiceEvent, InvoiceState};
use lnpaywall_types::memo::{MemoCodec, MemoError};
use lnpaywall_types::table::{PaymentTable, SettleOutcome, Settlement};
use lnpaywall_types::token::CorrelationToken;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Availability of the settlement feed, as last observed by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ListenerStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Stopped,
}

impl ListenerStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ListenerStatus::Connected)
    }
}

/// What [`SettlementListener::handle_event`] did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored(InvoiceState),
    Settled {
        token: CorrelationToken,
        outcome: SettleOutcome,
    },
    Malformed(MemoError),
}

/// Exponential backoff between resubscription attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt and doubles it, capped at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}

enum FeedEnd {
    Cancelled,
    Closed,
    Failed(lnpaywall_types::backend::BackendError),
}

/// Long-running consumer of the backend's invoice feed.
pub struct SettlementListener<B> {
    backend: B,
    table: PaymentTable,
    codec: MemoCodec,
    backoff: Backoff,
    status: watch::Sender<ListenerStatus>,
}

/// Handle to a spawned listener.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
    status: watch::Receiver<ListenerStatus>,
}

impl ListenerHandle {
    pub fn status(&self) -> watch::Receiver<ListenerStatus> {
        self.status.clone()
    }

    /// Waits for the listener task to finish (after cancellation).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Settlement listener task failed");
        }
    }
}

impl<B> SettlementListener<B> {
    pub fn new(backend: B, table: PaymentTable) -> Self {
        let (status, _) = watch::channel(ListenerStatus::Connecting);
        Self {
            backend,
            table,
            codec: MemoCodec::default(),
            backoff: Backoff::default(),
            status,
        }
    }

    pub fn with_memo_codec(mut self, codec: MemoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn status(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    /// Applies one feed event to the table. Never fails and never panics.
    pub fn handle_event(&self, event: &InvoiceEvent) -> EventOutcome {
        if !event.state.is_settled() {
            tracing::trace!(invoice = %event.id, state = ?event.state, "Ignoring non-settled invoice update");
            return EventOutcome::Ignored(event.state);
        }
        let token = match self.codec.decode(&event.memo) {
            Ok(decoded) => decoded.token,
            Err(error) => {
                tracing::warn!(invoice = %event.id, %error, "Dropping settlement with malformed memo");
                return EventOutcome::Malformed(error);
            }
        };
        let outcome = self
            .table
            .set_settled(token.clone(), Settlement::now(event.amount_paid_msat));
        match outcome {
            SettleOutcome::Newly => {
                tracing::info!(invoice = %event.id, %token, amount_paid_msat = ?event.amount_paid_msat, "Payment settled")
            }
            SettleOutcome::Already => {
                tracing::debug!(invoice = %event.id, %token, "Duplicate settlement ignored")
            }
        }
        EventOutcome::Settled { token, outcome }
    }

    fn set_status(&self, status: ListenerStatus) {
        self.status.send_replace(status);
    }
}

impl<B> SettlementListener<B>
where
    B: PaymentBackend + 'static,
{
    /// Runs the listener on its own task until `cancellation` fires.
    pub fn spawn(self, cancellation: CancellationToken) -> ListenerHandle {
        let status = self.status();
        let task = tokio::spawn(self.run(cancellation));
        ListenerHandle { task, status }
    }

    pub async fn run(mut self, cancellation: CancellationToken) {
        loop {
            let subscribed = tokio::select! {
                _ = cancellation.cancelled() => break,
                subscribed = self.backend.subscribe_invoices() => subscribed,
            };
            match subscribed {
                Ok(feed) => {
                    tracing::info!("Subscribed to invoice feed");
                    self.set_status(ListenerStatus::Connected);
                    match self.consume(feed, &cancellation).await {
                        FeedEnd::Cancelled => break,
                        FeedEnd::Closed => tracing::warn!("Invoice feed closed"),
                        FeedEnd::Failed(error) => tracing::error!(%error, "Invoice feed failed"),
                    }
                }
                Err(error) => tracing::error!(%error, "Unable to subscribe to invoice feed"),
            }

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            self.set_status(ListenerStatus::Reconnecting { attempt });
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Settlements are not observed until the invoice feed reconnects");
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.set_status(ListenerStatus::Stopped);
        tracing::info!("Settlement listener stopped");
    }

    async fn consume(&mut self, mut feed: InvoiceStream, cancellation: &CancellationToken) -> FeedEnd {
        let mut received_any = false;
        loop {
            let next = tokio::select! {
                _ = cancellation.cancelled() => return FeedEnd::Cancelled,
                next = feed.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if !received_any {
                        received_any = true;
                        self.backoff.reset();
                    }
                    self.handle_event(&event);
                }
                Some(Err(error)) => return FeedEnd::Failed(error),
                None => return FeedEnd::Closed,
            }
        }
    }
}
