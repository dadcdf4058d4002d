//! Graceful shutdown on SIGTERM and SIGINT.
//!
//! [`SigDown`] owns the signal listener task and hands out clones of one
//! [`CancellationToken`]; cancelling it stops the HTTP server, the settlement
//! listener and the pending sweeper together.

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Turns SIGTERM and SIGINT into a cancellation token shared by the server,
/// the settlement listener and the pending sweeper.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers. Fails if the OS refuses the registration.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
                _ = inner.cancelled() => {}
            }
            inner.cancel();
        });
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: outer,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for a shutdown signal and for the signal task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_the_token_releases_recv() {
        let sig_down = SigDown::try_new().unwrap();
        sig_down.cancellation_token().cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), sig_down.recv())
            .await
            .unwrap();
    }
}
