//! Runtime selection between the configured payment backends.

use lnpaywall_types::backend::{BackendError, InvoiceStream, MemoryBackend, PaymentBackend};
use lnpaywall_types::invoice::{Invoice, InvoiceRequest};

use crate::config::BackendConfig;
use crate::lnd::LndRestBackend;

/// The backend chosen by `backend.type` in the configuration file.
#[derive(Debug, Clone)]
pub enum ConfiguredBackend {
    Memory(MemoryBackend),
    Lnd(LndRestBackend),
}

impl ConfiguredBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let backend = match config {
            BackendConfig::Memory => {
                tracing::warn!("Using the in-memory payment backend; settle invoices via POST /dev/pay");
                ConfiguredBackend::Memory(MemoryBackend::new())
            }
            BackendConfig::Lnd(lnd) => {
                let backend = LndRestBackend::from_config(lnd)?;
                tracing::info!(rest_url = %backend.base_url(), "Using LND REST backend");
                ConfiguredBackend::Lnd(backend)
            }
        };
        Ok(backend)
    }

    /// The in-memory backend, when that is the one in use.
    pub fn as_memory(&self) -> Option<&MemoryBackend> {
        match self {
            ConfiguredBackend::Memory(memory) => Some(memory),
            ConfiguredBackend::Lnd(_) => None,
        }
    }
}

impl PaymentBackend for ConfiguredBackend {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, BackendError> {
        match self {
            ConfiguredBackend::Memory(backend) => backend.create_invoice(request).await,
            ConfiguredBackend::Lnd(backend) => backend.create_invoice(request).await,
        }
    }

    async fn subscribe_invoices(&self) -> Result<InvoiceStream, BackendError> {
        match self {
            ConfiguredBackend::Memory(backend) => backend.subscribe_invoices().await,
            ConfiguredBackend::Lnd(backend) => backend.subscribe_invoices().await,
        }
    }
}
