#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Axum middleware that serves a route only to callers who paid a Lightning invoice.
//!
//! - [`gate`] - The access decision: grant, not yet verified, or issue a new challenge
//! - [`paygate`] - Mapping of decisions and failures onto HTTP responses
//! - [`layer`] - The [`Paywall`] builder and its tower layer/service
//!
//! Settlement is observed elsewhere (see the `lnpaywall` server's settlement
//! listener); this crate only reads the shared
//! [`PaymentTable`](lnpaywall_types::table::PaymentTable) and registers the tokens it mints.
//!
//! # Feature Flags
//!
//! - `telemetry` - Emits `tracing` spans and events for each gated request

pub mod gate;
pub mod layer;
pub mod paygate;

pub use gate::{AccessGate, Decision, GateError};
pub use layer::{Paywall, PaywallLayer, PaywallService};
pub use paygate::{DEFAULT_TOKEN_HEADER, Paygate, PaygateError};
