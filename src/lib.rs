//! Lightning paywall server.
//!
//! Wires the pieces from [`lnpaywall_types`] and [`lnpaywall_axum`] into a runnable
//! service:
//!
//! - [`listener`] consumes the backend's invoice feed and marks tokens settled
//! - [`lnd`] talks to an LND node over its REST gateway
//! - [`backend`] picks the backend named in the configuration
//! - [`handlers`] and [`run`] expose everything over HTTP

pub mod backend;
pub mod config;
pub mod handlers;
pub mod listener;
pub mod lnd;
pub mod run;
pub mod sweeper;
pub mod util;
