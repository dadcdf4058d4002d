//! Process plumbing shared by the server binary.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`sig_down`] | Graceful shutdown signal handling |
//! | [`telemetry`] | Log subscriber and OpenTelemetry export |

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
