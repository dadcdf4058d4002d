#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for Lightning-paid HTTP resources.
//!
//! A client asks for a protected resource without a token and receives
//! `402 Payment Required` together with a fresh [`token::CorrelationToken`] and a
//! payable invoice whose memo carries the token. Once the payment network reports
//! the invoice as settled, the token is marked paid in the shared
//! [`table::PaymentTable`] and the client can present it to get the resource.
//!
//! # Modules
//!
//! - [`backend`] - The [`backend::PaymentBackend`] trait and an in-memory implementation
//! - [`config`] - Literal-or-environment configuration values
//! - [`invoice`] - Invoices, settlement events and payment challenges
//! - [`memo`] - Strict encoding of tokens into invoice memos
//! - [`table`] - Concurrent payment-state table shared by listener and request path
//! - [`timestamp`] - Unix timestamps
//! - [`token`] - Correlation tokens

pub mod backend;
pub mod config;
pub mod invoice;
pub mod memo;
pub mod table;
pub mod timestamp;
pub mod token;
