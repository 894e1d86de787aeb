//! Core domain + application logic for the WhatsApp message listener.
//!
//! This crate is intentionally transport-agnostic. The wire protocol lives
//! behind a port (trait) in [`transport`], implemented by an adapter crate;
//! this crate owns the connection lifecycle, payload normalization, and the
//! durable message log that an external process polls.

pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod listener;
pub mod logging;
pub mod metadata;
pub mod normalize;
pub mod store;
pub mod transport;

pub use errors::{Error, Result};
