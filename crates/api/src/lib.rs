//! HTTP surface for a reefkv node.
//!
//! JSON envelopes over hyper for the KV endpoints, and a Server-Sent
//! Events stream for `/v1/watch`. Error bodies carry a machine-readable
//! kind plus a human hint: `{"error": "...", "message": "..."}`.

pub mod server;
pub mod sse;

pub use server::{serve, ApiError};
