//! Blob offload
//!
//! Oversized event payloads live in durable object storage under a
//! deterministic key; the metadata record keeps only the reference URI.

mod gateway;

pub use gateway::{BlobGatewayConfig, BlobOffloadGateway};
