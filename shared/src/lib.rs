//! Re-exports the shared pieces consumed by the enrichment and stats
//! services: configuration handling, error types, report DTOs, the Postgres
//! store and the chat-completion client for the hosted model.

pub mod config;
pub mod db;
pub mod dto;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod openai_client;
pub mod stats;
