//! Enrichment of network reports with sentiment and quality scores from a
//! hosted language model.
//!
//! [`runner::run_enrichment`] is the batch pass; [`api`] exposes it over HTTP
//! and on an optional interval.

pub mod api;
pub mod model;
pub mod runner;
pub mod sanitize;
pub mod validate;
