//! Core library: work queue, rate limiting, enrichment client, heuristic
//! extractors, and the batch coordinator.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod extract;
pub mod processor;
pub mod queue;
pub mod ratelimit;
pub mod tags;
pub mod usage;
