//! Tollgate - Per-Identity Admission Control
//!
//! This crate decides, per request and in constant time, whether a caller may
//! reach a downstream handler. Each identity (client IP) gets its own token
//! bucket or sliding window log, held in a concurrent registry and consulted
//! by a tower middleware in front of any axum handler.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
