//! Tollgate - Request Governance Layer
//!
//! This crate enforces per-tier request quotas (general API, authentication,
//! social-platform calls, report generation) using a counter store shared by
//! every server process, and aggregates in-process request metrics: latency,
//! volume, error rate and cache-hit rate.
//!
//! The pieces, leaf to root:
//! - [`store`]: atomic increment-and-expire counters (Redis or in-memory)
//! - [`ratelimit`]: quota policies and the fixed-window limiter
//! - [`metrics`]: labelled counters and durations with snapshots
//! - [`http`]: the axum middleware tying them to inbound requests

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ratelimit;
pub mod store;
