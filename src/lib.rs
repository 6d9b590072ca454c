//! Ratewarden - Per-Client Rate Limiting Middleware
//!
//! This crate implements per-client token bucket rate limiting for HTTP
//! services. Each limiter tracks clients by network address in its own
//! registry, evicts idle clients from a background sweeper, and plugs into
//! axum or any tower stack as a layer.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
