//! Turnstile - Distributed Rate Limiting Middleware
//!
//! This crate implements a per-request admission gate that enforces a
//! fixed-window request quota per `(client, path)` pair across a fleet of
//! stateless instances. The only shared state is a counter in an external
//! store (Redis); when that store is unreachable the gate fails open.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
