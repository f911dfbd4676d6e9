//! # Ozza API Server Library
//!
//! HTTP layer for Ozza: router, handlers, middleware and configuration.
//! Domain types and persistence live in `ozza-shared`.
//!
//! ## Modules
//!
//! - `app`: application state and router builder
//! - `config`: environment configuration
//! - `error`: error type and HTTP response mapping
//! - `middleware`: session auth and security headers
//! - `routes`: API route handlers
//! - `sweeper`: background invitation expiry

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod sweeper;
