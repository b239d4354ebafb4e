//! HTTP surface of the salon notification service.
//!
//! Endpoints:
//! - GET  /health
//! - POST /api/auth/password-reset/request
//! - POST /api/auth/password-reset/verify
//! - POST /api/auth/password-reset/confirm

pub mod routes;
pub mod state;
