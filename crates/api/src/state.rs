//! Shared application state for the Axum API server.

use std::sync::Arc;

use salon_engine::password_reset::PasswordResetService;
use salon_notifier::runner::JobRunner;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub password_reset: Arc<PasswordResetService>,
    pub runner: JobRunner,
}

impl AppState {
    pub fn new(password_reset: Arc<PasswordResetService>, runner: JobRunner) -> Self {
        Self {
            password_reset,
            runner,
        }
    }
}
