//! Password reset by emailed one-time code.
//!
//! Flow: `request_code` stores a 6-digit code and emits a
//! `PasswordResetRequested` event (the dispatcher emails it), `verify_code`
//! trades a correct code for a single-use ticket, and `reset_password`
//! redeems the ticket to set the new password.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use salon_common::error::AppError;
use salon_common::types::{DomainEvent, PasswordResetNotice, ResetTicket};
use salon_notifier::bus::EventBus;

use crate::cache::{Cache, SetOptions};
use crate::repository::UserRepository;
use crate::ticket::TicketService;

pub const MAX_REQUESTS_PER_WINDOW: i64 = 5;
pub const REQUEST_WINDOW_SECONDS: u64 = 15 * 60;
pub const CODE_TTL_SECONDS: u64 = 15 * 60;
pub const MAX_FAILED_ATTEMPTS: i64 = 5;
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct StoredCode {
    code: String,
    user_id: Uuid,
}

/// Returned by a successful [`PasswordResetService::verify_code`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedCode {
    pub ticket: String,
    pub expires_in_seconds: u64,
}

pub struct PasswordResetService {
    cache: Cache,
    tickets: TicketService,
    users: Arc<dyn UserRepository>,
    bus: EventBus,
}

impl PasswordResetService {
    pub fn new(
        cache: Cache,
        tickets: TicketService,
        users: Arc<dyn UserRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            cache,
            tickets,
            users,
            bus,
        }
    }

    fn requests_key(email: &str) -> String {
        format!("password-reset:requests:{}", email)
    }

    fn code_key(email: &str) -> String {
        format!("password-reset:code:{}", email)
    }

    fn failures_key(email: &str) -> String {
        format!("password-reset:failures:{}", email)
    }

    /// Send a reset code to `email`.
    ///
    /// Succeeds without doing anything for unknown addresses so callers
    /// cannot discover which accounts exist.
    pub async fn request_code(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email)?;

        let requests = self
            .cache
            .incr_with_ttl(&Self::requests_key(&email), REQUEST_WINDOW_SECONDS)
            .await?;
        if requests > MAX_REQUESTS_PER_WINDOW {
            tracing::warn!(email = %email, requests, "Password reset rate limit hit");
            return Err(AppError::TooManyRequests(
                "Too many reset requests, try again later".to_string(),
            ));
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            tracing::debug!(email = %email, "Password reset requested for unknown email");
            return Ok(());
        };

        let code = generate_code();
        self.cache
            .set(
                &Self::code_key(&email),
                &StoredCode {
                    code: code.clone(),
                    user_id: user.id,
                },
                SetOptions::ttl(CODE_TTL_SECONDS),
            )
            .await?;
        self.cache.delete(&Self::failures_key(&email)).await?;

        self.bus
            .emit(DomainEvent::PasswordResetRequested(PasswordResetNotice {
                user_id: user.id,
                name: user.name,
                email: email.clone(),
                code,
                expires_in_minutes: CODE_TTL_SECONDS / 60,
            }))
            .map_err(|e| AppError::Internal(format!("Could not deliver reset code: {}", e)))?;

        tracing::info!(user_id = %user.id, "Password reset code issued");
        Ok(())
    }

    /// Check `code` and hand out a reset ticket.
    ///
    /// After [`MAX_FAILED_ATTEMPTS`] wrong guesses the code is discarded and a
    /// new one has to be requested.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<VerifiedCode, AppError> {
        let email = normalize_email(email)?;
        let code_key = Self::code_key(&email);
        let failures_key = Self::failures_key(&email);

        let Some(stored) = self.cache.get::<StoredCode>(&code_key).await? else {
            return Err(invalid_code());
        };

        if stored.code != code.trim() {
            let failures = self
                .cache
                .incr_with_ttl(&failures_key, CODE_TTL_SECONDS)
                .await?;
            if failures >= MAX_FAILED_ATTEMPTS {
                self.cache.delete(&code_key).await?;
                self.cache.delete(&failures_key).await?;
                tracing::warn!(email = %email, failures, "Reset code invalidated after repeated failures");
                return Err(AppError::TooManyRequests(
                    "Too many failed attempts, request a new code".to_string(),
                ));
            }
            return Err(invalid_code());
        }

        // Whoever deletes the code owns this verification.
        if !self.cache.delete(&code_key).await? {
            return Err(invalid_code());
        }
        self.cache.delete(&failures_key).await?;

        let ticket = self
            .tickets
            .issue(&ResetTicket {
                email,
                user_id: stored.user_id,
            })
            .await?;

        tracing::info!(user_id = %stored.user_id, "Password reset code verified");
        Ok(VerifiedCode {
            ticket,
            expires_in_seconds: self.tickets.ttl_seconds(),
        })
    }

    /// Redeem `ticket` and set the new password.
    pub async fn reset_password(&self, ticket: &str, new_password: &str) -> Result<(), AppError> {
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let Some(redeemed) = self.tickets.consume::<ResetTicket>(ticket).await? else {
            return Err(AppError::Auth("Invalid or expired reset ticket".to_string()));
        };

        self.users
            .update_password(redeemed.user_id, new_password)
            .await?;
        self.cache
            .delete(&Self::requests_key(&redeemed.email))
            .await?;

        tracing::info!(user_id = %redeemed.user_id, "Password reset completed");
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    Ok(email)
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

fn invalid_code() -> AppError {
    AppError::Validation("Invalid or expired code".to_string())
}
