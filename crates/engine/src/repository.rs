//! Repository protocols the notification core reads through, with their
//! PostgreSQL implementations.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use salon_common::error::AppError;
use salon_common::types::{Customer, MessageTemplate, TemplateKind, User};

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Active customers whose stored birth date falls on `month`/`day`.
    async fn find_by_birthday(&self, month: u32, day: u32) -> Result<Vec<Customer>, AppError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_active(&self, kind: TemplateKind) -> Result<Option<MessageTemplate>, AppError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn update_password(&self, user_id: Uuid, new_password: &str) -> Result<(), AppError>;
}

pub struct PgCustomerRepository {
    pool: PgPool,
}

impl PgCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    async fn find_by_birthday(&self, month: u32, day: u32) -> Result<Vec<Customer>, AppError> {
        let customers: Vec<Customer> = sqlx::query_as(
            r#"
            SELECT id, name, email, phone, birth_date, notification_preference
            FROM customers
            WHERE deleted_at IS NULL
              AND birth_date IS NOT NULL
              AND EXTRACT(MONTH FROM birth_date) = $1
              AND EXTRACT(DAY FROM birth_date) = $2
            ORDER BY name
            "#,
        )
        .bind(month as i32)
        .bind(day as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }
}

pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn find_active(&self, kind: TemplateKind) -> Result<Option<MessageTemplate>, AppError> {
        let template: Option<MessageTemplate> = sqlx::query_as(
            r#"
            SELECT title, body
            FROM notification_templates
            WHERE kind = $1 AND active = true
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }
}

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user: Option<User> = sqlx::query_as(
            "SELECT id, name, email, created_at, updated_at FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_password(&self, user_id: Uuid, new_password: &str) -> Result<(), AppError> {
        // Hashing happens in the database (pgcrypto), so the plain text never lands in a column.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = crypt($1, gen_salt('bf')), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(new_password)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }

        tracing::info!(user_id = %user_id, "Password updated");
        Ok(())
    }
}
