use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string
    pub redis_url: String,

    /// Prefix prepended to every cache key (default: "salon")
    pub cache_key_prefix: String,

    /// Port the HTTP API listens on (default: 3000)
    pub http_port: u16,

    /// Maximum number of notification jobs in flight (default: 3)
    pub notification_concurrency: usize,

    /// Delay before a failed notification job is retried, in milliseconds (default: 2000)
    pub notification_retry_delay_ms: u64,

    /// Attempts before a job is dead-lettered. Unset means retry forever.
    pub notification_max_attempts: Option<u32>,

    /// Cron expression for the birthday job (default: "0 9 * * *")
    pub birthday_cron: String,

    /// IANA timezone used to decide what "today" is (default: "America/Sao_Paulo")
    pub birthday_timezone: String,

    /// When true the birthday job counts candidates but emits nothing
    pub birthday_dry_run: bool,

    /// Lifetime of password-reset tickets in seconds (default: 900)
    pub reset_ticket_ttl_seconds: u64,

    /// Display name used in notification copy
    pub salon_name: String,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Webhook that receives push notification payloads
    pub push_webhook_url: Option<String>,

    /// Upper bound on how long shutdown waits for queued notifications (default: 30)
    pub shutdown_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            cache_key_prefix: std::env::var("CACHE_KEY_PREFIX")
                .unwrap_or_else(|_| "salon".to_string()),
            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_PORT must be a valid u16"))?,
            notification_concurrency: std::env::var("NOTIFICATION_CONCURRENCY")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFICATION_CONCURRENCY must be a valid usize"))?,
            notification_retry_delay_ms: std::env::var("NOTIFICATION_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFICATION_RETRY_DELAY_MS must be a valid u64"))?,
            notification_max_attempts: std::env::var("NOTIFICATION_MAX_ATTEMPTS")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| anyhow::anyhow!("NOTIFICATION_MAX_ATTEMPTS must be a valid u32"))?,
            birthday_cron: std::env::var("BIRTHDAY_CRON")
                .unwrap_or_else(|_| "0 9 * * *".to_string()),
            birthday_timezone: std::env::var("BIRTHDAY_TIMEZONE")
                .unwrap_or_else(|_| "America/Sao_Paulo".to_string()),
            birthday_dry_run: std::env::var("BIRTHDAY_DRY_RUN")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
            reset_ticket_ttl_seconds: std::env::var("RESET_TICKET_TTL_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RESET_TICKET_TTL_SECONDS must be a valid u64"))?,
            salon_name: std::env::var("SALON_NAME").unwrap_or_else(|_| "our salon".to_string()),
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            push_webhook_url: std::env::var("PUSH_WEBHOOK_URL").ok(),
            shutdown_timeout_secs: std::env::var("SHUTDOWN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SHUTDOWN_TIMEOUT_SECS must be a valid u64"))?,
        })
    }
}
