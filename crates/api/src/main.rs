//! Salon notification service binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use salon_common::config::AppConfig;
use salon_common::db::create_pool;
use salon_common::redis_pool::create_redis_pool;
use salon_common::types::ChannelType;
use salon_engine::birthday::{BirthdayJob, BirthdayJobOptions};
use salon_engine::cache::Cache;
use salon_engine::password_reset::PasswordResetService;
use salon_engine::redis_store::RedisStore;
use salon_engine::repository::{PgCustomerRepository, PgTemplateRepository, PgUserRepository};
use salon_engine::scheduler::{Scheduler, parse_timezone};
use salon_engine::ticket::TicketService;
use salon_notifier::bus::EventBus;
use salon_notifier::dispatcher::NotificationDispatcher;
use salon_notifier::runner::{JobRunner, RunnerConfig};
use salon_notifier::sender::{EmailSender, LogSender, NotificationSender, PushSender};

use salon_api::routes::create_router;
use salon_api::state::AppState;

const BIRTHDAY_JOB: &str = "birthday-notifications";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "salon_api=debug,salon_engine=debug,salon_notifier=debug,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting salon notification service...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database pool created, migrations applied");

    let redis = create_redis_pool(&config.redis_url).await?;
    let cache = Cache::new(Arc::new(RedisStore::new(redis)), config.cache_key_prefix.clone());
    tracing::info!("Redis connection established");

    // Notification pipeline: bus -> dispatcher -> job runner -> senders
    let runner = JobRunner::new(RunnerConfig {
        concurrency: config.notification_concurrency,
        retry_delay: Duration::from_millis(config.notification_retry_delay_ms),
        max_attempts: config.notification_max_attempts,
    });
    let bus = EventBus::default();

    let email: Arc<dyn NotificationSender> = match (&config.resend_api_key, &config.email_from) {
        (Some(api_key), Some(from)) => Arc::new(EmailSender::new(api_key, from)?),
        _ => {
            tracing::warn!("RESEND_API_KEY or EMAIL_FROM not set, emails will only be logged");
            Arc::new(LogSender::new(ChannelType::Email))
        }
    };
    let push: Arc<dyn NotificationSender> = match &config.push_webhook_url {
        Some(url) => Arc::new(PushSender::new(url)?),
        None => {
            tracing::warn!("PUSH_WEBHOOK_URL not set, push notifications will only be logged");
            Arc::new(LogSender::new(ChannelType::Push))
        }
    };
    let dispatcher = Arc::new(
        NotificationDispatcher::new(runner.clone(), config.salon_name.clone())
            .with_sender(email)
            .with_sender(push),
    );
    dispatcher.spawn(&bus);

    // Birthday job
    let birthday = Arc::new(BirthdayJob::new(
        Arc::new(PgCustomerRepository::new(pool.clone())),
        Arc::new(PgTemplateRepository::new(pool.clone())),
        bus.clone(),
        config.salon_name.clone(),
    ));
    let options = BirthdayJobOptions {
        dry_run: config.birthday_dry_run,
        ..BirthdayJobOptions::new(parse_timezone(&config.birthday_timezone)?)
    };

    let scheduler = Scheduler::new();
    {
        let cache = cache.clone();
        scheduler.register(
            BIRTHDAY_JOB,
            &config.birthday_cron,
            &config.birthday_timezone,
            move || {
                let birthday = birthday.clone();
                let cache = cache.clone();
                let options = options.clone();
                async move {
                    match birthday.run_exclusive(&cache, &options).await {
                        Ok(summary) => {
                            tracing::debug!(?summary, "Birthday run summary");
                            Ok(())
                        }
                        Err(e) if e.is_lock_not_acquired() => {
                            tracing::info!("Birthday run already handled by another instance");
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            },
        )?;
    }

    // Password reset
    let password_reset = Arc::new(PasswordResetService::new(
        cache.clone(),
        TicketService::new(cache.clone(), config.reset_ticket_ttl_seconds),
        Arc::new(PgUserRepository::new(pool.clone())),
        bus.clone(),
    ));

    let state = AppState::new(password_reset, runner.clone());

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    // Let queued notifications finish before exiting.
    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, runner.drain()).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            pending = ?runner.stats(),
            "Shutdown timeout reached with notifications still pending"
        );
    } else {
        tracing::info!("Notification queue drained");
    }

    Ok(())
}

async fn shutdown_signal(scheduler: Scheduler) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    scheduler.stop_all();
}
