//! Birthday notification job.
//!
//! Once per scheduled tick:
//! 1. Work out "today" in the configured timezone
//! 2. Load customers born on today's month/day (Feb 29 birthdays count on
//!    Feb 28 in non-leap years)
//! 3. Render the birthday template (or the built-in fallback) per customer
//! 4. Emit one `Birthday` event per customer who accepts notifications
//!
//! Failures for one customer are counted and logged; the batch always
//! finishes and returns a [`BirthdayRunSummary`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use salon_common::error::{AppError, CacheError};
use salon_common::types::{
    BirthdayGreeting, Customer, DomainEvent, MessageTemplate, NotificationPreference, TemplateKind,
};
use salon_notifier::bus::EventBus;

use crate::cache::Cache;
use crate::repository::{CustomerRepository, TemplateRepository};
use crate::template::render_template;

pub const FALLBACK_TITLE: &str = "Happy birthday, {firstName}!";
pub const FALLBACK_BODY: &str = "Everyone at {salonName} wishes you a wonderful day, {firstName}. \
     Come celebrate your {age} years with a special treat on us!";

/// How long a run may hold the per-day lock.
const RUN_LOCK_TTL_SECONDS: u64 = 600;

/// The date `birth`'s anniversary falls on in `year`.
///
/// Feb 29 maps to Feb 28 when `year` is not a leap year.
pub fn birthday_in_year(birth: NaiveDate, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
}

pub fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

pub fn is_birthday(birth: NaiveDate, today: NaiveDate) -> bool {
    birthday_in_year(birth, today.year()) == Some(today)
}

/// Age in whole years on `today`.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let years = today.year() - birth.year();
    match birthday_in_year(birth, today.year()) {
        Some(anniversary) if today < anniversary => years - 1,
        _ => years,
    }
}

/// Calendar date at `now` in `tz`.
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

#[derive(Debug, Clone)]
pub struct BirthdayJobOptions {
    pub timezone: Tz,
    /// Count candidates without emitting anything.
    pub dry_run: bool,
    /// Evaluate as of this instant instead of the current time.
    pub now: Option<DateTime<Utc>>,
}

impl BirthdayJobOptions {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            dry_run: false,
            now: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BirthdayRunSummary {
    pub ran_at: DateTime<Utc>,
    pub timezone: String,
    pub total_found: usize,
    pub enqueued: usize,
    pub skipped_by_preference: usize,
    pub errors: usize,
}

pub struct BirthdayJob {
    customers: Arc<dyn CustomerRepository>,
    templates: Arc<dyn TemplateRepository>,
    bus: EventBus,
    salon_name: String,
}

impl BirthdayJob {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        templates: Arc<dyn TemplateRepository>,
        bus: EventBus,
        salon_name: impl Into<String>,
    ) -> Self {
        Self {
            customers,
            templates,
            bus,
            salon_name: salon_name.into(),
        }
    }

    /// Run under a per-day lock so only one instance greets a given day.
    pub async fn run_exclusive(
        &self,
        cache: &Cache,
        options: &BirthdayJobOptions,
    ) -> Result<BirthdayRunSummary, CacheError> {
        // One clock reading for both the lock's day and the run itself.
        let now = options.now.unwrap_or_else(Utc::now);
        let options = BirthdayJobOptions {
            now: Some(now),
            ..options.clone()
        };
        let today = today_in(options.timezone, now);
        let lock = format!("lock:birthday:{}", today);

        cache
            .with_lock(&lock, RUN_LOCK_TTL_SECONDS, || async {
                Ok::<_, CacheError>(self.run(&options).await)
            })
            .await
    }

    pub async fn run(&self, options: &BirthdayJobOptions) -> BirthdayRunSummary {
        let ran_at = options.now.unwrap_or_else(Utc::now);
        let today = today_in(options.timezone, ran_at);
        let mut summary = BirthdayRunSummary {
            ran_at,
            timezone: options.timezone.name().to_string(),
            total_found: 0,
            enqueued: 0,
            skipped_by_preference: 0,
            errors: 0,
        };

        let candidates = match self.load_candidates(today).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, date = %today, "Failed to load birthday candidates");
                summary.errors += 1;
                return summary;
            }
        };
        summary.total_found = candidates.len();

        let template = self.load_template().await;

        for customer in &candidates {
            if customer.notification_preference == NotificationPreference::None {
                tracing::debug!(customer_id = %customer.id, "Customer opted out of notifications");
                summary.skipped_by_preference += 1;
                continue;
            }

            match self.greet(customer, today, &template, options.dry_run) {
                Ok(()) => summary.enqueued += 1,
                Err(e) => {
                    tracing::warn!(customer_id = %customer.id, error = %e, "Birthday greeting failed");
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            date = %today,
            timezone = %summary.timezone,
            total_found = summary.total_found,
            enqueued = summary.enqueued,
            skipped_by_preference = summary.skipped_by_preference,
            errors = summary.errors,
            dry_run = options.dry_run,
            "Birthday job finished"
        );

        summary
    }

    async fn load_candidates(&self, today: NaiveDate) -> Result<Vec<Customer>, AppError> {
        let mut customers = self
            .customers
            .find_by_birthday(today.month(), today.day())
            .await?;

        if today.month() == 2 && today.day() == 28 && !is_leap_year(today.year()) {
            customers.extend(self.customers.find_by_birthday(2, 29).await?);
        }

        customers.retain(|c| c.birth_date.is_some_and(|birth| is_birthday(birth, today)));
        Ok(customers)
    }

    async fn load_template(&self) -> MessageTemplate {
        match self.templates.find_active(TemplateKind::Birthday).await {
            Ok(Some(template)) => template,
            Ok(None) => fallback_template(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load birthday template, using fallback");
                fallback_template()
            }
        }
    }

    fn greet(
        &self,
        customer: &Customer,
        today: NaiveDate,
        template: &MessageTemplate,
        dry_run: bool,
    ) -> anyhow::Result<()> {
        let birth = customer
            .birth_date
            .ok_or_else(|| anyhow::anyhow!("customer has no birth date"))?;
        let age = age_on(birth, today);

        let vars = HashMap::from([
            ("name", customer.name.clone()),
            ("firstName", customer.first_name().to_string()),
            ("age", age.to_string()),
            ("salonName", self.salon_name.clone()),
        ]);
        let message = render_template(&template.title, &template.body, &vars);

        if dry_run {
            tracing::debug!(customer_id = %customer.id, age, "Dry run, birthday greeting not emitted");
            return Ok(());
        }

        self.bus.emit(DomainEvent::Birthday(BirthdayGreeting {
            recipient: customer.into(),
            age,
            message,
        }))?;
        Ok(())
    }
}

fn fallback_template() -> MessageTemplate {
    MessageTemplate {
        title: FALLBACK_TITLE.to_string(),
        body: FALLBACK_BODY.to_string(),
    }
}
