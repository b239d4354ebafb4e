use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a customer wants to be contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationPreference {
    Email,
    Push,
    All,
    None,
}

impl NotificationPreference {
    /// Channels this preference allows, in delivery order.
    pub fn channels(self) -> &'static [ChannelType] {
        match self {
            NotificationPreference::Email => &[ChannelType::Email],
            NotificationPreference::Push => &[ChannelType::Push],
            NotificationPreference::All => &[ChannelType::Email, ChannelType::Push],
            NotificationPreference::None => &[],
        }
    }
}

impl std::fmt::Display for NotificationPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationPreference::Email => write!(f, "email"),
            NotificationPreference::Push => write!(f, "push"),
            NotificationPreference::All => write!(f, "all"),
            NotificationPreference::None => write!(f, "none"),
        }
    }
}

/// Notification channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Push,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Email => write!(f, "email"),
            ChannelType::Push => write!(f, "push"),
        }
    }
}

/// A salon customer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub notification_preference: NotificationPreference,
}

impl Customer {
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

/// A staff or customer account that can sign in.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of configurable message templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Birthday,
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateKind::Birthday => write!(f, "birthday"),
        }
    }
}

/// A stored title/body pair with `{placeholder}` tokens.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageTemplate {
    pub title: String,
    pub body: String,
}

/// Template output after placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
}

/// Where a notification should go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub customer_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub preference: NotificationPreference,
}

impl From<&Customer> for Recipient {
    fn from(customer: &Customer) -> Self {
        Self {
            customer_id: Some(customer.id),
            name: customer.name.clone(),
            email: customer.email.clone(),
            phone: customer.phone.clone(),
            preference: customer.notification_preference,
        }
    }
}

/// Appointment details carried by the appointment lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentNotice {
    pub appointment_id: Uuid,
    pub recipient: Recipient,
    pub service_name: String,
    pub professional_name: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub cancellation_reason: Option<String>,
}

/// A rendered birthday greeting for one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthdayGreeting {
    pub recipient: Recipient,
    pub age: i32,
    pub message: RenderedMessage,
}

/// A password-reset code that must reach the account owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetNotice {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub code: String,
    pub expires_in_minutes: u64,
}

/// Domain events fanned out to notification senders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    AppointmentCreated(AppointmentNotice),
    AppointmentConfirmed(AppointmentNotice),
    AppointmentCancelled(AppointmentNotice),
    Birthday(BirthdayGreeting),
    PasswordResetRequested(PasswordResetNotice),
}

/// Discriminant of [`DomainEvent`], used to subscribe to one kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AppointmentCreated,
    AppointmentConfirmed,
    AppointmentCancelled,
    Birthday,
    PasswordResetRequested,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::AppointmentCreated(_) => EventKind::AppointmentCreated,
            DomainEvent::AppointmentConfirmed(_) => EventKind::AppointmentConfirmed,
            DomainEvent::AppointmentCancelled(_) => EventKind::AppointmentCancelled,
            DomainEvent::Birthday(_) => EventKind::Birthday,
            DomainEvent::PasswordResetRequested(_) => EventKind::PasswordResetRequested,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::AppointmentCreated => write!(f, "appointment.created"),
            EventKind::AppointmentConfirmed => write!(f, "appointment.confirmed"),
            EventKind::AppointmentCancelled => write!(f, "appointment.cancelled"),
            EventKind::Birthday => write!(f, "customer.birthday"),
            EventKind::PasswordResetRequested => write!(f, "auth.password_reset_requested"),
        }
    }
}

/// Payload stored behind a password-reset ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTicket {
    pub email: String,
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_channels() {
        assert_eq!(NotificationPreference::None.channels(), &[] as &[ChannelType]);
        assert_eq!(
            NotificationPreference::All.channels(),
            &[ChannelType::Email, ChannelType::Push]
        );
    }

    #[test]
    fn test_first_name() {
        let customer = Customer {
            id: Uuid::new_v4(),
            name: "Ana Beatriz Souza".to_string(),
            email: None,
            phone: None,
            birth_date: None,
            notification_preference: NotificationPreference::Email,
        };
        assert_eq!(customer.first_name(), "Ana");
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DomainEvent::PasswordResetRequested(PasswordResetNotice {
            user_id: Uuid::nil(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            code: "123456".to_string(),
            expires_in_minutes: 15,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "password_reset_requested");
        assert_eq!(json["payload"]["code"], "123456");
        assert_eq!(event.kind(), EventKind::PasswordResetRequested);
    }
}
