//! Event dispatcher: turns domain events into delivery jobs.
//!
//! For each event the dispatcher composes one [`OutboundMessage`] per channel
//! the recipient accepts, then enqueues a job per message on the
//! [`JobRunner`]. The job calls the channel's [`NotificationSender`], so a
//! provider outage turns into retries instead of lost notifications.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use salon_common::types::{AppointmentNotice, ChannelType, DomainEvent, EventKind, Recipient};

use crate::bus::EventBus;
use crate::runner::JobRunner;
use crate::sender::{NotificationSender, OutboundMessage};

pub struct NotificationDispatcher {
    runner: JobRunner,
    senders: HashMap<ChannelType, Arc<dyn NotificationSender>>,
    salon_name: String,
}

impl NotificationDispatcher {
    pub fn new(runner: JobRunner, salon_name: impl Into<String>) -> Self {
        Self {
            runner,
            senders: HashMap::new(),
            salon_name: salon_name.into(),
        }
    }

    /// Register the sender for its channel, replacing any previous one.
    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    /// Listen on `bus` and dispatch every event until the bus closes.
    pub fn spawn(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut receiver = bus.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        self.dispatch(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::error!(skipped, "Notification dispatcher lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, notification dispatcher stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Enqueue delivery jobs for `event`. Returns the number of jobs queued.
    pub fn dispatch(&self, event: &DomainEvent) -> usize {
        let mut queued = 0;

        for message in self.compose(event) {
            let Some(sender) = self.senders.get(&message.channel).cloned() else {
                tracing::warn!(
                    channel = %message.channel,
                    event = %message.event,
                    "No sender registered for channel, message dropped"
                );
                continue;
            };

            let label = format!("{}:{}:{}", message.event, message.channel, message.to);
            let message = Arc::new(message);
            self.runner.enqueue(label, move || {
                let sender = sender.clone();
                let message = message.clone();
                async move {
                    sender.send(&message).await?;
                    Ok(())
                }
            });
            queued += 1;
        }

        queued
    }

    /// Build the outbound messages for an event without sending anything.
    pub fn compose(&self, event: &DomainEvent) -> Vec<OutboundMessage> {
        let kind = event.kind();
        match event {
            DomainEvent::AppointmentCreated(notice) => {
                let subject = format!("Appointment booked: {}", notice.service_name);
                let body = format!(
                    "Hi {}, your {} at {} is booked for {}.",
                    first_name(&notice.recipient),
                    notice.service_name,
                    self.salon_name,
                    when(notice)
                );
                fan_out(&notice.recipient, kind, &subject, &body)
            }
            DomainEvent::AppointmentConfirmed(notice) => {
                let subject = format!("Appointment confirmed: {}", notice.service_name);
                let with = notice
                    .professional_name
                    .as_deref()
                    .map(|name| format!(" with {}", name))
                    .unwrap_or_default();
                let body = format!(
                    "Hi {}, your {}{} on {} is confirmed. See you at {}!",
                    first_name(&notice.recipient),
                    notice.service_name,
                    with,
                    when(notice),
                    self.salon_name
                );
                fan_out(&notice.recipient, kind, &subject, &body)
            }
            DomainEvent::AppointmentCancelled(notice) => {
                let subject = format!("Appointment cancelled: {}", notice.service_name);
                let reason = notice
                    .cancellation_reason
                    .as_deref()
                    .map(|reason| format!(" Reason: {}.", reason))
                    .unwrap_or_default();
                let body = format!(
                    "Hi {}, your {} on {} was cancelled.{}",
                    first_name(&notice.recipient),
                    notice.service_name,
                    when(notice),
                    reason
                );
                fan_out(&notice.recipient, kind, &subject, &body)
            }
            DomainEvent::Birthday(greeting) => fan_out(
                &greeting.recipient,
                kind,
                &greeting.message.title,
                &greeting.message.body,
            ),
            // Reset codes always go by email, whatever the stored preference.
            DomainEvent::PasswordResetRequested(notice) => vec![OutboundMessage {
                channel: ChannelType::Email,
                to: notice.email.clone(),
                subject: "Your password reset code".to_string(),
                body: format!(
                    "Hi {}, your password reset code is {}. It expires in {} minutes.",
                    notice.name, notice.code, notice.expires_in_minutes
                ),
                event: kind,
            }],
        }
    }
}

fn first_name(recipient: &Recipient) -> &str {
    recipient
        .name
        .split_whitespace()
        .next()
        .unwrap_or(&recipient.name)
}

fn when(notice: &AppointmentNotice) -> String {
    notice.starts_at.format("%d/%m/%Y %H:%M UTC").to_string()
}

/// One message per channel the recipient accepts and has an address for.
fn fan_out(
    recipient: &Recipient,
    event: EventKind,
    subject: &str,
    body: &str,
) -> Vec<OutboundMessage> {
    recipient
        .preference
        .channels()
        .iter()
        .filter_map(|&channel| {
            let to = match channel {
                ChannelType::Email => recipient.email.clone(),
                ChannelType::Push => recipient.customer_id.map(|id| id.to_string()),
            };
            if to.is_none() {
                tracing::debug!(
                    channel = %channel,
                    event = %event,
                    recipient = %recipient.name,
                    "Recipient has no address for channel, skipping"
                );
            }
            to.map(|to| OutboundMessage {
                channel,
                to,
                subject: subject.to_string(),
                body: body.to_string(),
                event,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use salon_common::types::{
        BirthdayGreeting, NotificationPreference, PasswordResetNotice, RenderedMessage,
    };

    use crate::sender::SendError;

    /// Records deliveries; fails the first `failures` sends.
    struct RecordingSender {
        channel: ChannelType,
        failures: Mutex<u32>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl RecordingSender {
        fn new(channel: ChannelType, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                channel,
                failures: Mutex::new(failures),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        fn channel(&self) -> ChannelType {
            self.channel
        }

        async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(SendError::Rejected {
                        status: 503,
                        body: "try later".to_string(),
                    });
                }
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn recipient(preference: NotificationPreference) -> Recipient {
        Recipient {
            customer_id: Some(Uuid::nil()),
            name: "Ana Souza".to_string(),
            email: Some("ana@example.com".to_string()),
            phone: None,
            preference,
        }
    }

    fn birthday(preference: NotificationPreference) -> DomainEvent {
        DomainEvent::Birthday(BirthdayGreeting {
            recipient: recipient(preference),
            age: 30,
            message: RenderedMessage {
                title: "Happy birthday, Ana!".to_string(),
                body: "Enjoy your day".to_string(),
            },
        })
    }

    fn dispatcher() -> NotificationDispatcher {
        NotificationDispatcher::new(JobRunner::default(), "Studio Bela")
    }

    #[test]
    fn test_compose_respects_preference() {
        let d = dispatcher();
        assert_eq!(d.compose(&birthday(NotificationPreference::All)).len(), 2);
        assert_eq!(d.compose(&birthday(NotificationPreference::Push)).len(), 1);
        assert!(d.compose(&birthday(NotificationPreference::None)).is_empty());

        let push = &d.compose(&birthday(NotificationPreference::Push))[0];
        assert_eq!(push.channel, ChannelType::Push);
        assert_eq!(push.to, Uuid::nil().to_string());
        assert_eq!(push.subject, "Happy birthday, Ana!");
    }

    #[test]
    fn test_compose_skips_missing_address() {
        let d = dispatcher();
        let mut greeting_recipient = recipient(NotificationPreference::Email);
        greeting_recipient.email = None;
        let event = DomainEvent::Birthday(BirthdayGreeting {
            recipient: greeting_recipient,
            age: 30,
            message: RenderedMessage {
                title: "t".to_string(),
                body: "b".to_string(),
            },
        });
        assert!(d.compose(&event).is_empty());
    }

    #[test]
    fn test_compose_appointment_confirmed() {
        let d = dispatcher();
        let event = DomainEvent::AppointmentConfirmed(AppointmentNotice {
            appointment_id: Uuid::new_v4(),
            recipient: recipient(NotificationPreference::Email),
            service_name: "Manicure".to_string(),
            professional_name: Some("Carla".to_string()),
            starts_at: Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap(),
            cancellation_reason: None,
        });
        let messages = d.compose(&event);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "Appointment confirmed: Manicure");
        assert_eq!(
            messages[0].body,
            "Hi Ana, your Manicure with Carla on 01/06/2024 14:30 UTC is confirmed. See you at Studio Bela!"
        );
    }

    #[test]
    fn test_password_reset_ignores_preference() {
        let d = dispatcher();
        let event = DomainEvent::PasswordResetRequested(PasswordResetNotice {
            user_id: Uuid::nil(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            code: "042137".to_string(),
            expires_in_minutes: 15,
        });
        let messages = d.compose(&event);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, EventKind::PasswordResetRequested);
        assert!(messages[0].body.contains("042137"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_event_is_delivered_with_retry() {
        let runner = JobRunner::default();
        let email = RecordingSender::new(ChannelType::Email, 1);
        let push = RecordingSender::new(ChannelType::Push, 0);
        let dispatcher = Arc::new(
            NotificationDispatcher::new(runner.clone(), "Studio Bela")
                .with_sender(email.clone())
                .with_sender(push.clone()),
        );

        let bus = EventBus::default();
        let _listener = dispatcher.spawn(&bus);
        bus.emit(birthday(NotificationPreference::All)).unwrap();

        // Give the listener a turn to enqueue before draining.
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.drain().await;

        assert_eq!(email.sent.lock().unwrap().len(), 1);
        assert_eq!(push.sent.lock().unwrap().len(), 1);
        assert_eq!(*email.failures.lock().unwrap(), 0);
    }
}
