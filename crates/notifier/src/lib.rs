//! Notification delivery pipeline.
//!
//! Domain events published on the [`bus::EventBus`] are turned into outbound
//! messages by the [`dispatcher::NotificationDispatcher`], and each message is
//! delivered by a [`sender::NotificationSender`] inside a job on the
//! [`runner::JobRunner`], which bounds concurrency and retries failures.

pub mod bus;
pub mod dispatcher;
pub mod runner;
pub mod sender;
