//! Fire-and-forget lifecycle event notifications.
//!
//! Every notification failure is caught and logged at the call site; the
//! operation being reported on never fails or rolls back because of it.

use async_trait::async_trait;
use snafu::Snafu;
use vol_port::transport::ResourceKind;

/// All errors that can be returned by a notifier.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NotifyError {
    /// The event bus rejected or dropped the message.
    #[snafu(display("Failed to publish to the event bus: {}", reason))]
    Publish { reason: String },
}

/// A lifecycle event of a resource: `<operation>.<phase>`,
/// eg `volume.migrate.start`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    resource: ResourceKind,
    id: String,
    event: String,
}

impl Notification {
    /// Build a volume notification with the given event suffix.
    pub fn volume(id: impl ToString, event: impl Into<String>) -> Self {
        Self {
            resource: ResourceKind::Volume,
            id: id.to_string(),
            event: event.into(),
        }
    }
    /// The kind of resource being reported on.
    pub fn resource(&self) -> ResourceKind {
        self.resource
    }
    /// The resource identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
    /// The event suffix.
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Publisher of lifecycle events to an external event bus.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Publish one event.
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier which logs the events it would publish. Stands in whenever no
/// event bus is deployed.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {}

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            resource = %notification.resource(),
            id = notification.id(),
            event = notification.event(),
            "Lifecycle event"
        );
        Ok(())
    }
}
