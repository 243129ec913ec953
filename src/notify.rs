use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::directory::Directory;
use crate::model::{Role, UserId};

const CHANNEL_CAPACITY: usize = 256;

/// Failure reported by a notification or audit collaborator.
#[derive(Debug, thiserror::Error)]
#[error("{sink} sink failed: {message}")]
pub struct SinkError {
    pub sink: &'static str,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: &'static str, message: impl Into<String>) -> Self {
        Self {
            sink,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    BookingApproved,
    BookingPending,
    BookingRejected,
    BookingCancelled,
    BookingAutoCancelled,
    RegistrationRequested,
    RegistrationApproved,
    RegistrationRejected,
    RoleChangeRequested,
    RoleChangeApproved,
    RoleChangeRejected,
    ResourceRequestApproved,
    ResourceRequestRejected,
    General,
}

/// A single user, or every active approved member of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    User(UserId),
    Role(Role),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_type: String,
    pub id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub message_type: MessageType,
    pub title: String,
    pub body: String,
    pub related: Option<RelatedEntity>,
}

impl Notification {
    pub fn new(
        recipient: Recipient,
        message_type: MessageType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient,
            message_type,
            title: title.into(),
            body: body.into(),
            related: None,
        }
    }

    pub fn about(mut self, entity_type: &str, id: Ulid) -> Self {
        self.related = Some(RelatedEntity {
            entity_type: entity_type.to_string(),
            id,
        });
        self
    }
}

/// Where the core hands off user-facing messages. Fire-and-forget: the core
/// logs failures and moves on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), SinkError>;
}

/// In-process delivery: one broadcast channel per user. Role recipients are
/// expanded through the directory at send time.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notification>>,
    directory: Arc<dyn Directory>,
}

impl NotifyHub {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            channels: DashMap::new(),
            directory,
        }
    }

    /// Subscribe to a user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop a user's channel (e.g. account removed).
    pub fn remove(&self, user_id: &UserId) {
        self.channels.remove(user_id);
    }

    /// Deliver to one user. No-op if nobody is listening.
    fn deliver(&self, user_id: &UserId, notification: &Notification) {
        if let Some(sender) = self.channels.get(user_id) {
            let _ = sender.send(notification.clone());
        }
    }
}

#[async_trait]
impl NotificationSink for NotifyHub {
    async fn notify(&self, notification: Notification) -> Result<(), SinkError> {
        match notification.recipient {
            Recipient::User(id) => self.deliver(&id, &notification),
            Recipient::Role(role) => {
                for id in self.directory.members(role) {
                    self.deliver(&id, &notification);
                }
            }
        }
        Ok(())
    }
}
