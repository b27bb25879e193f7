//! Lifecycle events published by a log.

use arbor_core::{Message, MessageId, Signature};

/// Notifications for subscribers of a [`GossipLog`](crate::GossipLog).
///
/// Delivery is at-least-once: [`GossipLog::replay`](crate::GossipLog::replay)
/// publishes every committed message again, so subscribers must tolerate
/// repeats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEvent {
    /// A message was committed and its handler succeeded.
    Message {
        id: MessageId,
        signature: Option<Signature>,
        message: Message,
    },

    /// A message was committed but its handler rejected it.
    Rejected { id: MessageId, reason: String },

    /// A received message is held until these parents arrive.
    MissingParents { child: MessageId, parents: Vec<MessageId> },
}

impl LogEvent {
    /// Identifier the event is about.
    pub fn id(&self) -> MessageId {
        match self {
            LogEvent::Message { id, .. } | LogEvent::Rejected { id, .. } => *id,
            LogEvent::MissingParents { child, .. } => *child,
        }
    }
}
