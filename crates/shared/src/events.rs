//! Events a chat view reports to whoever renders it.

use serde::{Deserialize, Serialize};

use crate::model::{Message, Session, SessionId};

/// Progress of a chat view, one event per observable step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// First send in a fresh view created the session
    SessionCreated { session: Session },
    /// A user or assistant message is durable
    MessagePersisted { message: Message },
    /// The streamed reply grew; `draft` is the whole reply so far
    DraftUpdated { session_id: SessionId, draft: String },
    /// The assistant reply was committed
    TurnCompleted { session_id: SessionId },
    /// The turn stopped on an error; nothing was committed for the reply
    TurnFailed { session_id: SessionId, error: String },
    /// The view moved on before the reply finished
    TurnCancelled { session_id: SessionId },
}

impl ChatEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            ChatEvent::SessionCreated { session } => session.id,
            ChatEvent::MessagePersisted { message } => message.session_id,
            ChatEvent::DraftUpdated { session_id, .. } => *session_id,
            ChatEvent::TurnCompleted { session_id } => *session_id,
            ChatEvent::TurnFailed { session_id, .. } => *session_id,
            ChatEvent::TurnCancelled { session_id } => *session_id,
        }
    }

    /// Whether this event ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::TurnCompleted { .. }
                | ChatEvent::TurnFailed { .. }
                | ChatEvent::TurnCancelled { .. }
        )
    }
}
