//! The displayable message list of a chat view.
//!
//! Built from the store on open or session switch. While a reply streams, the
//! last entry is a draft that only lives here; it is never written to the store.

use serde::Serialize;
use shared::agent_api::ChatMessage;
use shared::{Message, MessageId, Role, SessionId, StoreError};
use store::ChatStore;

/// Where a transcript entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Synthetic welcome text of a chat without history
    Greeting,
    /// A committed message
    Stored(MessageId),
    /// Reply still streaming
    Draft,
    /// Partial reply of a failed turn, kept on screen but not persisted
    Unsaved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub origin: EntryOrigin,
}

impl TranscriptEntry {
    pub fn is_draft(&self) -> bool {
        self.origin == EntryOrigin::Draft
    }
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            origin: EntryOrigin::Stored(message.id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Transcript of a chat with nothing stored yet
    pub fn greeting(text: &str) -> Self {
        Self {
            entries: vec![TranscriptEntry {
                role: Role::Assistant,
                content: text.to_string(),
                origin: EntryOrigin::Greeting,
            }],
        }
    }

    /// Stored messages verbatim; no messages at all gives the greeting
    pub fn from_messages(messages: &[Message], greeting: &str) -> Self {
        if messages.is_empty() {
            return Self::greeting(greeting);
        }
        Self {
            entries: messages.iter().map(TranscriptEntry::from).collect(),
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Number of entries other than the greeting
    pub fn conversation_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.origin != EntryOrigin::Greeting)
            .count()
    }

    pub fn push_stored(&mut self, message: &Message) {
        self.entries.push(TranscriptEntry::from(message));
    }

    /// Append the empty placeholder a writing indicator renders from
    pub fn begin_draft(&mut self) {
        self.entries.push(TranscriptEntry {
            role: Role::Assistant,
            content: String::new(),
            origin: EntryOrigin::Draft,
        });
    }

    pub fn draft(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.is_draft())
            .map(|e| e.content.as_str())
    }

    /// Replace the draft's text with the reply accumulated so far
    pub fn update_draft(&mut self, draft: &str) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.is_draft()) {
            entry.content.clear();
            entry.content.push_str(draft);
        }
    }

    /// Swap the draft for the committed reply
    pub fn finish_draft(&mut self, message: &Message) {
        match self.entries.iter_mut().rev().find(|e| e.is_draft()) {
            Some(entry) => *entry = TranscriptEntry::from(message),
            None => self.push_stored(message),
        }
    }

    /// Keep the partial reply visible but mark it as never saved.
    /// A draft that received nothing is removed.
    pub fn abandon_draft(&mut self) {
        let Some(pos) = self.entries.iter().rposition(|e| e.is_draft()) else {
            return;
        };
        if self.entries[pos].content.is_empty() {
            self.entries.remove(pos);
        } else {
            self.entries[pos].origin = EntryOrigin::Unsaved;
        }
    }

    /// Context sent to the backend: the greeting and committed messages only
    pub fn request_history(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| matches!(e.origin, EntryOrigin::Greeting | EntryOrigin::Stored(_)))
            .map(|e| ChatMessage::new(e.role, e.content.clone()))
            .collect()
    }
}

/// Build the transcript for a view.
///
/// `None` (nothing sent yet) and a session without messages both give the
/// greeting alone. The greeting is never written to the store.
pub async fn assemble<S>(
    store: &S,
    session_id: Option<SessionId>,
    greeting: &str,
) -> Result<Transcript, StoreError>
where
    S: ChatStore + ?Sized,
{
    match session_id {
        None => Ok(Transcript::greeting(greeting)),
        Some(id) => {
            let messages = store.list_messages(id).await?;
            tracing::debug!(session_id = %id, messages = messages.len(), "Assembled transcript");
            Ok(Transcript::from_messages(&messages, greeting))
        }
    }
}
