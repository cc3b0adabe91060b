//! In-process store with the same semantics as the SQLite one.
//!
//! Nothing survives the process. Used where a disposable store is wanted,
//! chiefly tests of the chat controller.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use shared::{
    Message, MessageId, NewProfile, Profile, ProfileId, Role, Session, SessionId, StoreError,
};

use crate::{ChatStore, StoreResult};

#[derive(Default)]
struct Collections {
    profiles: BTreeMap<ProfileId, Profile>,
    sessions: BTreeMap<SessionId, Session>,
    messages: BTreeMap<MessageId, Message>,
    // Secondary indexes, ids in insertion (and so ascending) order
    sessions_by_profile: BTreeMap<ProfileId, Vec<SessionId>>,
    messages_by_session: BTreeMap<SessionId, Vec<MessageId>>,
    // Last ids handed out; never decremented so ids are not reused
    last_profile: i64,
    last_session: i64,
    last_message: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_profile(&self, data: NewProfile) -> StoreResult<Profile> {
        let mut inner = self.inner.write();
        inner.last_profile += 1;
        let profile = data.into_profile(ProfileId(inner.last_profile));
        inner.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn get_profile(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
        Ok(self.inner.read().profiles.get(&id).cloned())
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        Ok(self.inner.read().profiles.values().cloned().collect())
    }

    async fn delete_profile(&self, id: ProfileId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.profiles.remove(&id).is_none() {
            return Ok(());
        }
        let owned = inner.sessions_by_profile.remove(&id).unwrap_or_default();
        for session_id in owned {
            inner.sessions.remove(&session_id);
            let message_ids = inner
                .messages_by_session
                .remove(&session_id)
                .unwrap_or_default();
            for message_id in message_ids {
                inner.messages.remove(&message_id);
            }
        }
        Ok(())
    }

    async fn create_session(&self, profile_id: ProfileId) -> StoreResult<Session> {
        let mut inner = self.inner.write();
        if !inner.profiles.contains_key(&profile_id) {
            return Err(StoreError::ProfileNotFound(profile_id));
        }
        inner.last_session += 1;
        let session = Session {
            id: SessionId(inner.last_session),
            profile_id,
            created_at: Utc::now(),
        };
        inner.sessions.insert(session.id, session.clone());
        inner
            .sessions_by_profile
            .entry(profile_id)
            .or_default()
            .push(session.id);
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.inner.read().sessions.get(&id).cloned())
    }

    async fn list_sessions_for_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<Session>> {
        let inner = self.inner.read();
        Ok(inner
            .sessions_by_profile
            .get(&profile_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect())
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: String,
    ) -> StoreResult<Message> {
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&session_id) {
            return Err(StoreError::SessionNotFound(session_id));
        }
        inner.last_message += 1;
        let message = Message {
            id: MessageId(inner.last_message),
            session_id,
            role,
            content,
            timestamp: Utc::now(),
        };
        inner.messages.insert(message.id, message.clone());
        inner
            .messages_by_session
            .entry(session_id)
            .or_default()
            .push(message.id);
        Ok(message)
    }

    async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read();
        Ok(inner
            .messages_by_session
            .get(&session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }
}
