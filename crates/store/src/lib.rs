//! Local data store for profiles, chat sessions and messages.
//!
//! Three keyed collections with store-assigned, monotonically increasing ids
//! and two secondary lookups (profile -> sessions, session -> messages).
//! Every operation completes before it returns: once an append has been
//! awaited, the message is durable.
//!
//! Referential rules shared by every implementation:
//! - a session can only be created for an existing profile
//! - a message can only be appended to an existing session
//! - deleting a profile removes its sessions and their messages
//! - deleting an unknown profile is a no-op

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use shared::{
    Message, NewProfile, Profile, ProfileId, Role, Session, SessionId, StoreError,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_profile(&self, data: NewProfile) -> StoreResult<Profile>;

    async fn get_profile(&self, id: ProfileId) -> StoreResult<Option<Profile>>;

    /// All profiles. Callers must not rely on the order.
    async fn list_profiles(&self) -> StoreResult<Vec<Profile>>;

    /// Remove a profile together with its sessions and messages
    async fn delete_profile(&self, id: ProfileId) -> StoreResult<()>;

    /// New session stamped with the current time
    async fn create_session(&self, profile_id: ProfileId) -> StoreResult<Session>;

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// Sessions of one profile in creation order
    async fn list_sessions_for_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<Session>>;

    async fn append_message(
        &self,
        session_id: SessionId,
        role: Role,
        content: String,
    ) -> StoreResult<Message>;

    /// Messages of one session, ascending by id
    async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<Message>>;
}
