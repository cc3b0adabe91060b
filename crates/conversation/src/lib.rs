//! Chat core of Cosmic Chat.
//!
//! - [`controller`]: one open chat view, its session state and the turn in flight
//! - [`reconciler`]: folds a streamed reply into a draft and commits it
//! - [`transcript`]: what a view shows, rebuilt from the store
//! - [`profiles`]: profile registration against the backend
//! - [`prompts`]: greeting and suggestion text

pub mod controller;
pub mod profiles;
pub mod prompts;
pub mod reconciler;
pub mod transcript;

pub use controller::{ChatOptions, ChatView, SessionState};
pub use profiles::register_profile;
pub use reconciler::{apply_fragment, StreamOutcome, StreamReconciler};
pub use transcript::{assemble, EntryOrigin, Transcript, TranscriptEntry};

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use futures::channel::mpsc;
    use futures::stream::{self, StreamExt};
    use parking_lot::Mutex;
    use providers::{CompletionService, FragmentStream};
    use shared::agent_api::ChatStreamRequest;
    use shared::{
        Message, NetworkError, NewProfile, Profile, ProfileId, Role, Session, SessionId,
        StoreError,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use store::{ChatStore, MemoryStore, StoreResult};

    pub fn new_profile(name: &str) -> NewProfile {
        NewProfile {
            name: name.to_string(),
            birth_date_time: Utc.with_ymd_and_hms(1990, 7, 14, 21, 30, 0).unwrap(),
            birth_place: "Pune, India".to_string(),
            latitude: 18.5204,
            longitude: 73.8567,
            remote_session_token: Some("remote-token".to_string()),
        }
    }

    pub async fn seeded_store() -> (Arc<MemoryStore>, Profile) {
        let store = Arc::new(MemoryStore::new());
        let profile = store.create_profile(new_profile("P1")).await.unwrap();
        (store, profile)
    }

    pub type Fragment = Result<String, NetworkError>;

    /// One scripted reply of [`ScriptedCompletion`]
    pub enum Script {
        Fragments(Vec<Fragment>),
        /// Fragments pushed by the test while the turn runs
        Channel(mpsc::UnboundedReceiver<Fragment>),
        OpenError(NetworkError),
    }

    impl Script {
        pub fn fragments(parts: &[&str]) -> Self {
            Script::Fragments(parts.iter().map(|p| Ok(p.to_string())).collect())
        }

        pub fn channel() -> (Self, mpsc::UnboundedSender<Fragment>) {
            let (tx, rx) = mpsc::unbounded();
            (Script::Channel(rx), tx)
        }
    }

    /// Completion service replaying one script per request
    pub struct ScriptedCompletion {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatStreamRequest>>,
    }

    impl ScriptedCompletion {
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ChatStreamRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn open_stream(
            &self,
            request: ChatStreamRequest,
        ) -> Result<FragmentStream, NetworkError> {
            self.requests.lock().push(request);
            let script = self.scripts.lock().pop_front();
            match script {
                Some(Script::Fragments(items)) => Ok(stream::iter(items).boxed()),
                Some(Script::Channel(rx)) => Ok(rx.boxed()),
                Some(Script::OpenError(e)) => Err(e),
                None => Err(NetworkError::Transport("no scripted reply".to_string())),
            }
        }
    }

    /// Memory store that can be told to reject assistant messages
    pub struct FailingStore {
        inner: Arc<MemoryStore>,
        fail_assistant: AtomicBool,
    }

    impl FailingStore {
        pub fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                fail_assistant: AtomicBool::new(false),
            }
        }

        pub fn fail_assistant_appends(&self, fail: bool) {
            self.fail_assistant.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ChatStore for FailingStore {
        async fn create_profile(&self, data: NewProfile) -> StoreResult<Profile> {
            self.inner.create_profile(data).await
        }

        async fn get_profile(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
            self.inner.get_profile(id).await
        }

        async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
            self.inner.list_profiles().await
        }

        async fn delete_profile(&self, id: ProfileId) -> StoreResult<()> {
            self.inner.delete_profile(id).await
        }

        async fn create_session(&self, profile_id: ProfileId) -> StoreResult<Session> {
            self.inner.create_session(profile_id).await
        }

        async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
            self.inner.get_session(id).await
        }

        async fn list_sessions_for_profile(
            &self,
            profile_id: ProfileId,
        ) -> StoreResult<Vec<Session>> {
            self.inner.list_sessions_for_profile(profile_id).await
        }

        async fn append_message(
            &self,
            session_id: SessionId,
            role: Role,
            content: String,
        ) -> StoreResult<Message> {
            if role == Role::Assistant && self.fail_assistant.load(Ordering::SeqCst) {
                return Err(StoreError::backend("disk full"));
            }
            self.inner.append_message(session_id, role, content).await
        }

        async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<Message>> {
            self.inner.list_messages(session_id).await
        }
    }
}
