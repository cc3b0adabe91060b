//! Per-view chat controller.
//!
//! A [`ChatView`] owns the state of one open chat: which session it writes to,
//! the transcript on screen, and the single turn that may be in flight. A turn
//! persists the user message, streams the reply into a draft and commits the
//! reply once the stream closes cleanly.

use parking_lot::Mutex;
use providers::CompletionService;
use shared::agent_api::{BirthDetailPayload, ChatStreamRequest};
use shared::events::ChatEvent;
use shared::settings::{ChatSettings, DEFAULT_GREETING};
use shared::{
    ChatError, Message, Profile, ProfileId, Role, Session, SessionId, StoreError, ValidationError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::ChatStore;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::prompts::conversation_caption;
use crate::reconciler::{commit, StreamOutcome, StreamReconciler};
use crate::transcript::{assemble, Transcript};

/// Which session a view writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet; the view shows the greeting
    NoSession,
    /// First send is creating the session
    PendingCreation,
    Active(SessionId),
}

impl SessionState {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionState::Active(id) => Some(*id),
            _ => None,
        }
    }
}

/// Knobs for a chat view
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub greeting: String,
    /// Longest wait for the next reply fragment; `None` waits forever
    pub fragment_timeout: Option<Duration>,
    /// Receives every [`ChatEvent`] of the view
    pub events: Option<UnboundedSender<ChatEvent>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            fragment_timeout: Some(Duration::from_secs(60)),
            events: None,
        }
    }
}

impl ChatOptions {
    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            greeting: settings.greeting.clone(),
            fragment_timeout: settings.fragment_timeout(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

struct ViewState {
    session: SessionState,
    transcript: Transcript,
    /// Cancels the turn in flight, if any
    turn: Option<CancellationToken>,
    /// Bumped whenever the view moves away from its current session
    generation: u64,
}

/// Clears the busy flag on every exit path of a send
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChatView {
    id: Uuid,
    store: Arc<dyn ChatStore>,
    completion: Arc<dyn CompletionService>,
    profile: Profile,
    greeting: String,
    reconciler: StreamReconciler,
    busy: AtomicBool,
    state: Mutex<ViewState>,
    closed: CancellationToken,
    events: Option<UnboundedSender<ChatEvent>>,
}

impl ChatView {
    /// Open a chat for `profile_id`.
    ///
    /// A `chat_id` that exists and belongs to the profile makes the view active
    /// with the stored transcript. Anything else starts a fresh chat.
    pub async fn open(
        store: Arc<dyn ChatStore>,
        completion: Arc<dyn CompletionService>,
        profile_id: ProfileId,
        chat_id: Option<SessionId>,
        options: ChatOptions,
    ) -> Result<Self, ChatError> {
        let profile = store
            .get_profile(profile_id)
            .await?
            .ok_or(StoreError::ProfileNotFound(profile_id))?;

        let session = match chat_id {
            Some(id) => Self::resolve_session(&*store, profile_id, id).await?,
            None => None,
        };
        let transcript = assemble(&*store, session, &options.greeting).await?;
        let state = match session {
            Some(id) => SessionState::Active(id),
            None => SessionState::NoSession,
        };

        let view = Self {
            id: Uuid::new_v4(),
            store,
            completion,
            profile,
            greeting: options.greeting,
            reconciler: StreamReconciler::new(options.fragment_timeout),
            busy: AtomicBool::new(false),
            state: Mutex::new(ViewState {
                session: state,
                transcript,
                turn: None,
                generation: 0,
            }),
            closed: CancellationToken::new(),
            events: options.events,
        };
        tracing::info!(view = %view.id, profile_id = %profile_id, state = ?state, "Chat view opened");
        Ok(view)
    }

    /// The session if it exists and belongs to the profile
    async fn resolve_session(
        store: &dyn ChatStore,
        profile_id: ProfileId,
        chat_id: SessionId,
    ) -> Result<Option<SessionId>, StoreError> {
        match store.get_session(chat_id).await? {
            Some(session) if session.profile_id == profile_id => Ok(Some(session.id)),
            Some(_) => {
                tracing::warn!(session_id = %chat_id, profile_id = %profile_id, "Session belongs to another profile");
                Ok(None)
            }
            None => {
                tracing::warn!(session_id = %chat_id, "Unknown session requested");
                Ok(None)
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().session
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Snapshot of what the view shows, including any draft
    pub fn transcript(&self) -> Transcript {
        self.state.lock().transcript.clone()
    }

    /// Header caption ("New conversation", "3 messages")
    pub fn caption(&self) -> String {
        conversation_caption(self.state.lock().transcript.conversation_len())
    }

    /// Sessions of the profile, newest first
    pub async fn history(&self) -> Result<Vec<Session>, ChatError> {
        let mut sessions = self.store.list_sessions_for_profile(self.profile.id).await?;
        sessions.reverse();
        Ok(sessions)
    }

    /// Run one turn: persist `text`, stream the reply and commit it.
    ///
    /// Rejected with [`ChatError::Busy`] while another turn of this view is
    /// running. Returns the committed assistant message.
    pub async fn send(&self, text: &str) -> Result<Message, ChatError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let _busy = BusyGuard::acquire(&self.busy).ok_or(ChatError::Busy)?;

        let (token, generation) = {
            let mut st = self.state.lock();
            if self.closed.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            let token = self.closed.child_token();
            st.turn = Some(token.clone());
            (token, st.generation)
        };

        let result = self.run_turn(text, &token, generation).await;

        let mut st = self.state.lock();
        if st.generation == generation {
            st.turn = None;
        }
        result
    }

    async fn run_turn(
        &self,
        text: &str,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<Message, ChatError> {
        let session_id = self.ensure_session(generation).await?;
        if token.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        // The user message is durable before anything is requested
        let user_message = self
            .store
            .append_message(session_id, Role::User, text.to_string())
            .await?;
        tracing::debug!(view = %self.id, session_id = %session_id, message_id = %user_message.id, "User message stored");
        self.emit(ChatEvent::MessagePersisted {
            message: user_message.clone(),
        });

        let messages = {
            let mut st = self.state.lock();
            if st.generation != generation {
                drop(st);
                return Err(self.cancelled(session_id));
            }
            st.transcript.push_stored(&user_message);
            st.transcript.begin_draft();
            st.transcript.request_history()
        };
        let request = ChatStreamRequest {
            messages,
            birth_detail: BirthDetailPayload::from(&self.profile),
            session_id: self.profile.remote_session_token.clone(),
        };

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(self.cancelled(session_id)),
            opened = self.completion.open_stream(request) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                self.fail_turn(generation, session_id, &e);
                return Err(e.into());
            }
        };

        let outcome = self
            .reconciler
            .consume(stream, token, |draft| self.show_draft(generation, session_id, draft))
            .await;

        match outcome {
            StreamOutcome::Completed(_) if token.is_cancelled() => Err(self.cancelled(session_id)),
            StreamOutcome::Completed(reply) => {
                let message = match commit(&*self.store, session_id, reply).await {
                    Ok(message) => message,
                    Err(e) => {
                        self.fail_turn(generation, session_id, &e);
                        return Err(e.into());
                    }
                };
                {
                    let mut st = self.state.lock();
                    if st.generation == generation {
                        st.transcript.finish_draft(&message);
                    }
                }
                tracing::info!(view = %self.id, session_id = %session_id, message_id = %message.id, "Reply committed");
                self.emit(ChatEvent::MessagePersisted {
                    message: message.clone(),
                });
                self.emit(ChatEvent::TurnCompleted { session_id });
                Ok(message)
            }
            StreamOutcome::Cancelled { .. } => Err(self.cancelled(session_id)),
            StreamOutcome::Failed { error, .. } => {
                self.fail_turn(generation, session_id, &error);
                Err(error.into())
            }
        }
    }

    /// Session id for this turn, creating the session on the first send
    async fn ensure_session(&self, generation: u64) -> Result<SessionId, ChatError> {
        {
            let mut st = self.state.lock();
            if st.generation != generation {
                return Err(ChatError::Cancelled);
            }
            if let SessionState::Active(id) = st.session {
                return Ok(id);
            }
            st.session = SessionState::PendingCreation;
        }

        let created = self.store.create_session(self.profile.id).await;

        let mut st = self.state.lock();
        match created {
            Ok(session) => {
                let current = st.generation == generation;
                if current {
                    st.session = SessionState::Active(session.id);
                }
                drop(st);
                tracing::info!(view = %self.id, session_id = %session.id, profile_id = %self.profile.id, "Session created");
                let id = session.id;
                self.emit(ChatEvent::SessionCreated { session });
                if current {
                    Ok(id)
                } else {
                    Err(ChatError::Cancelled)
                }
            }
            Err(e) => {
                if st.generation == generation {
                    st.session = SessionState::NoSession;
                }
                Err(e.into())
            }
        }
    }

    fn show_draft(&self, generation: u64, session_id: SessionId, draft: &str) {
        {
            let mut st = self.state.lock();
            if st.generation != generation {
                return;
            }
            st.transcript.update_draft(draft);
        }
        self.emit(ChatEvent::DraftUpdated {
            session_id,
            draft: draft.to_string(),
        });
    }

    fn fail_turn(&self, generation: u64, session_id: SessionId, error: &dyn std::fmt::Display) {
        {
            let mut st = self.state.lock();
            if st.generation == generation {
                st.transcript.abandon_draft();
            }
        }
        tracing::warn!(view = %self.id, session_id = %session_id, error = %error, "Turn failed");
        self.emit(ChatEvent::TurnFailed {
            session_id,
            error: error.to_string(),
        });
    }

    fn cancelled(&self, session_id: SessionId) -> ChatError {
        tracing::debug!(view = %self.id, session_id = %session_id, "Turn cancelled");
        self.emit(ChatEvent::TurnCancelled { session_id });
        ChatError::Cancelled
    }

    /// Stop the running turn and invalidate everything it may still report
    fn leave_current(&self, st: &mut ViewState) {
        if let Some(turn) = st.turn.take() {
            turn.cancel();
        }
        st.generation += 1;
    }

    /// Start over with a fresh chat. Stored data is untouched.
    pub fn new_chat(&self) {
        let mut st = self.state.lock();
        self.leave_current(&mut st);
        st.session = SessionState::NoSession;
        st.transcript = Transcript::greeting(&self.greeting);
        tracing::debug!(view = %self.id, "New chat");
    }

    /// Show another session of the same profile.
    ///
    /// The running turn is cancelled and the transcript is rebuilt from the
    /// store. An unknown session, or one of another profile, leaves the view
    /// on a fresh chat and reports [`StoreError::SessionNotFound`].
    pub async fn switch_session(&self, chat_id: SessionId) -> Result<(), ChatError> {
        let generation = {
            let mut st = self.state.lock();
            self.leave_current(&mut st);
            st.session = SessionState::NoSession;
            st.transcript = Transcript::greeting(&self.greeting);
            st.generation
        };

        let session = Self::resolve_session(&*self.store, self.profile.id, chat_id).await?;
        let transcript = assemble(&*self.store, session, &self.greeting).await?;

        let mut st = self.state.lock();
        if st.generation != generation {
            // Another switch or new chat won
            return Err(ChatError::Cancelled);
        }
        st.transcript = transcript;
        match session {
            Some(id) => {
                st.session = SessionState::Active(id);
                tracing::debug!(view = %self.id, session_id = %id, "Switched session");
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(chat_id).into()),
        }
    }

    /// Leave the view. A running turn stops without further writes and later
    /// sends are rejected with [`ChatError::Cancelled`].
    pub fn close(&self) {
        let mut st = self.state.lock();
        self.closed.cancel();
        self.leave_current(&mut st);
        tracing::debug!(view = %self.id, "Chat view closed");
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is rendering
            let _ = tx.send(event);
        }
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seeded_store, FailingStore, Script, ScriptedCompletion};
    use crate::transcript::EntryOrigin;
    use shared::NetworkError;
    use store::MemoryStore;

    async fn open_view(
        store: Arc<dyn ChatStore>,
        completion: Arc<ScriptedCompletion>,
        profile_id: ProfileId,
        chat_id: Option<SessionId>,
    ) -> ChatView {
        ChatView::open(store, completion, profile_id, chat_id, ChatOptions::default())
            .await
            .unwrap()
    }

    fn pairs(messages: &[Message]) -> Vec<(Role, String)> {
        messages.iter().map(|m| (m.role, m.content.clone())).collect()
    }

    #[tokio::test]
    async fn test_first_send_creates_session_and_commits_reply() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![Script::fragments(&["Wel", "come!"])]));
        let view = open_view(store.clone(), completion.clone(), profile.id, None).await;
        assert_eq!(view.state(), SessionState::NoSession);

        let reply = view.send("Hello").await.unwrap();

        let SessionState::Active(session_id) = view.state() else {
            panic!("view should be active");
        };
        let session = store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.profile_id, profile.id);
        assert_eq!(reply.content, "Welcome!");
        assert_eq!(
            pairs(&store.list_messages(session_id).await.unwrap()),
            vec![
                (Role::User, "Hello".to_string()),
                (Role::Assistant, "Welcome!".to_string())
            ]
        );
        assert!(!view.is_busy());
        assert_eq!(view.caption(), "2 messages");
    }

    #[tokio::test]
    async fn test_second_send_reuses_session() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Script::fragments(&["First"]),
            Script::fragments(&["Second"]),
        ]));
        let view = open_view(store.clone(), completion.clone(), profile.id, None).await;

        view.send("one").await.unwrap();
        view.send("two").await.unwrap();

        let sessions = store.list_sessions_for_profile(profile.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(store.list_messages(sessions[0].id).await.unwrap().len(), 4);

        // Second request carries the greeting and the committed first turn
        let requests = completion.requests();
        let contents: Vec<&str> = requests[1]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec![DEFAULT_GREETING, "one", "First", "two"]);
        assert_eq!(requests[1].session_id.as_deref(), Some("remote-token"));
        assert_eq!(requests[1].birth_detail.name, profile.name);
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_any_write() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![]));
        let view = open_view(store.clone(), completion.clone(), profile.id, None).await;

        let err = view.send("   ").await.unwrap_err();

        assert_eq!(err, ChatError::Validation(ValidationError::EmptyMessage));
        assert_eq!(view.state(), SessionState::NoSession);
        assert!(store.list_sessions_for_profile(profile.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_busy_is_rejected() {
        let (store, profile) = seeded_store().await;
        let (script, tx) = Script::channel();
        let completion = Arc::new(ScriptedCompletion::new(vec![script]));
        let view = Arc::new(open_view(store.clone(), completion.clone(), profile.id, None).await);

        let running = tokio::spawn({
            let view = view.clone();
            async move { view.send("Hello").await }
        });
        tx.unbounded_send(Ok("Wel".to_string())).unwrap();
        wait_for_draft(&view, "Wel").await;

        assert!(view.is_busy());
        assert_eq!(view.send("Again").await.unwrap_err(), ChatError::Busy);

        tx.unbounded_send(Ok("come!".to_string())).unwrap();
        drop(tx);
        let reply = running.await.unwrap().unwrap();
        assert_eq!(reply.content, "Welcome!");
        assert!(!view.is_busy());

        let session_id = view.state().session_id().unwrap();
        // The rejected send left no trace
        assert_eq!(store.list_messages(session_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_error_persists_no_reply() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Script::Fragments(vec![
                Ok("The stars".to_string()),
                Err(NetworkError::Transport("reset".to_string())),
            ]),
            Script::fragments(&["Recovered"]),
        ]));
        let view = open_view(store.clone(), completion.clone(), profile.id, None).await;

        let err = view.send("Hello").await.unwrap_err();

        assert!(matches!(err, ChatError::Network(NetworkError::Transport(_))));
        assert!(!view.is_busy());
        let session_id = view.state().session_id().unwrap();
        assert_eq!(
            pairs(&store.list_messages(session_id).await.unwrap()),
            vec![(Role::User, "Hello".to_string())]
        );
        let last = view.transcript().last().cloned().unwrap();
        assert_eq!(last.origin, EntryOrigin::Unsaved);
        assert_eq!(last.content, "The stars");

        // The next turn proceeds normally and never sends the partial reply
        view.send("Again").await.unwrap();
        let history = &completion.requests()[1].messages;
        assert!(history.iter().all(|m| m.content != "The stars"));
        assert_eq!(store.list_messages(session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_open_failure_keeps_user_message() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![Script::OpenError(
            NetworkError::NoBody,
        )]));
        let view = open_view(store.clone(), completion, profile.id, None).await;

        assert_eq!(
            view.send("Hello").await.unwrap_err(),
            ChatError::Network(NetworkError::NoBody)
        );

        let session_id = view.state().session_id().unwrap();
        assert_eq!(store.list_messages(session_id).await.unwrap().len(), 1);
        assert!(view.transcript().draft().is_none());
    }

    #[tokio::test]
    async fn test_switch_cancels_turn_and_drops_stale_draft() {
        let (store, profile) = seeded_store().await;
        let other = store.create_session(profile.id).await.unwrap();
        store
            .append_message(other.id, Role::User, "Earlier question".to_string())
            .await
            .unwrap();
        let (script, tx) = Script::channel();
        let completion = Arc::new(ScriptedCompletion::new(vec![script]));
        let view = Arc::new(open_view(store.clone(), completion, profile.id, None).await);

        let running = tokio::spawn({
            let view = view.clone();
            async move { view.send("Hello").await }
        });
        tx.unbounded_send(Ok("Half a rep".to_string())).unwrap();
        wait_for_draft(&view, "Half a rep").await;
        let abandoned = view.state().session_id().unwrap();

        view.switch_session(other.id).await.unwrap();
        tx.unbounded_send(Ok("ly".to_string())).ok();
        drop(tx);

        assert_eq!(running.await.unwrap().unwrap_err(), ChatError::Cancelled);
        assert!(!view.is_busy());
        assert_eq!(view.state(), SessionState::Active(other.id));
        let transcript = view.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].content, "Earlier question");
        // Only the user message of the abandoned turn was written
        assert_eq!(
            pairs(&store.list_messages(abandoned).await.unwrap()),
            vec![(Role::User, "Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_close_mid_reply_stops_turn() {
        let (store, profile) = seeded_store().await;
        let (script, tx) = Script::channel();
        let completion = Arc::new(ScriptedCompletion::new(vec![script]));
        let view = Arc::new(open_view(store.clone(), completion, profile.id, None).await);

        let running = tokio::spawn({
            let view = view.clone();
            async move { view.send("Hello").await }
        });
        tx.unbounded_send(Ok("The moon".to_string())).unwrap();
        wait_for_draft(&view, "The moon").await;
        let session_id = view.state().session_id().unwrap();

        view.close();
        tx.unbounded_send(Ok(" is waxing".to_string())).ok();
        drop(tx);

        assert_eq!(running.await.unwrap().unwrap_err(), ChatError::Cancelled);
        assert!(!view.is_busy());
        assert_eq!(
            pairs(&store.list_messages(session_id).await.unwrap()),
            vec![(Role::User, "Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_new_chat_mid_reply_stops_turn() {
        let (store, profile) = seeded_store().await;
        let (script, tx) = Script::channel();
        let completion = Arc::new(ScriptedCompletion::new(vec![script]));
        let view = Arc::new(open_view(store.clone(), completion, profile.id, None).await);

        let running = tokio::spawn({
            let view = view.clone();
            async move { view.send("Hello").await }
        });
        tx.unbounded_send(Ok("Saturn returns".to_string())).unwrap();
        wait_for_draft(&view, "Saturn returns").await;
        let session_id = view.state().session_id().unwrap();

        view.new_chat();
        tx.unbounded_send(Ok(" at 29".to_string())).ok();
        drop(tx);

        assert_eq!(running.await.unwrap().unwrap_err(), ChatError::Cancelled);
        assert!(!view.is_busy());
        assert_eq!(view.state(), SessionState::NoSession);
        assert_eq!(view.transcript(), Transcript::greeting(DEFAULT_GREETING));
        assert_eq!(
            pairs(&store.list_messages(session_id).await.unwrap()),
            vec![(Role::User, "Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_new_chat_resets_to_greeting() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![
            Script::fragments(&["One"]),
            Script::fragments(&["Two"]),
        ]));
        let view = open_view(store.clone(), completion, profile.id, None).await;
        view.send("first chat").await.unwrap();
        let first = view.state().session_id().unwrap();

        view.new_chat();
        assert_eq!(view.state(), SessionState::NoSession);
        assert_eq!(view.transcript(), Transcript::greeting(DEFAULT_GREETING));
        assert_eq!(view.caption(), "New conversation");

        view.send("second chat").await.unwrap();
        let second = view.state().session_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(store.list_messages(first).await.unwrap().len(), 2);

        let history = view.history().await.unwrap();
        assert_eq!(
            history.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![second, first]
        );
    }

    #[tokio::test]
    async fn test_open_existing_chat_shows_stored_messages() {
        let (store, profile) = seeded_store().await;
        let session = store.create_session(profile.id).await.unwrap();
        store
            .append_message(session.id, Role::User, "Hello".to_string())
            .await
            .unwrap();
        let completion = Arc::new(ScriptedCompletion::new(vec![]));

        let view = open_view(store.clone(), completion, profile.id, Some(session.id)).await;

        assert_eq!(view.state(), SessionState::Active(session.id));
        assert_eq!(view.transcript().entries()[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_open_foreign_or_unknown_chat_starts_fresh() {
        let (store, profile) = seeded_store().await;
        let stranger = store
            .create_profile(crate::test_support::new_profile("Stranger"))
            .await
            .unwrap();
        let foreign = store.create_session(stranger.id).await.unwrap();
        let completion = Arc::new(ScriptedCompletion::new(vec![]));

        for chat_id in [foreign.id, SessionId(4_040)] {
            let view = open_view(store.clone(), completion.clone(), profile.id, Some(chat_id)).await;
            assert_eq!(view.state(), SessionState::NoSession);
            assert_eq!(view.transcript(), Transcript::greeting(DEFAULT_GREETING));
        }
    }

    #[tokio::test]
    async fn test_open_unknown_profile_fails() {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let completion = Arc::new(ScriptedCompletion::new(vec![]));

        let err = ChatView::open(store, completion, ProfileId(7), None, ChatOptions::default())
            .await
            .err()
            .unwrap();

        assert_eq!(err, ChatError::Storage(StoreError::ProfileNotFound(ProfileId(7))));
    }

    #[tokio::test]
    async fn test_closed_view_rejects_sends() {
        let (store, profile) = seeded_store().await;
        let completion = Arc::new(ScriptedCompletion::new(vec![Script::fragments(&["x"])]));
        let view = open_view(store.clone(), completion, profile.id, None).await;

        view.close();

        assert!(view.is_closed());
        assert_eq!(view.send("Hello").await.unwrap_err(), ChatError::Cancelled);
        assert!(store.list_sessions_for_profile(profile.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reply_commit_keeps_user_message() {
        let (inner, profile) = seeded_store().await;
        let store = Arc::new(FailingStore::new(inner.clone()));
        let completion = Arc::new(ScriptedCompletion::new(vec![Script::fragments(&["Lost"])]));
        let view = open_view(store.clone(), completion, profile.id, None).await;
        store.fail_assistant_appends(true);

        let err = view.send("Hello").await.unwrap_err();

        assert!(matches!(err, ChatError::Storage(StoreError::Backend(_))));
        let session_id = view.state().session_id().unwrap();
        assert_eq!(
            pairs(&inner.list_messages(session_id).await.unwrap()),
            vec![(Role::User, "Hello".to_string())]
        );
        assert!(!view.is_busy());
    }

    #[tokio::test]
    async fn test_events_follow_the_turn() {
        let (store, profile) = seeded_store().await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let completion = Arc::new(ScriptedCompletion::new(vec![Script::fragments(&["Wel", "come!"])]));
        let view = ChatView::open(
            store.clone(),
            completion,
            profile.id,
            None,
            ChatOptions::default().with_events(tx),
        )
        .await
        .unwrap();

        view.send("Hello").await.unwrap();
        drop(view);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                ChatEvent::SessionCreated { .. } => "created".to_string(),
                ChatEvent::MessagePersisted { message } => format!("stored {}", message.role),
                ChatEvent::DraftUpdated { draft, .. } => format!("draft {}", draft),
                ChatEvent::TurnCompleted { .. } => "completed".to_string(),
                other => format!("{:?}", other),
            });
        }
        assert_eq!(
            kinds,
            vec![
                "created",
                "stored user",
                "draft Wel",
                "draft Welcome!",
                "stored assistant",
                "completed"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reply_times_out() {
        let (store, profile) = seeded_store().await;
        let (script, _tx) = Script::channel();
        let completion = Arc::new(ScriptedCompletion::new(vec![script]));
        let options = ChatOptions {
            fragment_timeout: Some(Duration::from_secs(2)),
            ..ChatOptions::default()
        };
        let view = ChatView::open(store.clone(), completion, profile.id, None, options)
            .await
            .unwrap();

        let err = view.send("Hello").await.unwrap_err();

        assert_eq!(
            err,
            ChatError::Network(NetworkError::Timeout(Duration::from_secs(2)))
        );
        let session_id = view.state().session_id().unwrap();
        assert_eq!(store.list_messages(session_id).await.unwrap().len(), 1);
    }

    async fn wait_for_draft(view: &ChatView, expected: &str) {
        for _ in 0..1_000 {
            if view.transcript().draft() == Some(expected) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("draft never reached {:?}", expected);
    }
}
