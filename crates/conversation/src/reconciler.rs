//! Accumulates a streamed reply into a draft and decides whether it is committed.

use futures::StreamExt;
use providers::FragmentStream;
use shared::{Message, NetworkError, Role, SessionId, StoreError};
use std::time::Duration;
use store::ChatStore;
use tokio_util::sync::CancellationToken;

/// Fold one fragment into the draft. Fragments are applied in arrival order
/// and never split or reordered.
pub fn apply_fragment(mut draft: String, fragment: &str) -> String {
    draft.push_str(fragment);
    draft
}

/// How a reply stream ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// The stream closed cleanly; the full reply
    Completed(String),
    /// The view stopped listening before the stream closed
    Cancelled { partial: String },
    /// Read error or stall; the partial reply is for display only
    Failed { partial: String, error: NetworkError },
}

impl StreamOutcome {
    /// Text received before the stream ended, whatever the outcome
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed(text) => text,
            StreamOutcome::Cancelled { partial } => partial,
            StreamOutcome::Failed { partial, .. } => partial,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamReconciler {
    fragment_timeout: Option<Duration>,
}

impl StreamReconciler {
    /// `fragment_timeout` bounds the wait for each fragment; `None` waits forever
    pub fn new(fragment_timeout: Option<Duration>) -> Self {
        Self { fragment_timeout }
    }

    /// Read the stream to its end, reporting the whole draft after every fragment.
    ///
    /// The cancel token is checked between fragment reads. Nothing is persisted here.
    pub async fn consume<F>(
        &self,
        mut stream: FragmentStream,
        cancel: &CancellationToken,
        mut on_draft: F,
    ) -> StreamOutcome
    where
        F: FnMut(&str),
    {
        let mut draft = String::new();
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(fragments, "Reply stream cancelled");
                    return StreamOutcome::Cancelled { partial: draft };
                }
                next = self.next_fragment(&mut stream) => next,
            };

            match next {
                Ok(Some(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    fragments += 1;
                    draft = apply_fragment(draft, &fragment);
                    on_draft(&draft);
                }
                Ok(None) => {
                    tracing::debug!(fragments, chars = draft.len(), "Reply stream closed");
                    return StreamOutcome::Completed(draft);
                }
                Err(error) => {
                    tracing::warn!(fragments, error = %error, "Reply stream failed");
                    return StreamOutcome::Failed {
                        partial: draft,
                        error,
                    };
                }
            }
        }
    }

    async fn next_fragment(
        &self,
        stream: &mut FragmentStream,
    ) -> Result<Option<String>, NetworkError> {
        let next = match self.fragment_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| NetworkError::Timeout(limit))?,
            None => stream.next().await,
        };
        next.transpose()
    }
}

/// Persist the completed reply as exactly one assistant message
pub async fn commit<S>(store: &S, session_id: SessionId, reply: String) -> Result<Message, StoreError>
where
    S: ChatStore + ?Sized,
{
    store.append_message(session_id, Role::Assistant, reply).await
}
