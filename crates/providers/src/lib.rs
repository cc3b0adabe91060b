//! Remote collaborators of the chat core: the backend that starts a remote
//! session for a profile and streams assistant replies.

pub mod backend;
pub mod decode;

pub use backend::BackendClient;
pub use decode::Utf8Decoder;

use futures::stream::BoxStream;
use shared::agent_api::{BirthDetailPayload, ChatStreamRequest};
use shared::NetworkError;

/// Reply text in arrival order. The stream ending is the only end-of-reply signal.
pub type FragmentStream = BoxStream<'static, Result<String, NetworkError>>;

/// Source of streamed assistant replies
///
/// Note: Uses async_trait for object safety
#[async_trait::async_trait]
pub trait CompletionService: Send + Sync {
    /// Open a reply stream. Errors here mean nothing was received.
    async fn open_stream(&self, request: ChatStreamRequest) -> Result<FragmentStream, NetworkError>;
}

/// Hands out the remote session token stored on a new profile
#[async_trait::async_trait]
pub trait SessionBootstrap: Send + Sync {
    async fn start_session(&self, birth_detail: &BirthDetailPayload) -> Result<String, NetworkError>;
}
