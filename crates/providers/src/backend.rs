use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response};
use shared::agent_api::{BirthDetailPayload, ChatStreamRequest, StartSessionResponse};
use shared::settings::ChatSettings;
use shared::NetworkError;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use crate::decode::Utf8Decoder;
use crate::{CompletionService, FragmentStream, SessionBootstrap};

// No overall timeout: a reply may stream for minutes. Stalls are bounded per
// fragment by the reconciler instead.
static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .pool_max_idle_per_host(2)
        .build()
        .unwrap_or_default()
});

/// Longest error body kept from a failed response
const ERROR_DETAIL_CHARS: usize = 800;

/// Client for the astrology backend
pub struct BackendClient {
    http: Client,
    base: Url,
}

impl BackendClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base,
        }
    }

    pub fn from_settings(settings: &ChatSettings) -> anyhow::Result<Self> {
        Ok(Self::new(settings.backend_base()?))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, NetworkError> {
        let mut base = self.base.clone();
        // Join relative to the last segment, so "/api" + "chat/stream" keeps "/api"
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|e| NetworkError::Transport(format!("bad endpoint {}: {}", path, e)))
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, NetworkError> {
        let url = self.endpoint(path)?;
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(ERROR_DETAIL_CHARS).collect();
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body: detail,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl SessionBootstrap for BackendClient {
    async fn start_session(&self, birth_detail: &BirthDetailPayload) -> Result<String, NetworkError> {
        let resp = self.post("start_session", birth_detail).await?;
        let body: StartSessionResponse = resp
            .json()
            .await
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
        tracing::debug!(name = %birth_detail.name, "Backend session started");
        Ok(body.session_id)
    }
}

#[async_trait]
impl CompletionService for BackendClient {
    async fn open_stream(&self, request: ChatStreamRequest) -> Result<FragmentStream, NetworkError> {
        let resp = self.post("chat/stream", &request).await?;
        tracing::debug!(messages = request.messages.len(), "Chat stream opened");
        Ok(decode_fragments(resp.bytes_stream()))
    }
}

/// Turn a byte stream into text fragments in arrival order.
///
/// Each non-empty decoded piece is one fragment; stream end flushes the decoder.
pub fn decode_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(bytes), Utf8Decoder::new(), false);
    stream::unfold(state, |(mut bytes, mut decoder, done)| async move {
        if done {
            return None;
        }
        loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let text = decoder.feed(chunk.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), (bytes, decoder, false)));
                    }
                }
                Some(Err(e)) => {
                    let err = NetworkError::Transport(format!("stream read error: {}", e));
                    return Some((Err(err), (bytes, decoder, true)));
                }
                None => {
                    let tail = decoder.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), (bytes, decoder, true)));
                }
            }
        }
    })
    .boxed()
}
