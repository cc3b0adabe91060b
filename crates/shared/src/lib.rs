pub mod error;
pub mod events;
pub mod model;
pub mod profile;

pub use error::{ChatError, FieldError, NetworkError, StoreError, ValidationError};
pub use model::{Message, MessageId, NewProfile, Profile, ProfileId, Role, Session, SessionId};

pub mod settings {
    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    pub const BACKEND_URL_ENV: &str = "COSMIC_BACKEND_URL";
    const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

    pub const DEFAULT_GREETING: &str = "🌟 **Namaste! I'm your AI Astrologer.** \n\nI'm here to help you understand your cosmic journey and unlock the secrets written in the stars. How can I illuminate your path today?";

    fn default_backend_url() -> String {
        std::env::var(BACKEND_URL_ENV).unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string())
    }

    fn default_fragment_timeout_secs() -> u64 {
        60
    }

    fn default_greeting() -> String {
        DEFAULT_GREETING.to_string()
    }

    fn default_database_file() -> String {
        "cosmic_chat.db".to_string()
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatSettings {
        /// Base URL of the astrology backend (`/start_session`, `/chat/stream`)
        #[serde(default = "default_backend_url")]
        pub backend_url: String,
        /// Longest wait for the next streamed fragment; 0 waits forever
        #[serde(default = "default_fragment_timeout_secs")]
        pub fragment_timeout_secs: u64,
        /// Shown in a chat with no history. Never stored.
        #[serde(default = "default_greeting")]
        pub greeting: String,
        /// SQLite file name inside the data directory
        #[serde(default = "default_database_file")]
        pub database_file: String,
    }

    impl Default for ChatSettings {
        fn default() -> Self {
            Self {
                backend_url: default_backend_url(),
                fragment_timeout_secs: default_fragment_timeout_secs(),
                greeting: default_greeting(),
                database_file: default_database_file(),
            }
        }
    }

    impl ChatSettings {
        pub fn fragment_timeout(&self) -> Option<Duration> {
            match self.fragment_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            }
        }

        /// Backend base URL, checked and without a trailing slash
        pub fn backend_base(&self) -> Result<url::Url> {
            let trimmed = self.backend_url.trim_end_matches('/');
            url::Url::parse(trimmed)
                .with_context(|| format!("Invalid backend URL {:?}", self.backend_url))
        }

        pub fn database_path(&self, data_dir: &Path) -> PathBuf {
            data_dir.join(&self.database_file)
        }

        /// Read settings from `path`; missing or unreadable files give defaults
        pub fn load_or_default(path: &Path) -> Self {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<ChatSettings>(&contents) {
                    Ok(settings) => settings,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Ignoring unparsable settings");
                        Self::default()
                    }
                },
                Err(_) => Self::default(),
            }
        }

        pub fn save(&self, path: &Path) -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
            let json = serde_json::to_string_pretty(self)?;
            std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
            Ok(())
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com.local", "Cosmic Chat", "CosmicChat")
    }

    /// Location of `settings.json`
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|p| p.config_dir().join("settings.json"))
    }

    /// Directory holding the local database
    pub fn data_dir() -> PathBuf {
        project_dirs()
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"))
    }

    pub fn load_settings_or_default() -> ChatSettings {
        config_path()
            .map(|p| ChatSettings::load_or_default(&p))
            .unwrap_or_default()
    }

}

pub mod agent_api {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    use crate::model::Role;

    /// One `{role, content}` pair as the backend expects it
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: String,
    }

    impl ChatMessage {
        pub fn new(role: Role, content: impl Into<String>) -> Self {
            Self {
                role,
                content: content.into(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BirthDetailPayload {
        pub name: String,
        pub birth_date_time: DateTime<Utc>,
        pub birth_place: String,
        pub latitude: f64,
        pub longitude: f64,
    }

    /// Body of `POST /chat/stream`
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ChatStreamRequest {
        pub messages: Vec<ChatMessage>,
        pub birth_detail: BirthDetailPayload,
        pub session_id: Option<String>,
    }

    /// Response of `POST /start_session`
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct StartSessionResponse {
        pub session_id: String,
    }

}
