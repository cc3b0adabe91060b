//! Persisted entities: profiles, chat sessions and their messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Store-assigned profile key
    ProfileId
);
id_type!(
    /// Store-assigned chat session key
    SessionId
);
id_type!(
    /// Store-assigned message key. Ascending order is display order.
    MessageId
);

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::Corrupt(format!("unknown message role '{}'", other))),
        }
    }
}

/// Birth details of the person a chat is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub birth_date_time: DateTime<Utc>,
    pub birth_place: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Token handed out by the backend's `/start_session`
    pub remote_session_token: Option<String>,
}

/// Input for creating a profile. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub name: String,
    pub birth_date_time: DateTime<Utc>,
    pub birth_place: String,
    pub latitude: f64,
    pub longitude: f64,
    pub remote_session_token: Option<String>,
}

impl NewProfile {
    pub fn with_remote_session_token(mut self, token: impl Into<String>) -> Self {
        self.remote_session_token = Some(token.into());
        self
    }

    pub fn into_profile(self, id: ProfileId) -> Profile {
        Profile {
            id,
            name: self.name,
            birth_date_time: self.birth_date_time,
            birth_place: self.birth_place,
            latitude: self.latitude,
            longitude: self.longitude,
            remote_session_token: self.remote_session_token,
        }
    }
}

/// One chat thread, owned by a single profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub profile_id: ProfileId,
    pub created_at: DateTime<Utc>,
}

/// A committed turn. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
