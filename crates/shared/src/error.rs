//! Error taxonomy for the chat core.
//!
//! Validation problems are caught before any IO, network problems at the
//! stream boundary, storage problems at the store call site. None of them is
//! fatal: a failed turn leaves the store valid and the next turn proceeds.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::model::{ProfileId, SessionId};

/// One rejected form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("invalid profile: {}", join_fields(.0))]
    Profile(Vec<FieldError>),
}

impl ValidationError {
    /// Message for the given field, if it was rejected
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            ValidationError::Profile(fields) => fields
                .iter()
                .find(|f| f.field == name)
                .map(|f| f.message.as_str()),
            ValidationError::EmptyMessage => None,
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response has no body")]
    NoBody,
    #[error("no data received for {0:?}")]
    Timeout(Duration),
    #[error("could not decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("profile {0} does not exist")]
    ProfileNotFound(ProfileId),
    #[error("session {0} does not exist")]
    SessionNotFound(SessionId),
    #[error("store unavailable: {0}")]
    Backend(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(err: impl fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// A reply is still streaming in this view
    #[error("a reply is already in progress")]
    Busy,
    /// The view was switched or closed while the turn was running
    #[error("chat view was switched or closed")]
    Cancelled,
}
