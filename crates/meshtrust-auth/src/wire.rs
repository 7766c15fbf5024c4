//! Handshake frames exchanged over a [`crate::Connection`].

use serde::{Deserialize, Serialize};

use crate::challenge::{Challenge, Response};
use crate::error::AuthError;

/// Outcome of one side's verification, sent back to the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// The sender verified our response and keeps the connection.
    pub accepted: bool,
    /// The sender's operator has approved us.
    pub approved: bool,
    /// Failure reason when not accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn accept(approved: bool) -> Self {
        Self {
            accepted: true,
            approved,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Challenge(Challenge),
    Response(Response),
    Verdict(Verdict),
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, AuthError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AuthError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Challenge(_) => "challenge",
            Self::Response(_) => "response",
            Self::Verdict(_) => "verdict",
        }
    }
}
