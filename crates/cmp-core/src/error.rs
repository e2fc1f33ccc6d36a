//! Error types for threshold ECDSA sessions

use crate::types::{PartyId, RoundNumber};
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or running a session
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid session construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold requirements not met
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Invalid party ID
    #[error("Invalid party ID: {0}")]
    InvalidPartyId(PartyId),

    /// Message or proof verification failed
    #[error("Message verification failed: {0}")]
    VerificationFailed(String),

    /// Session aborted with the listed parties blamed
    #[error("Protocol aborted: {reason} (culprits: {culprits:?})")]
    Aborted {
        culprits: Vec<PartyId>,
        reason: String,
    },

    /// Parties disagree on the previous round's broadcasts
    #[error("Broadcast verification failed for round {round}")]
    BroadcastMismatch { round: RoundNumber },

    /// A peer aborted the session
    #[error("Session aborted by party {from}")]
    RemoteAbort { from: PartyId },

    /// Content does not match the shape expected by the round
    #[error("Unexpected content for round {round}")]
    UnexpectedContent { round: RoundNumber },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Network/relay error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Session stopped locally
    #[error("Session stopped")]
    Stopped,

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    Derivation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Attribute this error to `party`.
    ///
    /// Errors that already carry culprits, or that can never be caused by a
    /// peer (local stop, remote abort), are returned unchanged.
    pub fn blame(self, party: PartyId) -> Self {
        match self {
            Error::Aborted { .. }
            | Error::RemoteAbort { .. }
            | Error::BroadcastMismatch { .. }
            | Error::Stopped => self,
            other => Error::Aborted {
                culprits: vec![party],
                reason: other.to_string(),
            },
        }
    }

    /// Parties held responsible for this error. Empty for generic failures.
    pub fn culprits(&self) -> Vec<PartyId> {
        match self {
            Error::Aborted { culprits, .. } => culprits.clone(),
            Error::RemoteAbort { from } => vec![*from],
            _ => Vec::new(),
        }
    }

    pub(crate) fn culprit(party: PartyId, reason: impl Into<String>) -> Self {
        Error::Aborted {
            culprits: vec![party],
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(what: &str) -> Self {
        Error::Internal(format!("{what} not available in this round"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(e: bincode::error::EncodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(e: bincode::error::DecodeError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
