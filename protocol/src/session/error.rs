//! Session store errors.

use thiserror::Error;

use super::types::SessionId;

/// Why a session operation was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} has expired")]
    Expired(SessionId),

    #[error("session already has a client")]
    AlreadyJoined,

    #[error("no client has joined this session yet")]
    NotJoined,

    #[error("transaction already submitted for this session")]
    DuplicateSubmission,

    #[error("session no longer serves transaction details")]
    SessionClosed,

    #[error("connection is not bound to this session")]
    NotBound,

    #[error("invalid transaction details: {0}")]
    InvalidDetails(String),
}

impl SessionError {
    /// Wire code sent in the `error` field of an error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "sessionNotFound",
            SessionError::Expired(_) => "sessionExpired",
            SessionError::AlreadyJoined => "alreadyJoined",
            SessionError::NotJoined => "notJoined",
            SessionError::DuplicateSubmission => "duplicateSubmission",
            SessionError::SessionClosed => "sessionClosed",
            SessionError::NotBound | SessionError::InvalidDetails(_) => "protocolError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_camel_case() {
        let id = SessionId::from("abc");
        assert_eq!(SessionError::NotFound(id.clone()).code(), "sessionNotFound");
        assert_eq!(SessionError::Expired(id).code(), "sessionExpired");
        assert_eq!(SessionError::DuplicateSubmission.code(), "duplicateSubmission");
        assert_eq!(SessionError::NotBound.code(), "protocolError");
    }

    #[test]
    fn messages_name_the_session() {
        let err = SessionError::NotFound(SessionId::from("abc"));
        assert_eq!(err.to_string(), "session abc not found");
    }
}
