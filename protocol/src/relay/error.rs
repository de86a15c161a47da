//! Relay-level errors and how each one surfaces on the wire.

use thiserror::Error;

use crate::config::{CLOSE_PROTOCOL_ERROR, CLOSE_SESSION_EXPIRED, CLOSE_SESSION_NOT_FOUND};
use crate::session::SessionError;

/// Why a request was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("signature does not match the session's transaction details")]
    InvalidSignature,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RelayError {
    /// Wire code for the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Session(e) => e.code(),
            RelayError::InvalidSignature => "invalidSignature",
            RelayError::Protocol(_) => "protocolError",
        }
    }

    /// Protocol errors end the offending connection.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            RelayError::Protocol(_)
                | RelayError::Session(SessionError::NotBound)
                | RelayError::Session(SessionError::InvalidDetails(_))
        )
    }

    /// Close code to send after the error envelope, if the connection
    /// should be closed at all.
    pub fn close_code(&self, close_on_invalid_session: bool) -> Option<u16> {
        match self {
            _ if self.is_protocol_error() => Some(CLOSE_PROTOCOL_ERROR),
            RelayError::Session(SessionError::NotFound(_)) if close_on_invalid_session => {
                Some(CLOSE_SESSION_NOT_FOUND)
            }
            RelayError::Session(SessionError::Expired(_)) if close_on_invalid_session => {
                Some(CLOSE_SESSION_EXPIRED)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[test]
    fn protocol_errors_close_with_1002() {
        for err in [
            RelayError::Protocol("bad".into()),
            RelayError::Session(SessionError::NotBound),
            RelayError::Session(SessionError::InvalidDetails("amount".into())),
        ] {
            assert_eq!(err.code(), "protocolError");
            assert_eq!(err.close_code(false), Some(1002));
            assert_eq!(err.close_code(true), Some(1002));
        }
    }

    #[test]
    fn session_errors_keep_connection_open_by_default() {
        let not_found = RelayError::from(SessionError::NotFound(SessionId::from("x")));
        let expired = RelayError::from(SessionError::Expired(SessionId::from("x")));
        assert_eq!(not_found.close_code(false), None);
        assert_eq!(expired.close_code(false), None);
        assert_eq!(not_found.close_code(true), Some(4404));
        assert_eq!(expired.close_code(true), Some(4410));

        for err in [
            RelayError::InvalidSignature,
            RelayError::Session(SessionError::AlreadyJoined),
            RelayError::Session(SessionError::DuplicateSubmission),
        ] {
            assert_eq!(err.close_code(true), None);
        }
    }

    #[test]
    fn codes() {
        assert_eq!(RelayError::InvalidSignature.code(), "invalidSignature");
        assert_eq!(
            RelayError::Session(SessionError::NotJoined).code(),
            "notJoined"
        );
    }
}
