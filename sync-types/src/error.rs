//! Error types for the boxsync wire protocol.

use thiserror::Error;

use crate::command::Request;

/// Errors that can occur while encoding, decoding or transferring over the wire.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying stream failed (including unexpected EOF)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A code was read that is not part of the protocol vocabulary
    #[error("unknown command code: {0}")]
    UnknownCode(i32),

    /// A known code arrived where the request does not allow it
    #[error("protocol violation: {request:?} answered with code {actual}")]
    UnexpectedReply {
        /// The request that was sent.
        request: Request,
        /// The code the peer actually sent.
        actual: i32,
    },

    /// String does not fit the u16 length prefix
    #[error("string too long for wire: {0} bytes (max 65535)")]
    StringTooLong(usize),

    /// String payload was not valid UTF-8
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// Negative file length on the wire
    #[error("negative length on wire: {0}")]
    NegativeLength(i64),

    /// Negative entry count on the wire
    #[error("negative count on wire: {0}")]
    NegativeCount(i32),

    /// A wire path that would escape or is not relative to the root
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A file changed size between enumeration and send
    #[error("file changed while sending: {0}")]
    SourceChanged(String),
}

impl WireError {
    /// Whether this error means the peer broke the protocol (as opposed to I/O).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownCode(_) | Self::UnexpectedReply { .. } | Self::NegativeLength(_)
                | Self::NegativeCount(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownCode(99);
        assert_eq!(err.to_string(), "unknown command code: 99");
    }

    #[test]
    fn unexpected_reply_names_request() {
        let err = WireError::UnexpectedReply {
            request: Request::PushFiles,
            actual: 55,
        };
        assert_eq!(
            err.to_string(),
            "protocol violation: PushFiles answered with code 55"
        );
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn io_is_not_protocol_violation() {
        let err = WireError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(!err.is_protocol_violation());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
