//! Error types for the profiling server.
//!
//! Faults are split by who has to react to them:
//!
//! | Type              | Raised by                    | Effect                              |
//! |-------------------|------------------------------|-------------------------------------|
//! | [`ServerError`]   | startup, binding, config     | returned to the caller of `bind`    |
//! | [`ProfilerError`] | the profiler collaborator    | skips one sample or ends a session  |
//! | [`CodecError`]    | frame encoding and decoding  | skips one sample / rejects a frame  |
//!
//! Transport faults on a single client are plain [`std::io::Error`] values.
//! They are contained where they happen and turned into an eviction; they
//! never surface through any of the types below.

use std::net::SocketAddr;

/// Errors that prevent the server from starting or accepting connections.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration value is missing its invariant (e.g. zero interval).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The listen host could not be resolved to an address of the
    /// selected family.
    #[error("cannot resolve listen address {host}:{port}")]
    Resolve {
        /// Host part as configured.
        host: String,
        /// Port as configured.
        port: u16,
    },

    /// Binding the listening socket failed.
    #[error("bind failed on {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure on the listening socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by the profiler collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfilerError {
    /// One sample could not be taken. The session keeps going.
    #[error("sampling failed: {0}")]
    Sampling(String),

    /// The profiler cannot continue. The current session ends.
    #[error("profiler unavailable: {0}")]
    Unavailable(String),
}

impl ProfilerError {
    /// Returns `true` when the error must end the running session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors raised while framing or un-framing wire messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Fewer bytes than the header or declared payload length.
    #[error("frame truncated")]
    Truncated,

    /// Method byte is not one we know.
    #[error("unknown method byte {0:#04x}")]
    UnknownMethod(u8),

    /// Format byte is not one we know.
    #[error("unknown format byte {0:#04x}")]
    UnknownFormat(u8),

    /// Declared or produced payload exceeds the frame limit.
    #[error("payload of {0} bytes exceeds frame limit")]
    TooLarge(usize),

    /// JSON payload failed to (de)serialize.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bincode payload failed to (de)serialize.
    #[error("bincode codec error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Reading a frame from a stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_fatal() {
        assert!(ProfilerError::Unavailable("gone".to_string()).is_fatal());
        assert!(!ProfilerError::Sampling("bad frame".to_string()).is_fatal());
    }

    #[test]
    fn bind_error_mentions_address() {
        let Ok(addr) = "127.0.0.1:8912".parse::<SocketAddr>() else {
            panic!("literal address parses");
        };
        let err = ServerError::Bind {
            addr,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:8912"));
    }

    #[test]
    fn codec_error_formats_method_as_hex() {
        assert_eq!(
            CodecError::UnknownMethod(0x7f).to_string(),
            "unknown method byte 0x7f"
        );
    }
}
