//! Error types for slicehub.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! hub-level errors are all captured here.

/// The error type for all slicehub operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket, UDP socket, subprocess pipe).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed UDP frame, bad SmartSDR line,
    /// unparseable HRD command).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a peer.
    #[error("timeout waiting for response")]
    Timeout,

    /// No connection to the radio backend has been established.
    #[error("not connected")]
    NotConnected,

    /// An invalid parameter was passed to a hub operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The referenced channel, decode, or instance does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The channel already has an autonomous QSO in progress.
    #[error("channel {0} is busy with an active QSO")]
    ChannelBusy(u8),

    /// A logbook persistence failure (the in-memory index stays valid).
    #[error("logbook error: {0}")]
    Logbook(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn display_channel_busy() {
        let e = Error::ChannelBusy(2);
        assert_eq!(e.to_string(), "channel 2 is busy with an active QSO");
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
