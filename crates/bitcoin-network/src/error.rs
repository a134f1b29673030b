//! Network error types.

use std::io;
use thiserror::Error;

/// Network errors.
///
/// This is a closed taxonomy: every failure surfaced by the engine is one of
/// these kinds. Channels, sessions and subscribers receive their terminal
/// reason as one of these values.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Start bypassed without failure (e.g. zero configured connections).
    #[error("start bypassed without failure")]
    Bypassed,

    /// The owning service has stopped.
    #[error("service stopped")]
    ServiceStopped,

    /// The subscriber has stopped.
    #[error("subscriber stopped")]
    SubscriberStopped,

    /// The operation was canceled.
    #[error("operation canceled")]
    OperationCanceled,

    /// The operation failed.
    #[error("operation failed")]
    OperationFailed,

    /// The operation timed out.
    #[error("operation timed out")]
    OperationTimeout,

    /// The address pool is empty.
    #[error("address not found")]
    AddressNotFound,

    /// The address is blocked by policy.
    #[error("address blocked by policy")]
    AddressBlocked,

    /// A channel for the address already exists.
    #[error("address already in use")]
    AddressInUse,

    /// Seeding completed without increasing the address pool.
    #[error("seeding unsuccessful")]
    SeedingUnsuccessful,

    /// Corrupt or truncated data stream.
    #[error("bad data stream")]
    BadStream,

    /// Failed to load a file.
    #[error("failed to load file")]
    FileLoad,

    /// Failed to save a file.
    #[error("failed to save file")]
    FileSave,

    /// File system error.
    #[error("file system error")]
    FileSystem,

    /// Binding the listener failed.
    #[error("incoming connection failed")]
    ListenFailed,

    /// Accepting a connection failed.
    #[error("connection acceptance failed")]
    AcceptFailed,

    /// The inbound connection limit is reached.
    #[error("service oversubscribed")]
    Oversubscribed,

    /// Resolving the hostname failed.
    #[error("resolving hostname failed")]
    ResolveFailed,

    /// The remote host is unreachable.
    #[error("unable to reach remote host")]
    ConnectFailed,

    /// Malformed message heading.
    #[error("invalid message heading")]
    InvalidHeading,

    /// Message heading magic does not match the network.
    #[error("invalid message heading magic")]
    InvalidMagic,

    /// Message payload exceeds the allowed size.
    #[error("oversized message payload")]
    OversizedPayload,

    /// Message checksum does not match the payload.
    #[error("invalid message checksum")]
    InvalidChecksum,

    /// Message payload failed to deserialize.
    #[error("message failed to deserialize")]
    InvalidMessage,

    /// Unknown command, or message invalid at the negotiated version.
    #[error("unknown message type")]
    UnknownMessage,

    /// The peer violated the protocol.
    #[error("protocol violation")]
    ProtocolViolation,

    /// Connected to self, or a nonce collision with an in-flight handshake.
    #[error("channel conflict")]
    ChannelConflict,

    /// The channel timed out.
    #[error("connection timed out")]
    ChannelTimeout,

    /// The channel was dropped by the peer or expired.
    #[error("channel dropped")]
    ChannelDropped,

    /// The channel was stopped locally.
    #[error("channel stopped")]
    ChannelStopped,

    /// The configuration is invalid.
    #[error("invalid configuration")]
    InvalidConfiguration,
}

impl NetworkError {
    /// Project the native I/O error space onto the network taxonomy.
    pub fn from_io(error: &io::Error) -> Self {
        use io::ErrorKind::*;

        match error.kind() {
            ConnectionAborted | Interrupted => NetworkError::OperationCanceled,
            ConnectionRefused | ConnectionReset | NotConnected | PermissionDenied => {
                NetworkError::OperationFailed
            }
            AddrNotAvailable => NetworkError::ResolveFailed,
            BrokenPipe | HostUnreachable | NetworkUnreachable | NetworkDown => {
                NetworkError::ConnectFailed
            }
            AddrInUse | AlreadyExists => NetworkError::AddressInUse,
            InvalidData | UnexpectedEof => NetworkError::BadStream,
            TimedOut | WouldBlock => NetworkError::ChannelTimeout,
            NotFound | ReadOnlyFilesystem | StorageFull => NetworkError::FileSystem,
            _ => NetworkError::BadStream,
        }
    }
}

impl From<io::Error> for NetworkError {
    fn from(error: io::Error) -> Self {
        NetworkError::from_io(&error)
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_projection() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(NetworkError::from_io(&refused), NetworkError::OperationFailed);

        let unreachable = io::Error::from(io::ErrorKind::HostUnreachable);
        assert_eq!(NetworkError::from_io(&unreachable), NetworkError::ConnectFailed);

        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(NetworkError::from_io(&eof), NetworkError::BadStream);

        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(NetworkError::from_io(&timeout), NetworkError::ChannelTimeout);
    }

    #[test]
    fn test_display_tags() {
        assert_eq!(NetworkError::InvalidMagic.to_string(), "invalid message heading magic");
        assert_eq!(NetworkError::ChannelConflict.to_string(), "channel conflict");
        assert_eq!(NetworkError::ServiceStopped.to_string(), "service stopped");
    }
}
