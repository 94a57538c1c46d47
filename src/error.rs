//! Accessory errors.

use std::io::{self, ErrorKind};

use crate::transport::TransferError;

/// Accessory result.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of an accessory operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A control, bulk or descriptor transfer failed.
    #[error("transfer failed: {0}")]
    Transport(#[from] TransferError),
    /// Bulk read exhausted its NAK retry budget.
    #[error("NAK retry limit exhausted")]
    Timeout,
    /// Descriptor walk would read past the end of the buffer.
    #[error("malformed configuration descriptor")]
    MalformedDescriptor,
    /// Configuration descriptor does not fit into the descriptor buffer.
    #[error("configuration descriptor too large ({length} > {capacity})")]
    DescriptorTooLarge {
        /// Total length declared by the device.
        length: usize,
        /// Capacity of the descriptor buffer.
        capacity: usize,
    },
    /// No bulk IN and bulk OUT endpoint pair was found.
    #[error("accessory endpoints not found")]
    EndpointsNotFound,
    /// Device reported an AOA protocol version that does not allow the operation.
    #[error("unsupported AOA protocol version {0}")]
    UnsupportedProtocol(u16),
    /// Device rejected the configuration select.
    #[error("cannot set configuration: {0}")]
    ConfigurationFailed(TransferError),
    /// Payload does not fit into the 16-bit length field of a control transfer.
    #[error("payload of {0} bytes too large for a control transfer")]
    PayloadTooLarge(usize),
    /// Device did not detach after the start request.
    #[error("device did not re-enumerate in accessory mode in time")]
    NegotiationTimedOut,
    /// Operation requires a connected accessory.
    #[error("accessory not connected")]
    NotConnected,
    /// Operation is not available in the mode the session was created with.
    #[error("operation not available in this accessory mode")]
    WrongMode,
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Transport(err) => err.kind(),
            Error::Timeout => ErrorKind::TimedOut,
            Error::MalformedDescriptor => ErrorKind::InvalidData,
            Error::DescriptorTooLarge { .. } => ErrorKind::InvalidData,
            Error::EndpointsNotFound => ErrorKind::NotFound,
            Error::UnsupportedProtocol(_) => ErrorKind::Unsupported,
            Error::ConfigurationFailed(_) => ErrorKind::ConnectionRefused,
            Error::PayloadTooLarge(_) => ErrorKind::InvalidInput,
            Error::NegotiationTimedOut => ErrorKind::TimedOut,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::WrongMode => ErrorKind::Unsupported,
        };

        io::Error::new(kind, error)
    }
}
