//! Errors

use thiserror::Error;

/// Result type alias used throughout this crate
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while building, mutating or dissecting packets
///
/// Checksum mismatches are NOT errors; see `Packet::checksum_valid`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A slice or field access fell outside the bytes backing a view
    #[error("range {start}..{end} is out of bounds of a {len} byte view")]
    Range {
        /// First byte requested
        start: usize,
        /// One past the last byte requested
        end: usize,
        /// Length of the view that was accessed
        len: usize,
    },

    /// The operation is not valid for the layer in its current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A TLV / option record could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A header failed validation while being dissected
    #[error("malformed {layer} header: {reason}")]
    Malformed {
        /// Name of the layer being dissected
        layer: &'static str,
        /// What was wrong with it
        reason: &'static str,
    },

    /// The node id doesn't refer to a node of the packet (anymore)
    #[error("no such node")]
    NoSuchNode,
}

impl Error {
    pub(crate) fn range(start: usize, end: usize, len: usize) -> Self {
        Error::Range { start, end, len }
    }

    pub(crate) fn invalid<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Error::InvalidOperation(msg.into())
    }

    pub(crate) fn decode<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Decode(msg.into())
    }

    pub(crate) fn malformed(layer: &'static str, reason: &'static str) -> Self {
        Error::Malformed { layer, reason }
    }
}

impl From<cast::Error> for Error {
    fn from(_: cast::Error) -> Self {
        Error::invalid("value doesn't fit in the field")
    }
}
