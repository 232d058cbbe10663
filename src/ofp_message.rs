use std::io;

use crate::ofp_header::{OfpHeader, Xid};

/// Failure to turn an OpenFlow message into bytes or back.
#[derive(Debug, thiserror::Error)]
pub enum OfpSerializationError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected value '{value}' at field '{field}' of '{message}'")]
    UnexpectedValue {
        value: String,
        field: &'static str,
        message: &'static str,
    },

    #[error("not enough data for {message}: got {got} bytes, need {need}")]
    NotEnoughData {
        message: &'static str,
        got: usize,
        need: usize,
    },

    #[error("unsupported OpenFlow version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported OpenFlow message code {0}")]
    UnsupportedMessageCode(u8),
}

impl OfpSerializationError {
    /// Shorthand for a buffer that ended before `need` bytes of `message` were available.
    pub fn short(message: &'static str, got: usize, need: usize) -> Self {
        OfpSerializationError::NotEnoughData { message, got, need }
    }
}

/// OpenFlow Message
///
/// Version-agnostic API for handling OpenFlow messages at the byte-buffer level.
pub trait OfpMessage: Sized {
    /// Return the byte-size of an `OfpMessage`, header included.
    fn size_of(msg: &Self) -> usize;
    /// Create an `OfpHeader` for the given transaction id and OpenFlow message.
    fn header_of(xid: Xid, msg: &Self) -> OfpHeader;
    /// Return a marshaled buffer containing an OpenFlow header and the message `msg`.
    fn marshal(xid: Xid, msg: Self) -> Result<Vec<u8>, OfpSerializationError>;
    /// Returns a pair `(Xid, OfpMessage)` of the transaction id and OpenFlow message parsed from
    /// the given OpenFlow header `header`, and body buffer `buf`.
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Self), OfpSerializationError>;
}
