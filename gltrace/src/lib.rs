//! Reading, writing and rewriting of recorded OpenGL ES / EGL call traces.
//!
//! A trace container is a length-prefixed JSON header followed by a sequence of framed call
//! records:
//!
//! `| header_len: u32 | header: [u8; header_len] | record* |`
//!
//! See [`record::CallRecord`] for the layout of a single record.
use std::io;

pub mod header;
pub mod lifetime;
pub mod reader;
pub mod record;
pub mod registry;
pub mod writer;

pub use header::Header;
pub use lifetime::{
    inject_client_side_deletes, ClientSideAnalysis, LastUseTable, RewriteError, RewriteSummary,
};
pub use reader::{CallStream, TraceReader, TraceSource};
pub use record::{CallRecord, Value};
pub use registry::{Registry, Signature};
pub use writer::{TraceWriter, MAX_RECORD_SIZE};

use record::{Error, ParseError};

/// Length of the fixed part of every record.
pub const FRAME_LEN: usize = 16;

/// Reads the total record length out of a record's fixed part.
#[inline]
pub fn rlen(frame: &[u8]) -> Option<u32> {
    let bytes = frame.get(12..16)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// A framed but undecoded call record.
///
/// The fixed fields are available without consulting the [`Registry`]; use [`RawCall::parse`] to
/// decode the arguments.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawCall<'a>(&'a [u8]);

impl<'a> RawCall<'a> {
    /// Wraps `bytes` after checking that they hold exactly one record frame.
    pub fn new(bytes: &'a [u8]) -> Result<Self, Error> {
        let declared = rlen(bytes).ok_or(Error::NotEnoughBytes)?;
        if (declared as usize) < FRAME_LEN || declared as usize != bytes.len() {
            return Err(Error::BadFrame(declared));
        }
        Ok(Self(bytes))
    }

    pub fn opcode(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    pub fn tid(&self) -> u32 {
        u32::from_le_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }

    pub fn callno(&self) -> u32 {
        u32::from_le_bytes([self.0[6], self.0[7], self.0[8], self.0[9]])
    }

    pub fn argc(&self) -> u8 {
        self.0[10]
    }

    pub fn flags(&self) -> u8 {
        self.0[11]
    }

    pub fn is_synthetic(&self) -> bool {
        self.flags() & record::CallFlags::SYNTHETIC.bits() != 0
    }

    /// Returns the encoded arguments and return value.
    pub fn payload(&self) -> &'a [u8] {
        &self.0[FRAME_LEN..]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse(&self, registry: &Registry) -> Result<CallRecord<'a>, ParseError> {
        CallRecord::parse(*self, registry)
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error("trace is missing its header")]
    MissingHeader,

    #[error("trace header is {0} bytes, exceeding the record size limit")]
    HeaderTooLarge(u32),

    #[error("trace header is not a JSON object")]
    BadHeader(#[from] serde_json::Error),

    #[error("trace header has already been written")]
    HeaderWritten,

    #[error("trace header must be written before any call")]
    HeaderMissing,

    #[error("trace ends in the middle of a record")]
    Truncated,

    #[error("encoded record is {size} bytes, exceeding the {limit} byte limit")]
    SizeExceeded { size: usize, limit: usize },

    #[error("record error")]
    Record(#[from] record::Error),

    #[error("IO Error:")]
    Io(#[from] io::Error),
}

impl From<ParseError> for TraceError {
    fn from(err: ParseError) -> Self {
        Self::Record(err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_call_checks_frame() {
        assert!(matches!(RawCall::new(&[0u8; 4]), Err(Error::NotEnoughBytes)));

        let mut frame = [0u8; FRAME_LEN];
        frame[12] = 8;
        assert!(matches!(RawCall::new(&frame), Err(Error::BadFrame(8))));

        frame[12] = FRAME_LEN as u8;
        frame[0] = 0x08;
        frame[2] = 0x03;
        frame[6] = 0x2a;
        frame[11] = 0x01;
        let raw = RawCall::new(&frame).unwrap();
        assert_eq!(raw.opcode(), 0x0008);
        assert_eq!(raw.tid(), 3);
        assert_eq!(raw.callno(), 42);
        assert!(raw.is_synthetic());
        assert!(raw.payload().is_empty());
    }
}
