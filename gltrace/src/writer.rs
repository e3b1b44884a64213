use crate::record::CallRecord;
use crate::{RawCall, TraceError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Upper bound on the encoded size of a single record.
///
/// Records are serialized into one buffer before being written out, so this also bounds the
/// memory the writer needs for any single record.
pub const MAX_RECORD_SIZE: usize = 150 * 1024 * 1024;

/// Sequential writer for a trace container.
///
/// The header has to be written exactly once, before the first call. A record that does not fit
/// the size limit is rejected before any of its bytes reach the output.
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    writer: W,
    buffer: Vec<u8>,
    limit: usize,
    header_written: bool,
    records: usize,
}

impl TraceWriter<BufWriter<File>> {
    /// Creates (or truncates) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::with_capacity(4096),
            limit: MAX_RECORD_SIZE,
            header_written: false,
            records: 0,
        }
    }

    /// Overrides [`MAX_RECORD_SIZE`]. The frame length field is 32 bits wide, so larger limits are
    /// clamped.
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.limit = limit.min(u32::MAX as usize);
        self
    }

    pub fn record_limit(&self) -> usize {
        self.limit
    }

    /// Number of records appended so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Writes the length prefix followed by the header bytes.
    pub fn write_header(&mut self, header: &[u8]) -> Result<(), TraceError> {
        if self.header_written {
            return Err(TraceError::HeaderWritten);
        }
        if header.len() > self.limit {
            return Err(TraceError::SizeExceeded {
                size: header.len(),
                limit: self.limit,
            });
        }
        self.writer
            .write_all(&(header.len() as u32).to_le_bytes())?;
        self.writer.write_all(header)?;
        self.header_written = true;
        Ok(())
    }

    /// Encodes and appends one call.
    pub fn append(&mut self, call: &CallRecord<'_>) -> Result<(), TraceError> {
        self.check(call.encoded_len())?;
        self.buffer.clear();
        call.emit(&mut self.buffer);
        self.writer.write_all(&self.buffer)?;
        self.records += 1;
        Ok(())
    }

    /// Appends an already framed record without re-encoding it.
    pub fn append_raw(&mut self, raw: RawCall<'_>) -> Result<(), TraceError> {
        self.check(raw.len())?;
        self.writer.write_all(raw.bytes())?;
        self.records += 1;
        Ok(())
    }

    fn check(&self, size: usize) -> Result<(), TraceError> {
        if !self.header_written {
            return Err(TraceError::HeaderMissing);
        }
        if size > self.limit {
            return Err(TraceError::SizeExceeded {
                size,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Flushes buffered output and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, TraceError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::Registry;

    #[test]
    fn test_header_must_come_first_and_once() {
        let registry = Registry::gles();
        let finish = registry.by_name("glFinish").unwrap();
        let call = CallRecord::new(finish, 0, 0, vec![]).unwrap();

        let mut writer = TraceWriter::new(Vec::new());
        assert!(matches!(
            writer.append(&call),
            Err(TraceError::HeaderMissing)
        ));
        writer.write_header(b"{}").unwrap();
        assert!(matches!(
            writer.write_header(b"{}"),
            Err(TraceError::HeaderWritten)
        ));
        writer.append(&call).unwrap();

        let bytes = writer.finish().unwrap();
        assert_eq!(&bytes[..6], b"\x02\x00\x00\x00{}");
        assert_eq!(bytes.len(), 6 + call.encoded_len());
    }

    #[test]
    fn test_oversized_record_is_not_written() {
        let registry = Registry::gles();
        let data = registry.by_name("glClientSideBufferData").unwrap();
        let payload = vec![0u8; 256];
        let args = vec![
            Value::ClientSideBuffer(1),
            Value::Int64(payload.len() as i64),
            Value::blob(&payload),
        ];
        let call = CallRecord::new(data, 0, 0, args).unwrap();

        let mut writer = TraceWriter::new(Vec::new()).with_record_limit(128);
        writer.write_header(b"{}").unwrap();
        let err = writer.append(&call).unwrap_err();
        assert!(matches!(
            err,
            TraceError::SizeExceeded { size, limit: 128 } if size == call.encoded_len()
        ));
        assert_eq!(writer.records(), 0);

        let bytes = writer.finish().unwrap();
        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + header_len);
    }
}
