//! Forward-only access to the call stream of a trace container.
//!
//! [`TraceReader`] frames records out of any [`Read`] without decoding them. [`CallStream`] sits on
//! top of it, decodes every record against a [`Registry`], enforces call ordering and maintains the
//! client-side buffer [`LastUseTable`] as a side channel. Neither assumes the input is seekable:
//! restarting a [`CallStream`] reopens its [`TraceSource`].
use crate::lifetime::LastUseTable;
use crate::record::{CallRecord, Error};
use crate::registry::Registry;
use crate::writer::MAX_RECORD_SIZE;
use crate::{rlen, RawCall, TraceError, FRAME_LEN};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

pub use macros::{__cont as cont, __try_break as try_break, __try_cont as try_cont};

/// Frames raw records out of a trace container.
#[derive(Debug)]
pub struct TraceReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
    header: Vec<u8>,
    limit: usize,
    records: usize,
}

impl TraceReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read> TraceReader<R> {
    /// Creates a new TraceReader and consumes the header of the container.
    pub fn new(reader: R) -> Result<Self, TraceError> {
        Self::with_record_limit(reader, MAX_RECORD_SIZE)
    }

    /// Like [`TraceReader::new`], rejecting any record frame larger than `limit` bytes.
    pub fn with_record_limit(reader: R, limit: usize) -> Result<Self, TraceError> {
        let mut reader = BufReader::new(reader);
        let mut prefix = [0u8; 4];
        reader.read_exact(&mut prefix).map_err(missing_header)?;
        let header_len = u32::from_le_bytes(prefix);
        if header_len as usize > limit {
            return Err(TraceError::HeaderTooLarge(header_len));
        }
        let mut header = vec![0u8; header_len as usize];
        reader.read_exact(&mut header).map_err(missing_header)?;
        Ok(Self {
            reader,
            buffer: Vec::with_capacity(4096), // Should be a size most records will fit in.
            header,
            limit,
            records: 0,
        })
    }

    /// Returns the raw header bytes.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Number of records framed so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Returns the next record, `Ok(None)` at a clean end of stream, or an error if the stream
    /// ends inside a record or a frame is malformed.
    pub fn next(&mut self) -> Result<Option<RawCall<'_>>, TraceError> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        self.buffer.resize(FRAME_LEN, 0);
        self.reader
            .read_exact(&mut self.buffer[..FRAME_LEN])
            .map_err(truncated)?;
        let tlen = rlen(&self.buffer).ok_or(Error::NotEnoughBytes)?;
        if (tlen as usize) < FRAME_LEN || tlen as usize > self.limit {
            return Err(Error::BadFrame(tlen))?;
        }
        self.buffer.resize(tlen as usize, 0);
        self.reader
            .read_exact(&mut self.buffer[FRAME_LEN..])
            .map_err(truncated)?;
        self.records += 1;
        Ok(Some(RawCall::new(&self.buffer)?))
    }

    pub fn for_each<F, T>(&mut self, mut func: F) -> Result<Option<T>, TraceError>
    where
        F: FnMut(RawCall<'_>) -> ControlFlow<T>,
    {
        while let Some(item) = self.next()? {
            if let ControlFlow::Break(value) = func(item) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

fn missing_header(err: io::Error) -> TraceError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => TraceError::MissingHeader,
        _ => TraceError::Io(err),
    }
}

fn truncated(err: io::Error) -> TraceError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => TraceError::Truncated,
        _ => TraceError::Io(err),
    }
}

/// Something a trace can be (re)opened from for a fresh sequential scan.
pub trait TraceSource {
    fn open(&self) -> io::Result<Box<dyn Read + '_>>;

    /// Name used in logs and provenance entries.
    fn describe(&self) -> String;
}

impl TraceSource for Path {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self)?))
    }

    fn describe(&self) -> String {
        self.display().to_string()
    }
}

impl TraceSource for PathBuf {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        self.as_path().open()
    }

    fn describe(&self) -> String {
        self.as_path().describe()
    }
}

impl TraceSource for [u8] {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(self))
    }

    fn describe(&self) -> String {
        String::from("<memory>")
    }
}

impl TraceSource for Vec<u8> {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        self.as_slice().open()
    }

    fn describe(&self) -> String {
        self.as_slice().describe()
    }
}

/// Decoded, ordered sequence of [`CallRecord`]s over a restartable [`TraceSource`].
pub struct CallStream<'s> {
    source: &'s dyn TraceSource,
    registry: &'s Registry,
    reader: TraceReader<Box<dyn Read + 's>>,
    usage: LastUseTable,
    previous: Option<u32>,
}

impl<'s> CallStream<'s> {
    pub fn open(source: &'s dyn TraceSource, registry: &'s Registry) -> Result<Self, TraceError> {
        let reader = TraceReader::new(source.open()?)?;
        Ok(Self {
            source,
            registry,
            reader,
            usage: LastUseTable::default(),
            previous: None,
        })
    }

    pub fn header(&self) -> &[u8] {
        self.reader.header()
    }

    pub fn source(&self) -> &'s dyn TraceSource {
        self.source
    }

    pub fn registry(&self) -> &'s Registry {
        self.registry
    }

    /// Number of records read since the stream was last (re)opened.
    pub fn records(&self) -> usize {
        self.reader.records()
    }

    /// Client-side buffer usage observed so far.
    pub fn last_use(&self) -> &LastUseTable {
        &self.usage
    }

    /// Moves the observed usage out of the stream, leaving an empty table behind.
    pub fn take_last_use(&mut self) -> LastUseTable {
        std::mem::take(&mut self.usage)
    }

    /// Reopens the source and positions the stream before its first record.
    ///
    /// Usage observed so far is kept; call [`CallStream::take_last_use`] first to start over.
    pub fn restart(&mut self) -> Result<(), TraceError> {
        self.reader = TraceReader::new(self.source.open()?)?;
        self.previous = None;
        Ok(())
    }

    /// Decodes the next call, or returns `Ok(None)` at the end of the stream.
    pub fn next_call(&mut self) -> Result<Option<CallRecord<'_>>, TraceError> {
        let Some(raw) = self.reader.next()? else {
            return Ok(None);
        };
        let call = raw.parse(self.registry)?;
        check_order(&mut self.previous, &call)?;
        self.usage.observe(&call);
        Ok(Some(call))
    }

    pub fn for_each<F, T>(&mut self, mut func: F) -> Result<Option<T>, TraceError>
    where
        F: FnMut(&CallRecord<'_>) -> ControlFlow<T>,
    {
        while let Some(call) = self.next_call()? {
            if let ControlFlow::Break(value) = func(&call) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Recorded calls must have strictly increasing call numbers. Synthetic calls share the number of
/// the recorded call they were injected after.
fn check_order(previous: &mut Option<u32>, call: &CallRecord<'_>) -> Result<(), Error> {
    let found = call.callno();
    match (*previous, call.is_synthetic()) {
        (Some(prev), true) if prev == found => Ok(()),
        (_, true) => Err(Error::OrphanSynthetic { found }),
        (Some(prev), false) if found <= prev => Err(Error::CallOrder {
            previous: prev,
            found,
        }),
        (_, false) => {
            *previous = Some(found);
            Ok(())
        }
    }
}

mod macros {
    #[macro_export]
    macro_rules! __try_break {
        ($expr:expr $(,)?) => {
            match $expr {
                ::core::result::Result::Ok(val) => val,
                ::core::result::Result::Err(err) => {
                    return ::core::ops::ControlFlow::Break(::core::convert::From::from(err));
                }
            }
        };
    }

    #[macro_export]
    macro_rules! __try_cont {
        ($expr:expr $(,)?) => {
            match $expr {
                ::core::result::Result::Ok(val) => val,
                ::core::result::Result::Err(_) => {
                    return ::core::ops::ControlFlow::Continue(());
                }
            }
        };
    }

    #[macro_export]
    macro_rules! __cont {
        () => {{
            return ::core::ops::ControlFlow::Continue(());
        }};
    }

    pub use __cont;
    pub use __try_break;
    pub use __try_cont;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::writer::TraceWriter;

    fn trace(calls: &[(u32, u32, bool)]) -> Vec<u8> {
        let registry = Registry::gles();
        let finish = registry.by_name("glFinish").unwrap();
        let mut writer = TraceWriter::new(Vec::new());
        writer.write_header(b"{}").unwrap();
        for &(tid, callno, synthetic) in calls {
            let call = CallRecord::new(finish, tid, callno, vec![]).unwrap();
            let call = if synthetic { call.into_synthetic() } else { call };
            writer.append(&call).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_reader_frames_records() {
        let bytes = trace(&[(0, 1, false), (1, 2, false)]);
        let mut reader = TraceReader::new(bytes.as_slice()).unwrap();
        assert_eq!(reader.header(), b"{}");
        let mut seen = Vec::new();
        let result = reader.for_each(|raw| -> ControlFlow<()> {
            seen.push((raw.tid(), raw.callno()));
            ControlFlow::Continue(())
        });
        assert!(matches!(result, Ok(None)));
        assert_eq!(seen, [(0, 1), (1, 2)]);
        assert_eq!(reader.records(), 2);
    }

    #[test]
    fn test_reader_reports_truncation() {
        let bytes = trace(&[(0, 1, false)]);
        let cut = &bytes[..bytes.len() - 3];
        let mut reader = TraceReader::new(cut).unwrap();
        assert!(matches!(reader.next(), Err(TraceError::Truncated)));

        assert!(matches!(
            TraceReader::new(&bytes[..2]),
            Err(TraceError::MissingHeader)
        ));
    }

    #[test]
    fn test_stream_enforces_call_order() {
        let registry = Registry::gles();
        let bytes = trace(&[(0, 5, false), (0, 5, true), (1, 4, false)]);
        let mut stream = CallStream::open(&bytes, &registry).unwrap();
        assert!(stream.next_call().unwrap().is_some());
        assert!(stream.next_call().unwrap().unwrap().is_synthetic());
        assert!(matches!(
            stream.next_call(),
            Err(TraceError::Record(Error::CallOrder {
                previous: 5,
                found: 4
            }))
        ));

        let bytes = trace(&[(0, 5, true)]);
        let mut stream = CallStream::open(&bytes, &registry).unwrap();
        assert!(matches!(
            stream.next_call(),
            Err(TraceError::Record(Error::OrphanSynthetic { found: 5 }))
        ));
    }

    #[test]
    fn test_stream_restart_reads_from_the_beginning() {
        let registry = Registry::gles();
        let data = registry.by_name("glClientSideBufferData").unwrap();
        let mut writer = TraceWriter::new(Vec::new());
        writer.write_header(b"").unwrap();
        let args = vec![Value::ClientSideBuffer(4), Value::Int64(3), Value::blob(b"abc")];
        writer
            .append(&CallRecord::new(data, 1, 0, args).unwrap())
            .unwrap();
        let bytes = writer.finish().unwrap();

        let mut stream = CallStream::open(&bytes, &registry).unwrap();
        let mut count = 0;
        stream
            .for_each(|_| -> ControlFlow<()> {
                count += 1;
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(stream.last_use().get(1, 4).map(|u| u.callno()), Some(0));

        stream.restart().unwrap();
        let call = stream.next_call().unwrap().unwrap();
        assert_eq!(call.arg(2).and_then(Value::as_bytes), Some(&b"abc"[..]));
        assert!(stream.next_call().unwrap().is_none());
        assert_eq!(count, 1);
        assert_eq!(stream.records(), 1);
    }
}
