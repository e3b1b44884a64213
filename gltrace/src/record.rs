use crate::registry::{ArgKind, Registry, Signature};
use crate::{RawCall, FRAME_LEN};
use std::borrow::Cow;

bitflags::bitflags! {
    /// Per-record flags stored in the fixed part of every encoded call.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CallFlags: u8 {
        /// The call was injected by a rewrite and was never issued by the application.
        const SYNTHETIC = 0b0000_0001;
        /// A tagged return value follows the arguments.
        const RETURN = 0b0000_0010;
    }
}

/// Enumeration of the tags that prefix every encoded value.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueTag {
    Int32 = 0x01,
    UInt32 = 0x02,
    Int64 = 0x03,
    UInt64 = 0x04,
    Float = 0x05,
    Double = 0x06,
    Enum = 0x07,
    String = 0x10,
    Blob = 0x11,
    Array = 0x12,
    Pointer = 0x20,
    Null = 0x21,
    ClientSideBuffer = 0x30,
    ClientSideRef = 0x31,
}

impl ValueTag {
    /// Width of the payload for tags that may appear as array elements.
    fn scalar_width(&self) -> Option<usize> {
        match self {
            Self::Int32 | Self::UInt32 | Self::Float | Self::Enum => Some(4),
            Self::Int64 | Self::UInt64 | Self::Double | Self::Pointer => Some(8),
            _ => None,
        }
    }
}

impl TryFrom<u8> for ValueTag {
    type Error = UnknownValueTag;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Int32),
            0x02 => Ok(Self::UInt32),
            0x03 => Ok(Self::Int64),
            0x04 => Ok(Self::UInt64),
            0x05 => Ok(Self::Float),
            0x06 => Ok(Self::Double),
            0x07 => Ok(Self::Enum),
            0x10 => Ok(Self::String),
            0x11 => Ok(Self::Blob),
            0x12 => Ok(Self::Array),
            0x20 => Ok(Self::Pointer),
            0x21 => Ok(Self::Null),
            0x30 => Ok(Self::ClientSideBuffer),
            0x31 => Ok(Self::ClientSideRef),
            _ => Err(UnknownValueTag(value)),
        }
    }
}

impl std::fmt::Display for ValueTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A typed argument or return value.
///
/// # Format
///
/// `| tag: u8 | payload |`
///
/// Scalars are stored little endian with their natural width. `String` and `Blob` payloads are
/// `| len: u32 | bytes: [u8; len] |`, see [`Array`] for arrays and [`Value::ClientSideRef`] for
/// references into client-side buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'d> {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Enum(u32),
    /// Raw string bytes. GL strings are not required to be valid UTF-8.
    String(Cow<'d, [u8]>),
    Blob(Cow<'d, [u8]>),
    Array(Array<'d>),
    /// Opaque address or handle recorded from the application.
    Pointer(u64),
    Null,
    /// Id of a client-side buffer within the namespace of the calling thread.
    ClientSideBuffer(u32),
    /// A pointer into a client-side buffer.
    ///
    /// `| buffer: u32 | offset: u64 |`
    ClientSideRef { buffer: u32, offset: u64 },
}

impl<'d> Value<'d> {
    /// Returns the tag this value is encoded with.
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Int32(_) => ValueTag::Int32,
            Self::UInt32(_) => ValueTag::UInt32,
            Self::Int64(_) => ValueTag::Int64,
            Self::UInt64(_) => ValueTag::UInt64,
            Self::Float(_) => ValueTag::Float,
            Self::Double(_) => ValueTag::Double,
            Self::Enum(_) => ValueTag::Enum,
            Self::String(_) => ValueTag::String,
            Self::Blob(_) => ValueTag::Blob,
            Self::Array(_) => ValueTag::Array,
            Self::Pointer(_) => ValueTag::Pointer,
            Self::Null => ValueTag::Null,
            Self::ClientSideBuffer(_) => ValueTag::ClientSideBuffer,
            Self::ClientSideRef { .. } => ValueTag::ClientSideRef,
        }
    }

    /// Creates a string value from borrowed text.
    pub fn str(s: &'d str) -> Self {
        Self::String(Cow::from(s.as_bytes()))
    }

    /// Creates a blob value from borrowed bytes.
    pub fn blob(bytes: &'d [u8]) -> Self {
        Self::Blob(Cow::from(bytes))
    }

    /// Returns the id of the client-side buffer this value refers to, if any.
    pub fn client_side_id(&self) -> Option<u32> {
        match self {
            Self::ClientSideBuffer(id) => Some(*id),
            Self::ClientSideRef { buffer, .. } => Some(*buffer),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) | Self::Enum(v) | Self::ClientSideBuffer(v) => Some(*v),
            Self::Int32(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(*v as i64),
            Self::UInt32(v) | Self::Enum(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Interprets the value as a recorded handle. `Null` is handle zero.
    pub fn as_handle(&self) -> Option<u64> {
        match self {
            Self::Pointer(v) => Some(*v),
            Self::Null => Some(0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) | Self::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Length in bytes of the encoded value, tag included.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Int32(_) | Self::UInt32(_) | Self::Float(_) | Self::Enum(_) => 4,
            Self::Int64(_) | Self::UInt64(_) | Self::Double(_) | Self::Pointer(_) => 8,
            Self::String(bytes) | Self::Blob(bytes) => 4 + bytes.len(),
            Self::Array(array) => 1 + 4 + array.payload.len(),
            Self::Null => 0,
            Self::ClientSideBuffer(_) => 4,
            Self::ClientSideRef { .. } => 4 + 8,
        }
    }

    pub(crate) fn parse(bytes: &'d [u8]) -> Result<(Self, &'d [u8]), ParseError> {
        let (&tag, rest) = bytes.split_first().ok_or(Error::NotEnoughBytes)?;
        let tag = ValueTag::try_from(tag)?;
        let parsed = match tag {
            ValueTag::Int32 => take_i32(rest).map(|(v, r)| (Self::Int32(v), r))?,
            ValueTag::UInt32 => take_u32(rest).map(|(v, r)| (Self::UInt32(v), r))?,
            ValueTag::Int64 => take_i64(rest).map(|(v, r)| (Self::Int64(v), r))?,
            ValueTag::UInt64 => take_u64(rest).map(|(v, r)| (Self::UInt64(v), r))?,
            ValueTag::Float => take_f32(rest).map(|(v, r)| (Self::Float(v), r))?,
            ValueTag::Double => take_f64(rest).map(|(v, r)| (Self::Double(v), r))?,
            ValueTag::Enum => take_u32(rest).map(|(v, r)| (Self::Enum(v), r))?,
            ValueTag::String => {
                let (contents, rest) = take_sized(rest)?;
                (Self::String(Cow::from(contents)), rest)
            }
            ValueTag::Blob => {
                let (contents, rest) = take_sized(rest)?;
                (Self::Blob(Cow::from(contents)), rest)
            }
            ValueTag::Array => {
                let (array, rest) = Array::parse(rest)?;
                (Self::Array(array), rest)
            }
            ValueTag::Pointer => take_u64(rest).map(|(v, r)| (Self::Pointer(v), r))?,
            ValueTag::Null => (Self::Null, rest),
            ValueTag::ClientSideBuffer => {
                take_u32(rest).map(|(v, r)| (Self::ClientSideBuffer(v), r))?
            }
            ValueTag::ClientSideRef => {
                let (buffer, rest) = take_u32(rest)?;
                let (offset, rest) = take_u64(rest)?;
                (Self::ClientSideRef { buffer, offset }, rest)
            }
        };
        Ok(parsed)
    }

    pub(crate) fn emit(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.tag() as u8);
        match self {
            Self::Int32(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            Self::UInt32(v) | Self::Enum(v) | Self::ClientSideBuffer(v) => {
                buffer.extend_from_slice(&v.to_le_bytes())
            }
            Self::Int64(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            Self::UInt64(v) | Self::Pointer(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            Self::Float(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            Self::Double(v) => buffer.extend_from_slice(&v.to_le_bytes()),
            Self::String(bytes) | Self::Blob(bytes) => {
                buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buffer.extend_from_slice(bytes);
            }
            Self::Array(array) => array.emit(buffer),
            Self::Null => {}
            Self::ClientSideRef { buffer: id, offset } => {
                buffer.extend_from_slice(&id.to_le_bytes());
                buffer.extend_from_slice(&offset.to_le_bytes());
            }
        }
    }

    pub fn into_owned(self) -> Value<'static> {
        match self {
            Self::Int32(v) => Value::Int32(v),
            Self::UInt32(v) => Value::UInt32(v),
            Self::Int64(v) => Value::Int64(v),
            Self::UInt64(v) => Value::UInt64(v),
            Self::Float(v) => Value::Float(v),
            Self::Double(v) => Value::Double(v),
            Self::Enum(v) => Value::Enum(v),
            Self::String(bytes) => Value::String(Cow::from(bytes.into_owned())),
            Self::Blob(bytes) => Value::Blob(Cow::from(bytes.into_owned())),
            Self::Array(array) => Value::Array(array.into_owned()),
            Self::Pointer(v) => Value::Pointer(v),
            Self::Null => Value::Null,
            Self::ClientSideBuffer(v) => Value::ClientSideBuffer(v),
            Self::ClientSideRef { buffer, offset } => Value::ClientSideRef { buffer, offset },
        }
    }
}

impl std::fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Enum(v) => write!(f, "{v:#06x}"),
            Self::String(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Self::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
            Self::Array(array) => {
                write!(f, "[")?;
                for (i, value) in array.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Self::Pointer(v) => write!(f, "{v:#x}"),
            Self::Null => write!(f, "NULL"),
            Self::ClientSideBuffer(id) => write!(f, "cs#{id}"),
            Self::ClientSideRef { buffer, offset } => write!(f, "cs#{buffer}+{offset:#x}"),
        }
    }
}

/// Homogeneous array of scalar values, such as an EGL attribute list.
///
/// # Format
///
/// `| elem: u8 | count: u32 | payload: [u8; count * width(elem)] |`
///
/// The payload is kept in its encoded form and decoded lazily by [`Array::iter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Array<'d> {
    elem: ValueTag,
    count: u32,
    payload: Cow<'d, [u8]>,
}

impl Array<'static> {
    pub fn from_i32s(values: &[i32]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for value in values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        Self {
            elem: ValueTag::Int32,
            count: values.len() as u32,
            payload: Cow::from(payload),
        }
    }

    pub fn from_u32s(values: &[u32]) -> Self {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for value in values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        Self {
            elem: ValueTag::UInt32,
            count: values.len() as u32,
            payload: Cow::from(payload),
        }
    }
}

impl<'d> Array<'d> {
    /// Returns the tag shared by every element.
    pub fn element(&self) -> ValueTag {
        self.elem
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Value<'static>> + '_ {
        let width = self.elem.scalar_width().unwrap_or(0);
        self.payload
            .chunks_exact(width.max(1))
            .take(self.count as usize)
            .filter_map(move |chunk| {
                let mut tagged = Vec::with_capacity(1 + width);
                tagged.push(self.elem as u8);
                tagged.extend_from_slice(chunk);
                Value::parse(&tagged).ok().map(|(value, _)| value.into_owned())
            })
    }

    /// Returns the elements as 32-bit integers when the array holds 32-bit integers or enums.
    pub fn to_i32s(&self) -> Option<Vec<i32>> {
        match self.elem {
            ValueTag::Int32 | ValueTag::UInt32 | ValueTag::Enum => Some(
                self.payload
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn parse(bytes: &'d [u8]) -> Result<(Self, &'d [u8]), ParseError> {
        let (&elem, rest) = bytes.split_first().ok_or(Error::NotEnoughBytes)?;
        let elem = ValueTag::try_from(elem)?;
        let width = elem.scalar_width().ok_or(Error::BadArrayElement(elem))?;
        let (count, rest) = take_u32(rest)?;
        let size = (count as usize)
            .checked_mul(width)
            .ok_or(Error::NotEnoughBytes)?;
        if rest.len() < size {
            return Err(Error::NotEnoughBytes)?;
        }
        let (payload, rest) = rest.split_at(size);
        Ok((
            Self {
                elem,
                count,
                payload: Cow::from(payload),
            },
            rest,
        ))
    }

    fn emit(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.elem as u8);
        buffer.extend_from_slice(&self.count.to_le_bytes());
        buffer.extend_from_slice(&self.payload);
    }

    pub fn into_owned(self) -> Array<'static> {
        let Self {
            elem,
            count,
            payload,
        } = self;
        Array {
            elem,
            count,
            payload: Cow::from(payload.into_owned()),
        }
    }
}

/// One recorded API invocation.
///
/// # Format
///
/// `| opcode: u16 | tid: u32 | callno: u32 | argc: u8 | flags: u8 | rlen: u32 | args: [Value; argc] | ret: Value? |`
///
/// All integers are little endian. `rlen` is the length of the whole record, including the
/// fixed part. The return value is present only when [`CallFlags::RETURN`] is set.
///
/// A record is checked against its [`Signature`] when it is built or parsed and cannot be changed
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord<'d> {
    opcode: u16,
    name: &'static str,
    tid: u32,
    callno: u32,
    flags: CallFlags,
    args: Vec<Value<'d>>,
    ret: Option<Value<'d>>,
}

impl<'d> CallRecord<'d> {
    /// Builds a call, validating the arguments against `signature`.
    pub fn new(
        signature: &Signature,
        tid: u32,
        callno: u32,
        args: Vec<Value<'d>>,
    ) -> Result<Self, Error> {
        if args.len() > u8::MAX as usize {
            return Err(Error::record(
                signature.name,
                Error::ArityMismatch {
                    expected: u8::MAX as usize,
                    found: args.len(),
                },
            ));
        }
        if args.len() != signature.arity() {
            return Err(Error::record(
                signature.name,
                Error::ArityMismatch {
                    expected: signature.arity(),
                    found: args.len(),
                },
            ));
        }
        for (position, (kind, value)) in signature.args.iter().zip(args.iter()).enumerate() {
            if !kind.accepts(value) {
                return Err(Error::record(
                    signature.name,
                    Error::KindMismatch {
                        position,
                        expected: *kind,
                        found: value.tag(),
                    },
                ));
            }
        }
        Ok(Self {
            opcode: signature.opcode,
            name: signature.name,
            tid,
            callno,
            flags: CallFlags::empty(),
            args,
            ret: None,
        })
    }

    /// Attaches the recorded return value.
    pub fn with_return(mut self, signature: &Signature, value: Value<'d>) -> Result<Self, Error> {
        let Some(expected) = signature.ret else {
            return Err(Error::record(signature.name, Error::UnexpectedReturn));
        };
        if !expected.accepts(&value) {
            return Err(Error::record(
                signature.name,
                Error::ReturnMismatch {
                    expected,
                    found: value.tag(),
                },
            ));
        }
        self.flags |= CallFlags::RETURN;
        self.ret = Some(value);
        Ok(self)
    }

    /// Marks the call as injected by a rewrite.
    pub fn into_synthetic(mut self) -> Self {
        self.flags |= CallFlags::SYNTHETIC;
        self
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    pub fn callno(&self) -> u32 {
        self.callno
    }

    pub fn flags(&self) -> CallFlags {
        self.flags
    }

    pub fn is_synthetic(&self) -> bool {
        self.flags.contains(CallFlags::SYNTHETIC)
    }

    pub fn args(&self) -> &[Value<'d>] {
        &self.args
    }

    pub fn arg(&self, position: usize) -> Option<&Value<'d>> {
        self.args.get(position)
    }

    pub fn ret(&self) -> Option<&Value<'d>> {
        self.ret.as_ref()
    }

    /// Parses a framed [`RawCall`], resolving its opcode through `registry`.
    ///
    /// Parsing fails if the opcode is unknown, if the number or kinds of the arguments do not
    /// match the signature, if a return value is present for a call that declares none, or if the
    /// frame contains bytes after the last value.
    pub fn parse(raw: RawCall<'d>, registry: &Registry) -> Result<Self, ParseError> {
        let signature = registry
            .by_opcode(raw.opcode())
            .ok_or(Error::UnknownOpcode(raw.opcode()))?;
        Self::parse_with(raw, signature).map_err(|e| Error::wrap(signature.name, e).into())
    }

    fn parse_with(raw: RawCall<'d>, signature: &Signature) -> Result<Self, ParseError> {
        let flags = CallFlags::from_bits(raw.flags()).ok_or(Error::BadFlags(raw.flags()))?;
        if raw.argc() as usize != signature.arity() {
            return Err(Error::ArityMismatch {
                expected: signature.arity(),
                found: raw.argc() as usize,
            })?;
        }

        let mut rest = raw.payload();
        let mut args = Vec::with_capacity(signature.arity());
        for (position, kind) in signature.args.iter().enumerate() {
            let (value, remaining) = Value::parse(rest)?;
            if !kind.accepts(&value) {
                return Err(Error::KindMismatch {
                    position,
                    expected: *kind,
                    found: value.tag(),
                })?;
            }
            args.push(value);
            rest = remaining;
        }

        let ret = if flags.contains(CallFlags::RETURN) {
            let expected = signature.ret.ok_or(Error::UnexpectedReturn)?;
            let (value, remaining) = Value::parse(rest)?;
            if !expected.accepts(&value) {
                return Err(Error::ReturnMismatch {
                    expected,
                    found: value.tag(),
                })?;
            }
            rest = remaining;
            Some(value)
        } else {
            None
        };

        if !rest.is_empty() {
            return Err(Error::TrailingBytes(rest.len()))?;
        }

        Ok(Self {
            opcode: signature.opcode,
            name: signature.name,
            tid: raw.tid(),
            callno: raw.callno(),
            flags,
            args,
            ret,
        })
    }

    /// Length in bytes of the encoded record.
    pub fn encoded_len(&self) -> usize {
        FRAME_LEN
            + self.args.iter().map(Value::encoded_len).sum::<usize>()
            + self.ret.as_ref().map_or(0, Value::encoded_len)
    }

    /// Write a serialized record into the provided buffer.
    ///
    /// Callers that need to bound memory must check [`CallRecord::encoded_len`] first; this
    /// method always writes the full record.
    pub fn emit(&self, buffer: &mut Vec<u8>) {
        let rlen = self.encoded_len() as u32;
        buffer.reserve(rlen as usize);
        buffer.extend_from_slice(&self.opcode.to_le_bytes());
        buffer.extend_from_slice(&self.tid.to_le_bytes());
        buffer.extend_from_slice(&self.callno.to_le_bytes());
        buffer.push(self.args.len() as u8);
        buffer.push(self.flags.bits());
        buffer.extend_from_slice(&rlen.to_le_bytes());
        for arg in self.args.iter() {
            arg.emit(buffer);
        }
        if let Some(ret) = &self.ret {
            ret.emit(buffer);
        }
    }

    pub fn into_owned(self) -> CallRecord<'static> {
        let Self {
            opcode,
            name,
            tid,
            callno,
            flags,
            args,
            ret,
        } = self;
        CallRecord {
            opcode,
            name,
            tid,
            callno,
            flags,
            args: args.into_iter().map(Value::into_owned).collect(),
            ret: ret.map(Value::into_owned),
        }
    }
}

impl std::fmt::Display for CallRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}(", self.callno, self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")?;
        if let Some(ret) = &self.ret {
            write!(f, " = {ret}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ParseError(#[from] Error);

impl From<UnknownValueTag> for ParseError {
    fn from(err: UnknownValueTag) -> Self {
        Self(Error::from(err))
    }
}

impl ParseError {
    pub fn into_inner(self) -> Error {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse {0:} call")]
    ParseRecord(String, #[source] Box<Error>),

    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    #[error("call '{0}' is not registered")]
    UnregisteredCall(String),

    #[error(transparent)]
    UnknownValueTag(#[from] UnknownValueTag),

    #[error("array elements of kind {0} are not supported")]
    BadArrayElement(ValueTag),

    #[error("record data does not contain enough bytes")]
    NotEnoughBytes,

    #[error("record contains {0} bytes after its last value")]
    TrailingBytes(usize),

    #[error("record frame declares {0} bytes")]
    BadFrame(u32),

    #[error("record flags {0:#04x} are not valid")]
    BadFlags(u8),

    #[error("expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("argument {position} should be {expected}, found {found}")]
    KindMismatch {
        position: usize,
        expected: ArgKind,
        found: ValueTag,
    },

    #[error("return value should be {expected}, found {found}")]
    ReturnMismatch { expected: ArgKind, found: ValueTag },

    #[error("call does not return a value but a return value was recorded")]
    UnexpectedReturn,

    #[error("call {found} does not follow call {previous}")]
    CallOrder { previous: u32, found: u32 },

    #[error("synthetic call {found} does not follow the call it was injected after")]
    OrphanSynthetic { found: u32 },
}

impl Error {
    fn record(s: &str, e: Error) -> Self {
        Self::ParseRecord(String::from(s), Box::new(e))
    }

    fn wrap(s: &str, e: ParseError) -> Self {
        Self::ParseRecord(String::from(s), Box::new(e.0))
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown value tag: {0:#04x}")]
pub struct UnknownValueTag(u8);

macro_rules! generate_take_func {
    ($name:ident,$ty:ty,$impl:expr) => {
        pub fn $name(bytes: &[u8]) -> Result<($ty, &[u8]), ParseError> {
            let mut buffer = [0u8; ::std::mem::size_of::<$ty>()];
            if bytes.len() < ::std::mem::size_of::<$ty>() {
                Err(Error::NotEnoughBytes)?;
            }
            let (left, right) = bytes.split_at(::std::mem::size_of::<$ty>());
            buffer.as_mut_slice().copy_from_slice(left);
            Ok(($impl(buffer), right))
        }
    };
}

generate_take_func!(take_u32, u32, u32::from_le_bytes);
generate_take_func!(take_i32, i32, i32::from_le_bytes);
generate_take_func!(take_u64, u64, u64::from_le_bytes);
generate_take_func!(take_i64, i64, i64::from_le_bytes);
generate_take_func!(take_f32, f32, f32::from_le_bytes);
generate_take_func!(take_f64, f64, f64::from_le_bytes);

fn take_sized(bytes: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    let (len, rest) = take_u32(bytes)?;
    if rest.len() < len as usize {
        return Err(Error::NotEnoughBytes)?;
    }
    Ok(rest.split_at(len as usize))
}
