//! Opcode to call signature mapping.
//!
//! Every encoded call starts with a 16-bit opcode. The registry resolves that opcode to the call
//! name, the kinds of its arguments and the kind of its return value so that the argument payloads
//! that follow can be decoded without any other schema. The table is open: the built-in GLES/EGL
//! subset can be extended with [`Registry::register`].
use crate::record::Value;
use hashbrown::HashMap;

/// Kind of an argument or return value as declared by a [`Signature`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgKind {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Enum,
    String,
    Blob,
    Array,
    Pointer,
    ClientSideBuffer,
}

impl ArgKind {
    /// Returns true if a value of this shape may be passed where this kind is declared.
    pub fn accepts(&self, value: &Value<'_>) -> bool {
        match (self, value) {
            (Self::Int32, Value::Int32(_)) => true,
            (Self::UInt32, Value::UInt32(_)) => true,
            (Self::Int64, Value::Int64(_)) => true,
            (Self::UInt64, Value::UInt64(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Double, Value::Double(_)) => true,
            (Self::Enum, Value::Enum(_)) => true,
            (Self::String, Value::String(_) | Value::Null) => true,
            (Self::Blob, Value::Blob(_) | Value::Null) => true,
            (Self::Array, Value::Array(_) | Value::Null) => true,
            (
                Self::Pointer,
                Value::Pointer(_) | Value::Null | Value::Blob(_) | Value::ClientSideRef { .. },
            ) => true,
            (Self::ClientSideBuffer, Value::ClientSideBuffer(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ArgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Static description of one API entry point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub opcode: u16,
    pub name: &'static str,
    pub args: &'static [ArgKind],
    pub ret: Option<ArgKind>,
}

impl Signature {
    pub const fn new(
        opcode: u16,
        name: &'static str,
        args: &'static [ArgKind],
        ret: Option<ArgKind>,
    ) -> Self {
        Self {
            opcode,
            name,
            args,
            ret,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

/// Name of the call injected by the client-side lifetime rewrite.
pub const DELETE_CLIENT_SIDE_BUFFER: &str = "glDeleteClientSideBuffer";

use builtin::BUILTIN;

mod builtin {
    use super::ArgKind::{self, *};
    use super::Signature;

    const EGL_BOOL: Option<ArgKind> = Some(Int32);
    const HANDLE: Option<ArgKind> = Some(Pointer);

    pub(super) static BUILTIN: phf::Map<&'static str, Signature> = phf::phf_map! {
        "eglGetDisplay" => Signature::new(0x0001, "eglGetDisplay", &[Pointer], HANDLE),
        "eglInitialize" => Signature::new(0x0002, "eglInitialize", &[Pointer, Pointer, Pointer], EGL_BOOL),
        "eglChooseConfig" => Signature::new(0x0003, "eglChooseConfig", &[Pointer, Array, Pointer, Int32, Pointer], EGL_BOOL),
        "eglCreateWindowSurface" => Signature::new(0x0004, "eglCreateWindowSurface", &[Pointer, Pointer, Pointer, Array], HANDLE),
        "eglCreatePbufferSurface" => Signature::new(0x0005, "eglCreatePbufferSurface", &[Pointer, Pointer, Array], HANDLE),
        "eglCreateContext" => Signature::new(0x0006, "eglCreateContext", &[Pointer, Pointer, Pointer, Array], HANDLE),
        "eglMakeCurrent" => Signature::new(0x0007, "eglMakeCurrent", &[Pointer, Pointer, Pointer, Pointer], EGL_BOOL),
        "eglSwapBuffers" => Signature::new(0x0008, "eglSwapBuffers", &[Pointer, Pointer], EGL_BOOL),
        "eglDestroySurface" => Signature::new(0x0009, "eglDestroySurface", &[Pointer, Pointer], EGL_BOOL),
        "eglDestroyContext" => Signature::new(0x000a, "eglDestroyContext", &[Pointer, Pointer], EGL_BOOL),
        "eglCreateImageKHR" => Signature::new(0x000b, "eglCreateImageKHR", &[Pointer, Pointer, Enum, Pointer, Array], HANDLE),
        "eglDestroyImageKHR" => Signature::new(0x000c, "eglDestroyImageKHR", &[Pointer, Pointer], EGL_BOOL),
        "eglTerminate" => Signature::new(0x000d, "eglTerminate", &[Pointer], EGL_BOOL),

        "glViewport" => Signature::new(0x0100, "glViewport", &[Int32, Int32, Int32, Int32], None),
        "glClearColor" => Signature::new(0x0101, "glClearColor", &[Float, Float, Float, Float], None),
        "glClear" => Signature::new(0x0102, "glClear", &[UInt32], None),
        "glEnable" => Signature::new(0x0103, "glEnable", &[Enum], None),
        "glDisable" => Signature::new(0x0104, "glDisable", &[Enum], None),
        "glBindBuffer" => Signature::new(0x0105, "glBindBuffer", &[Enum, UInt32], None),
        "glBufferData" => Signature::new(0x0106, "glBufferData", &[Enum, Int64, Blob, Enum], None),
        "glActiveTexture" => Signature::new(0x0107, "glActiveTexture", &[Enum], None),
        "glBindTexture" => Signature::new(0x0108, "glBindTexture", &[Enum, UInt32], None),
        "glPixelStorei" => Signature::new(0x0109, "glPixelStorei", &[Enum, Int32], None),
        "glTexImage2D" => Signature::new(0x010a, "glTexImage2D", &[Enum, Int32, Int32, Int32, Int32, Int32, Enum, Enum, Blob], None),
        "glTexParameteri" => Signature::new(0x010b, "glTexParameteri", &[Enum, Enum, Int32], None),
        "glEGLImageTargetTexture2DOES" => Signature::new(0x010c, "glEGLImageTargetTexture2DOES", &[Enum, Pointer], None),
        "glCreateProgram" => Signature::new(0x010d, "glCreateProgram", &[], Some(UInt32)),
        "glCreateShader" => Signature::new(0x010e, "glCreateShader", &[Enum], Some(UInt32)),
        "glShaderSource" => Signature::new(0x010f, "glShaderSource", &[UInt32, String], None),
        "glCompileShader" => Signature::new(0x0110, "glCompileShader", &[UInt32], None),
        "glAttachShader" => Signature::new(0x0111, "glAttachShader", &[UInt32, UInt32], None),
        "glLinkProgram" => Signature::new(0x0112, "glLinkProgram", &[UInt32], None),
        "glUseProgram" => Signature::new(0x0113, "glUseProgram", &[UInt32], None),
        "glGetUniformLocation" => Signature::new(0x0114, "glGetUniformLocation", &[UInt32, String], Some(Int32)),
        "glUniform1i" => Signature::new(0x0115, "glUniform1i", &[Int32, Int32], None),
        "glEnableVertexAttribArray" => Signature::new(0x0116, "glEnableVertexAttribArray", &[UInt32], None),
        "glVertexAttribPointer" => Signature::new(0x0117, "glVertexAttribPointer", &[UInt32, Int32, Enum, Int32, Int32, Pointer], None),
        "glDrawArrays" => Signature::new(0x0118, "glDrawArrays", &[Enum, Int32, Int32], None),
        "glDrawElements" => Signature::new(0x0119, "glDrawElements", &[Enum, Int32, Enum, Pointer], None),
        "glDeleteShader" => Signature::new(0x011a, "glDeleteShader", &[UInt32], None),
        "glDeleteProgram" => Signature::new(0x011b, "glDeleteProgram", &[UInt32], None),
        "glFlush" => Signature::new(0x011c, "glFlush", &[], None),
        "glFinish" => Signature::new(0x011d, "glFinish", &[], None),

        "glCreateClientSideBuffer" => Signature::new(0x0200, "glCreateClientSideBuffer", &[], Some(ClientSideBuffer)),
        "glDeleteClientSideBuffer" => Signature::new(0x0201, "glDeleteClientSideBuffer", &[ClientSideBuffer], None),
        "glClientSideBufferData" => Signature::new(0x0202, "glClientSideBufferData", &[ClientSideBuffer, Int64, Blob], None),
        "glClientSideBufferSubData" => Signature::new(0x0203, "glClientSideBufferSubData", &[ClientSideBuffer, Int64, Int64, Blob], None),
        "glCopyClientSideBuffer" => Signature::new(0x0204, "glCopyClientSideBuffer", &[Enum, ClientSideBuffer], None),
        "glPatchClientSideBuffer" => Signature::new(0x0205, "glPatchClientSideBuffer", &[Enum, ClientSideBuffer, Blob], None),
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("opcode {0:#06x} is already registered")]
    DuplicateOpcode(u16),

    #[error("call '{0}' is already registered")]
    DuplicateName(&'static str),

    #[error("call '{name}' takes {arity} arguments, at most 255 can be encoded")]
    TooManyArguments { name: &'static str, arity: usize },
}

/// Lookup table from opcodes and call names to [`Signature`]s.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_opcode: HashMap<u16, Signature>,
    by_name: HashMap<&'static str, u16>,
}

impl Registry {
    /// Creates a registry with no signatures.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the built-in GLES/EGL subset.
    pub fn gles() -> Self {
        let mut registry = Self::empty();
        for signature in BUILTIN.values() {
            registry.by_opcode.insert(signature.opcode, *signature);
            registry.by_name.insert(signature.name, signature.opcode);
        }
        registry
    }

    /// Adds a signature to the table. Opcodes and names must both be unused.
    pub fn register(&mut self, signature: Signature) -> Result<(), RegistryError> {
        if signature.arity() > u8::MAX as usize {
            return Err(RegistryError::TooManyArguments {
                name: signature.name,
                arity: signature.arity(),
            });
        }
        if self.by_opcode.contains_key(&signature.opcode) {
            return Err(RegistryError::DuplicateOpcode(signature.opcode));
        }
        if self.by_name.contains_key(signature.name) {
            return Err(RegistryError::DuplicateName(signature.name));
        }
        self.by_opcode.insert(signature.opcode, signature);
        self.by_name.insert(signature.name, signature.opcode);
        Ok(())
    }

    #[inline]
    pub fn by_opcode(&self, opcode: u16) -> Option<&Signature> {
        self.by_opcode.get(&opcode)
    }

    pub fn by_name(&self, name: &str) -> Option<&Signature> {
        self.by_name
            .get(name)
            .and_then(|opcode| self.by_opcode.get(opcode))
    }

    pub fn len(&self) -> usize {
        self.by_opcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_opcode.is_empty()
    }
}
