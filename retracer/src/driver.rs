//! The seam between the replayer and the native graphics API.
use crate::drawable::SurfaceKind;
use gltrace::CallRecord;

/// Opaque handle returned by the native API.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{call}: {reason}")]
pub struct DriverError {
    pub call: &'static str,
    pub reason: String,
}

impl DriverError {
    pub fn new(call: &'static str, reason: impl Into<String>) -> Self {
        Self {
            call,
            reason: reason.into(),
        }
    }
}

/// An argument of a call translated to replay-side terms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operand<'m> {
    /// Client-side memory a pointer argument refers to.
    Memory { position: usize, bytes: &'m [u8] },
    /// Native image an `EGLImage` argument refers to.
    Image { position: usize, image: NativeHandle },
}

/// Native graphics API used by the replayer.
///
/// Everything that talks to a real window system or GL implementation lives behind this trait.
pub trait Driver {
    fn create_surface(
        &mut self,
        kind: SurfaceKind,
        width: u32,
        height: u32,
        attributes: &[i32],
    ) -> Result<NativeHandle, DriverError>;

    fn destroy_surface(&mut self, surface: NativeHandle) -> Result<(), DriverError>;

    fn create_context(
        &mut self,
        share: Option<NativeHandle>,
        attributes: &[i32],
    ) -> Result<NativeHandle, DriverError>;

    fn destroy_context(&mut self, context: NativeHandle) -> Result<(), DriverError>;

    /// Binds `surface` and `context` to the calling thread. `None` releases the binding.
    fn make_current(
        &mut self,
        surface: Option<NativeHandle>,
        context: Option<NativeHandle>,
    ) -> Result<(), DriverError>;

    fn swap_buffers(&mut self, surface: NativeHandle) -> Result<(), DriverError>;

    /// True if external buffers can be imported as images without a copy.
    fn supports_zero_copy(&self) -> bool;

    fn import_image(
        &mut self,
        context: Option<NativeHandle>,
        target: u32,
        buffer: u64,
        attributes: &[i32],
    ) -> Result<NativeHandle, DriverError>;

    fn destroy_image(&mut self, image: NativeHandle) -> Result<(), DriverError>;

    /// Issues any other call. Pointers into client-side buffers and image handles are already
    /// translated in `operands`.
    fn execute(&mut self, call: &CallRecord<'_>, operands: &[Operand<'_>]) -> Result<(), DriverError>;
}

/// A side effect observed by the [`RecordingDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SurfaceCreated {
        surface: NativeHandle,
        kind: SurfaceKind,
        width: u32,
        height: u32,
    },
    SurfaceDestroyed(NativeHandle),
    ContextCreated {
        context: NativeHandle,
        share: Option<NativeHandle>,
    },
    ContextDestroyed(NativeHandle),
    MadeCurrent {
        surface: Option<NativeHandle>,
        context: Option<NativeHandle>,
    },
    Swapped(NativeHandle),
    ImageImported {
        image: NativeHandle,
        target: u32,
        buffer: u64,
    },
    ImageDestroyed(NativeHandle),
    Executed {
        name: &'static str,
        callno: u32,
        tid: u32,
        /// Argument position and length of each resolved client-side pointer.
        memory: Vec<(usize, usize)>,
        images: Vec<(usize, NativeHandle)>,
    },
}

/// Driver that performs no rendering and only records what it was asked to do.
///
/// Handles are allocated from a counter starting at 1. Creation failures and the lack of zero-copy
/// import can be simulated.
#[derive(Debug, Clone)]
pub struct RecordingDriver {
    effects: Vec<Effect>,
    next_handle: u64,
    zero_copy: bool,
    fail_surfaces: bool,
    fail_contexts: bool,
    fail_destroys: bool,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self {
            effects: Vec::new(),
            next_handle: 1,
            zero_copy: true,
            fail_surfaces: false,
            fail_contexts: false,
            fail_destroys: false,
        }
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every surface creation fail.
    pub fn failing_surfaces(mut self) -> Self {
        self.fail_surfaces = true;
        self
    }

    /// Makes every context creation fail.
    pub fn failing_contexts(mut self) -> Self {
        self.fail_contexts = true;
        self
    }

    /// Makes every surface destruction fail.
    pub fn failing_destroys(mut self) -> Self {
        self.fail_destroys = true;
        self
    }

    pub fn without_zero_copy(mut self) -> Self {
        self.zero_copy = false;
        self
    }

    /// Switches surface creation failures on or off from now on.
    pub fn set_fail_surfaces(&mut self, fail: bool) {
        self.fail_surfaces = fail;
    }

    pub fn set_fail_destroys(&mut self, fail: bool) {
        self.fail_destroys = fail;
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn allocate(&mut self) -> NativeHandle {
        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

impl Driver for RecordingDriver {
    fn create_surface(
        &mut self,
        kind: SurfaceKind,
        width: u32,
        height: u32,
        _attributes: &[i32],
    ) -> Result<NativeHandle, DriverError> {
        if self.fail_surfaces {
            return Err(DriverError::new("create_surface", "EGL_BAD_ALLOC"));
        }
        let surface = self.allocate();
        self.effects.push(Effect::SurfaceCreated {
            surface,
            kind,
            width,
            height,
        });
        Ok(surface)
    }

    fn destroy_surface(&mut self, surface: NativeHandle) -> Result<(), DriverError> {
        if self.fail_destroys {
            return Err(DriverError::new("destroy_surface", "EGL_BAD_SURFACE"));
        }
        self.effects.push(Effect::SurfaceDestroyed(surface));
        Ok(())
    }

    fn create_context(
        &mut self,
        share: Option<NativeHandle>,
        _attributes: &[i32],
    ) -> Result<NativeHandle, DriverError> {
        if self.fail_contexts {
            return Err(DriverError::new("create_context", "EGL_BAD_CONFIG"));
        }
        let context = self.allocate();
        self.effects.push(Effect::ContextCreated { context, share });
        Ok(context)
    }

    fn destroy_context(&mut self, context: NativeHandle) -> Result<(), DriverError> {
        self.effects.push(Effect::ContextDestroyed(context));
        Ok(())
    }

    fn make_current(
        &mut self,
        surface: Option<NativeHandle>,
        context: Option<NativeHandle>,
    ) -> Result<(), DriverError> {
        self.effects.push(Effect::MadeCurrent { surface, context });
        Ok(())
    }

    fn swap_buffers(&mut self, surface: NativeHandle) -> Result<(), DriverError> {
        self.effects.push(Effect::Swapped(surface));
        Ok(())
    }

    fn supports_zero_copy(&self) -> bool {
        self.zero_copy
    }

    fn import_image(
        &mut self,
        _context: Option<NativeHandle>,
        target: u32,
        buffer: u64,
        _attributes: &[i32],
    ) -> Result<NativeHandle, DriverError> {
        if !self.zero_copy {
            return Err(DriverError::new("import_image", "EGL_BAD_PARAMETER"));
        }
        let image = self.allocate();
        self.effects.push(Effect::ImageImported {
            image,
            target,
            buffer,
        });
        Ok(image)
    }

    fn destroy_image(&mut self, image: NativeHandle) -> Result<(), DriverError> {
        self.effects.push(Effect::ImageDestroyed(image));
        Ok(())
    }

    fn execute(&mut self, call: &CallRecord<'_>, operands: &[Operand<'_>]) -> Result<(), DriverError> {
        let mut memory = Vec::new();
        let mut images = Vec::new();
        for operand in operands {
            match *operand {
                Operand::Memory { position, bytes } => memory.push((position, bytes.len())),
                Operand::Image { position, image } => images.push((position, image)),
            }
        }
        self.effects.push(Effect::Executed {
            name: call.name(),
            callno: call.callno(),
            tid: call.tid(),
            memory,
            images,
        });
        Ok(())
    }
}
