//! Window system backends.
//!
//! Only a handful of operations differ between window systems, so a backend is a plain enum and
//! callers dispatch on the variant. Everything else is shared and goes straight to the
//! [`Driver`].
use crate::drawable::{Drawable, SurfaceKind};
use crate::driver::{Driver, NativeHandle};
use crate::step::Stepper;
use crate::ReplayError;

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Frames are shown on a display.
        const ON_SCREEN = 0b0000_0001;
        /// External buffers can be imported as images without a copy.
        const ZERO_COPY_IMPORT = 0b0000_0010;
        /// Replay can be paused and stepped frame by frame.
        const STEPPABLE = 0b0000_0100;
    }
}

#[derive(Debug)]
pub enum Backend {
    /// On-screen window. Surfaces go to `window` unless the replay configuration names another.
    Window { window: u64 },
    /// Off-screen buffers.
    Pbuffer,
    /// Framebuffer device, with an optional stepping channel.
    Fbdev { stepper: Option<Stepper> },
    /// No surfaces at all.
    Headless,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Window { .. } => "window",
            Self::Pbuffer => "pbuffer",
            Self::Fbdev { .. } => "fbdev",
            Self::Headless => "headless",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Window { .. } => Capabilities::ON_SCREEN | Capabilities::ZERO_COPY_IMPORT,
            Self::Pbuffer => Capabilities::empty(),
            Self::Fbdev { .. } => {
                Capabilities::ON_SCREEN | Capabilities::ZERO_COPY_IMPORT | Capabilities::STEPPABLE
            }
            Self::Headless => Capabilities::empty(),
        }
    }

    /// Creates a native drawable of the kind this backend renders to.
    ///
    /// `window` is the native window requested for the surface, zero to use the backend's own.
    /// Windows recorded in a trace belong to the capturing process and are never passed here.
    pub fn create_drawable<D: Driver>(
        &self,
        driver: &mut D,
        width: u32,
        height: u32,
        window: u64,
        attributes: &[i32],
    ) -> Result<Drawable, ReplayError> {
        let kind = match self {
            Self::Window { window: default } if window == 0 => SurfaceKind::Window(*default),
            Self::Window { .. } => SurfaceKind::Window(window),
            Self::Pbuffer => SurfaceKind::Pbuffer,
            Self::Fbdev { .. } => SurfaceKind::Framebuffer,
            Self::Headless => SurfaceKind::Surfaceless,
        };
        let handle = driver
            .create_surface(kind, width, height, attributes)
            .map_err(ReplayError::DrawableCreation)?;
        tracing::debug!(backend = self.name(), ?kind, width, height, "created drawable");
        Ok(Drawable::new(handle, kind, width, height))
    }

    /// Imports an external buffer as an image without copying it.
    pub fn create_image_from_external_buffer<D: Driver>(
        &self,
        driver: &mut D,
        context: Option<NativeHandle>,
        target: u32,
        buffer: u64,
        attributes: &[i32],
    ) -> Result<Image, ReplayError> {
        if !self.capabilities().contains(Capabilities::ZERO_COPY_IMPORT)
            || !driver.supports_zero_copy()
        {
            return Err(ReplayError::Unsupported("zero-copy image import"));
        }
        let handle = driver.import_image(context, target, buffer, attributes)?;
        Ok(Image { handle, target })
    }

    pub fn steppable(&self) -> bool {
        self.capabilities().contains(Capabilities::STEPPABLE)
    }

    /// Reports a completed frame to the step controller, if any, and waits for it as needed.
    pub fn process_step_event(&mut self, frame: u64) {
        if let Self::Fbdev {
            stepper: Some(stepper),
        } = self
        {
            stepper.frame_completed(frame);
        }
    }
}

/// An image imported from an external buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Image {
    pub handle: NativeHandle,
    pub target: u32,
}

/// What to do when the backend cannot honor a call.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum UnsupportedPolicy {
    /// Skip the call with a warning.
    #[default]
    Skip,
    /// Stop the replay.
    Abort,
}

/// Replay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Surface size used when the trace header has no hint for the creating thread.
    pub width: u32,
    pub height: u32,
    /// Native window for on-screen surfaces, zero to use the backend's.
    pub window: u64,
    /// Surface attributes used when the recorded call carries none.
    pub attributes: Vec<i32>,
    pub policy: UnsupportedPolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            window: 0,
            attributes: Vec::new(),
            policy: UnsupportedPolicy::default(),
        }
    }
}
