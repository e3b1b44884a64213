use crate::driver::{Driver, NativeHandle};
use crate::ReplayError;

/// Kind of native surface backing a [`Drawable`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// On-screen surface attached to the given native window.
    Window(u64),
    /// Off-screen buffer.
    Pbuffer,
    /// Surface on the framebuffer device.
    Framebuffer,
    /// No surface at all, rendering goes to context owned framebuffers.
    Surfaceless,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DrawableState {
    Created,
    Bound,
    Presented,
    Destroyed,
}

/// A native render target.
///
/// `Created → Bound → Presented ⇄ Bound`, and any state but `Destroyed` may be destroyed.
/// Destroying releases the native surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drawable {
    handle: NativeHandle,
    kind: SurfaceKind,
    width: u32,
    height: u32,
    state: DrawableState,
}

impl Drawable {
    pub fn new(handle: NativeHandle, kind: SurfaceKind, width: u32, height: u32) -> Self {
        Self {
            handle,
            kind,
            width,
            height,
            state: DrawableState::Created,
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn state(&self) -> DrawableState {
        self.state
    }

    /// Marks the drawable as current on some thread.
    pub fn bind(&mut self) -> Result<(), ReplayError> {
        match self.state {
            DrawableState::Destroyed => Err(self.invalid("bind")),
            _ => {
                self.state = DrawableState::Bound;
                Ok(())
            }
        }
    }

    /// Marks the drawable as presented. It must have been bound first.
    pub fn present(&mut self) -> Result<(), ReplayError> {
        match self.state {
            DrawableState::Bound | DrawableState::Presented => {
                self.state = DrawableState::Presented;
                Ok(())
            }
            DrawableState::Created | DrawableState::Destroyed => Err(self.invalid("present")),
        }
    }

    /// Releases the native surface.
    pub fn destroy<D: Driver>(&mut self, driver: &mut D) -> Result<(), ReplayError> {
        if self.state == DrawableState::Destroyed {
            return Err(self.invalid("destroy"));
        }
        driver.destroy_surface(self.handle)?;
        self.state = DrawableState::Destroyed;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> ReplayError {
        ReplayError::InvalidTransition {
            from: self.state,
            action,
        }
    }
}
