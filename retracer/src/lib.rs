//! Replay of recorded call traces against a native graphics driver.
//!
//! The [`Retracer`] walks a [`gltrace::CallStream`] in recorded order and re-issues every call
//! through a [`Driver`]. Recorded EGL handles are translated to native ones, client-side buffer
//! contents are kept per thread, and window system specifics are confined to the [`Backend`]
//! variant picked at startup.
pub mod backend;
pub mod drawable;
pub mod driver;
pub mod handles;
pub mod retrace;
pub mod step;

pub use backend::{Backend, Capabilities, Image, ReplayConfig, UnsupportedPolicy};
pub use drawable::{Drawable, DrawableState, SurfaceKind};
pub use driver::{Driver, DriverError, Effect, NativeHandle, Operand, RecordingDriver};
pub use retrace::{ReplayStats, Retracer, MAX_CLIENT_SIDE_BUFFER};
pub use step::{StepCommand, StepController, Stepper};

use gltrace::TraceError;

/// Kind of object a recorded handle refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Surface,
    Context,
    Image,
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Surface => write!(f, "surface"),
            Self::Context => write!(f, "context"),
            Self::Image => write!(f, "image"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("failed to create drawable: {0}")]
    DrawableCreation(#[source] DriverError),

    #[error("drawable cannot {action} while {from:?}")]
    InvalidTransition {
        from: DrawableState,
        action: &'static str,
    },

    #[error("unknown {kind} handle {id:#x}")]
    UnknownHandle { kind: HandleKind, id: u64 },

    #[error("call {callno} ({name}) is malformed")]
    MalformedCall { callno: u32, name: &'static str },

    #[error("driver error")]
    Driver(#[from] DriverError),

    #[error("trace error")]
    Trace(#[from] TraceError),
}
