use crate::backend::{Backend, Image, ReplayConfig, UnsupportedPolicy};
use crate::drawable::Drawable;
use crate::driver::{Driver, NativeHandle, Operand};
use crate::handles::{ClientMemory, HandleMap};
use crate::{HandleKind, ReplayError};
use gltrace::{CallRecord, CallStream, Header, Value};
use hashbrown::HashMap;

/// Largest client-side buffer a recorded call may allocate. Contents can never exceed one record.
pub const MAX_CLIENT_SIDE_BUFFER: usize = gltrace::MAX_RECORD_SIZE;

/// Calls taking an `EGLImage`, with the position of that argument.
const IMAGE_ARGUMENTS: &[(&str, usize)] = &[("glEGLImageTargetTexture2DOES", 1)];

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Calls read from the trace, skipped ones included.
    pub calls: u64,
    /// Frames presented.
    pub frames: u64,
    pub skipped: u64,
    /// Calls injected by a rewrite.
    pub synthetic: u64,
}

/// Replays calls through a [`Driver`] in recorded order.
pub struct Retracer<D: Driver> {
    driver: D,
    backend: Backend,
    config: ReplayConfig,
    hints: Header,
    surfaces: HandleMap<Drawable>,
    contexts: HandleMap<NativeHandle>,
    images: HandleMap<Image>,
    /// Recorded draw surface currently bound on each thread.
    current: HashMap<u32, u64>,
    memory: ClientMemory,
    stats: ReplayStats,
}

enum Target<T> {
    Nothing,
    Live(T),
    Failed,
}

fn lookup<T, U>(
    map: &HandleMap<T>,
    kind: HandleKind,
    recorded: u64,
    project: impl FnOnce(&T) -> U,
) -> Result<Target<U>, ReplayError> {
    if recorded == 0 {
        return Ok(Target::Nothing);
    }
    if map.is_failed(recorded) {
        return Ok(Target::Failed);
    }
    match map.get(recorded) {
        Some(value) => Ok(Target::Live(project(value))),
        None => Err(ReplayError::UnknownHandle { kind, id: recorded }),
    }
}

fn malformed(call: &CallRecord<'_>) -> ReplayError {
    ReplayError::MalformedCall {
        callno: call.callno(),
        name: call.name(),
    }
}

fn handle(call: &CallRecord<'_>, position: usize) -> Result<u64, ReplayError> {
    call.arg(position)
        .and_then(Value::as_handle)
        .ok_or_else(|| malformed(call))
}

fn returned_handle(call: &CallRecord<'_>) -> Result<u64, ReplayError> {
    call.ret()
        .and_then(Value::as_handle)
        .ok_or_else(|| malformed(call))
}

fn client_side_id(call: &CallRecord<'_>, position: usize) -> Result<u32, ReplayError> {
    call.arg(position)
        .and_then(Value::client_side_id)
        .ok_or_else(|| malformed(call))
}

fn attributes(call: &CallRecord<'_>, position: usize, fallback: &[i32]) -> Vec<i32> {
    match call.arg(position) {
        Some(Value::Array(array)) => array.to_i32s().unwrap_or_else(|| fallback.to_vec()),
        _ => fallback.to_vec(),
    }
}

/// Translates client-side pointers and images for `call`, or says why it cannot be issued.
fn operands<'m>(
    call: &CallRecord<'_>,
    memory: &'m ClientMemory,
    images: &HandleMap<Image>,
) -> Result<Vec<Operand<'m>>, String> {
    let mut operands = Vec::new();
    for (position, arg) in call.args().iter().enumerate() {
        let (id, offset) = match *arg {
            Value::ClientSideBuffer(id) => (id, 0),
            Value::ClientSideRef { buffer, offset } => (buffer, offset),
            _ => continue,
        };
        let bytes = memory.resolve(call.tid(), id, offset).ok_or_else(|| {
            format!("client-side buffer {id} has no memory at offset {offset:#x}")
        })?;
        operands.push(Operand::Memory { position, bytes });
    }

    let image_args = IMAGE_ARGUMENTS
        .iter()
        .filter(|(name, _)| *name == call.name());
    for &(_, position) in image_args {
        let Some(recorded) = call.arg(position).and_then(Value::as_handle) else {
            continue;
        };
        match lookup(images, HandleKind::Image, recorded, |image| image.handle) {
            Ok(Target::Live(image)) => operands.push(Operand::Image { position, image }),
            Ok(Target::Nothing) => {}
            Ok(Target::Failed) => return Err(format!("image {recorded:#x} was not imported")),
            Err(err) => return Err(err.to_string()),
        }
    }
    Ok(operands)
}

impl<D: Driver> Retracer<D> {
    pub fn new(driver: D, backend: Backend, config: ReplayConfig) -> Self {
        Self {
            driver,
            backend,
            config,
            hints: Header::new(),
            surfaces: HandleMap::default(),
            contexts: HandleMap::default(),
            images: HandleMap::default(),
            current: HashMap::new(),
            memory: ClientMemory::default(),
            stats: ReplayStats::default(),
        }
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Client-side buffer contents currently held for replay.
    pub fn memory(&self) -> &ClientMemory {
        &self.memory
    }

    /// Replays every remaining call of `stream`.
    ///
    /// Surface sizes are taken from the stream's header when it has them.
    pub fn replay(&mut self, stream: &mut CallStream<'_>) -> Result<ReplayStats, ReplayError> {
        self.hints = Header::parse(stream.header())?;
        let _span = tracing::info_span!("replay", backend = self.backend.name()).entered();

        while let Some(call) = stream.next_call()? {
            if let Err(err) = self.retrace_call(&call) {
                tracing::error!(callno = call.callno(), tid = call.tid(), "{} failed", call.name());
                return Err(err);
            }
        }

        tracing::info!(
            calls = self.stats.calls,
            frames = self.stats.frames,
            skipped = self.stats.skipped,
            synthetic = self.stats.synthetic,
            "replay finished"
        );
        Ok(self.stats)
    }

    /// Replays a single call.
    pub fn retrace_call(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        self.stats.calls += 1;
        if call.is_synthetic() {
            self.stats.synthetic += 1;
        }

        match call.name() {
            // The display is owned by the backend.
            "eglGetDisplay" | "eglInitialize" | "eglChooseConfig" | "eglTerminate" => Ok(()),
            "eglCreateWindowSurface" => self.create_surface(call, 3),
            "eglCreatePbufferSurface" => self.create_surface(call, 2),
            "eglDestroySurface" => self.destroy_surface(call),
            "eglCreateContext" => self.create_context(call),
            "eglDestroyContext" => self.destroy_context(call),
            "eglMakeCurrent" => self.make_current(call),
            "eglSwapBuffers" => self.swap_buffers(call),
            "eglCreateImageKHR" => self.create_image(call),
            "eglDestroyImageKHR" => self.destroy_image(call),
            "glCreateClientSideBuffer" => {
                let id = call
                    .ret()
                    .and_then(Value::client_side_id)
                    .ok_or_else(|| malformed(call))?;
                self.memory.create(call.tid(), id);
                Ok(())
            }
            "glClientSideBufferData" => self.buffer_data(call),
            "glClientSideBufferSubData" => self.buffer_sub_data(call),
            gltrace::registry::DELETE_CLIENT_SIDE_BUFFER => {
                let id = client_side_id(call, 0)?;
                if !self.memory.delete(call.tid(), id) {
                    tracing::debug!(tid = call.tid(), id, "deleting unallocated client-side buffer");
                }
                Ok(())
            }
            _ => self.execute(call),
        }
    }

    fn skip(&mut self, call: &CallRecord<'_>, reason: &str) {
        self.stats.skipped += 1;
        tracing::warn!(
            callno = call.callno(),
            tid = call.tid(),
            "skipping {}: {reason}",
            call.name()
        );
    }

    fn create_surface(&mut self, call: &CallRecord<'_>, attribs: usize) -> Result<(), ReplayError> {
        let recorded = returned_handle(call)?;
        if recorded == 0 {
            self.skip(call, "surface creation failed when recorded");
            return Ok(());
        }
        let (width, height) = self
            .hints
            .surface_size(call.tid())
            .unwrap_or((self.config.width, self.config.height));
        let attributes = attributes(call, attribs, &self.config.attributes);

        // Recorded native windows belong to the capturing process.
        match self.backend.create_drawable(
            &mut self.driver,
            width,
            height,
            self.config.window,
            &attributes,
        ) {
            Ok(drawable) => {
                self.surfaces.insert(recorded, drawable);
                Ok(())
            }
            Err(ReplayError::DrawableCreation(err)) => {
                self.surfaces.mark_failed(recorded);
                self.skip(call, &err.to_string());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn destroy_surface(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let recorded = handle(call, 1)?;
        if self.surfaces.clear_failed(recorded) {
            self.skip(call, "surface was never created");
            return Ok(());
        }
        let mut drawable = self
            .surfaces
            .remove(recorded)
            .ok_or(ReplayError::UnknownHandle {
                kind: HandleKind::Surface,
                id: recorded,
            })?;
        drawable.destroy(&mut self.driver)
    }

    fn create_context(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let recorded = returned_handle(call)?;
        if recorded == 0 {
            self.skip(call, "context creation failed when recorded");
            return Ok(());
        }
        let share = match lookup(&self.contexts, HandleKind::Context, handle(call, 2)?, |c| *c)? {
            Target::Nothing => None,
            Target::Live(share) => Some(share),
            Target::Failed => {
                self.contexts.mark_failed(recorded);
                self.skip(call, "shared context was never created");
                return Ok(());
            }
        };
        let attributes = attributes(call, 3, &[]);

        match self.driver.create_context(share, &attributes) {
            Ok(context) => {
                self.contexts.insert(recorded, context);
            }
            Err(err) => {
                self.contexts.mark_failed(recorded);
                self.skip(call, &err.to_string());
            }
        }
        Ok(())
    }

    fn destroy_context(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let recorded = handle(call, 1)?;
        if self.contexts.clear_failed(recorded) {
            self.skip(call, "context was never created");
            return Ok(());
        }
        let context = self
            .contexts
            .remove(recorded)
            .ok_or(ReplayError::UnknownHandle {
                kind: HandleKind::Context,
                id: recorded,
            })?;
        self.driver.destroy_context(context)?;
        Ok(())
    }

    fn make_current(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let draw = handle(call, 1)?;
        let context = handle(call, 3)?;

        if draw == 0 {
            self.current.remove(&call.tid());
        } else {
            self.current.insert(call.tid(), draw);
        }

        let surface = match lookup(&self.surfaces, HandleKind::Surface, draw, Drawable::handle)? {
            Target::Nothing => None,
            Target::Live(surface) => Some(surface),
            Target::Failed => {
                self.skip(call, "surface was never created");
                return Ok(());
            }
        };
        let context = match lookup(&self.contexts, HandleKind::Context, context, |c| *c)? {
            Target::Nothing => None,
            Target::Live(context) => Some(context),
            Target::Failed => {
                self.skip(call, "context was never created");
                return Ok(());
            }
        };

        self.driver.make_current(surface, context)?;
        if let Some(drawable) = self.surfaces.get_mut(draw) {
            drawable.bind()?;
        }
        Ok(())
    }

    fn swap_buffers(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let recorded = handle(call, 1)?;
        let drawable = match lookup(&self.surfaces, HandleKind::Surface, recorded, |_| ())? {
            Target::Nothing => return Err(malformed(call)),
            Target::Failed => {
                self.skip(call, "surface was never created");
                return Ok(());
            }
            Target::Live(()) => self.surfaces.get_mut(recorded),
        };
        let Some(drawable) = drawable else {
            return Err(ReplayError::UnknownHandle {
                kind: HandleKind::Surface,
                id: recorded,
            });
        };

        drawable.present()?;
        self.driver.swap_buffers(drawable.handle())?;
        self.stats.frames += 1;
        self.backend.process_step_event(self.stats.frames);
        Ok(())
    }

    fn create_image(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let recorded = returned_handle(call)?;
        if recorded == 0 {
            self.skip(call, "image creation failed when recorded");
            return Ok(());
        }
        let context = match lookup(&self.contexts, HandleKind::Context, handle(call, 1)?, |c| *c)? {
            Target::Nothing => None,
            Target::Live(context) => Some(context),
            Target::Failed => {
                self.images.mark_failed(recorded);
                self.skip(call, "context was never created");
                return Ok(());
            }
        };
        let target = call
            .arg(2)
            .and_then(Value::as_u32)
            .ok_or_else(|| malformed(call))?;
        let buffer = handle(call, 3)?;
        let attributes = attributes(call, 4, &[]);

        match self.backend.create_image_from_external_buffer(
            &mut self.driver,
            context,
            target,
            buffer,
            &attributes,
        ) {
            Ok(image) => {
                self.images.insert(recorded, image);
                Ok(())
            }
            Err(ReplayError::Unsupported(what)) if self.config.policy == UnsupportedPolicy::Skip => {
                self.images.mark_failed(recorded);
                self.skip(call, &format!("{what} is not supported"));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn destroy_image(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let recorded = handle(call, 1)?;
        if self.images.clear_failed(recorded) {
            self.skip(call, "image was never imported");
            return Ok(());
        }
        let image = self
            .images
            .remove(recorded)
            .ok_or(ReplayError::UnknownHandle {
                kind: HandleKind::Image,
                id: recorded,
            })?;
        self.driver.destroy_image(image.handle)?;
        Ok(())
    }

    fn buffer_data(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let id = client_side_id(call, 0)?;
        let size = call
            .arg(1)
            .and_then(Value::as_i64)
            .and_then(|size| usize::try_from(size).ok())
            .filter(|size| *size <= MAX_CLIENT_SIDE_BUFFER)
            .ok_or_else(|| malformed(call))?;
        let bytes = match call.arg(2).and_then(Value::as_bytes) {
            Some(bytes) if bytes.len() == size => bytes.to_vec(),
            Some(_) => return Err(malformed(call)),
            None => vec![0; size],
        };
        self.memory.data(call.tid(), id, bytes);
        Ok(())
    }

    fn buffer_sub_data(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        let id = client_side_id(call, 0)?;
        let offset = call
            .arg(1)
            .and_then(Value::as_i64)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(|| malformed(call))?;
        let bytes = call.arg(3).and_then(Value::as_bytes).unwrap_or_default();
        if !self.memory.sub_data(call.tid(), id, offset, bytes) {
            self.skip(call, "update is outside the client-side buffer");
        }
        Ok(())
    }

    fn execute(&mut self, call: &CallRecord<'_>) -> Result<(), ReplayError> {
        if let Some(&draw) = self.current.get(&call.tid()) {
            if self.surfaces.is_failed(draw) {
                self.skip(call, "current surface was never created");
                return Ok(());
            }
        }
        let operands = match operands(call, &self.memory, &self.images) {
            Ok(operands) => operands,
            Err(reason) => {
                self.skip(call, &reason);
                return Ok(());
            }
        };
        self.driver.execute(call, &operands)?;
        Ok(())
    }
}
