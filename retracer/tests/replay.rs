use gltrace::record::Array;
use gltrace::{inject_client_side_deletes, CallRecord, CallStream, Registry, TraceWriter, Value};
use retracer::step::{self, StepCommand};
use retracer::{
    Backend, Effect, NativeHandle, RecordingDriver, ReplayConfig, ReplayError, Retracer,
    SurfaceKind, UnsupportedPolicy, MAX_CLIENT_SIDE_BUFFER,
};
use std::thread;

const DISPLAY: u64 = 0xd1;
const SURFACE: u64 = 0x51;
const CONTEXT: u64 = 0xc1;
const IMAGE: u64 = 0x1a;

type Call = (&'static str, Vec<Value<'static>>, Option<Value<'static>>);

fn build(registry: &Registry, header: &[u8], calls: Vec<Call>) -> Vec<u8> {
    let mut writer = TraceWriter::new(Vec::new());
    writer.write_header(header).unwrap();
    for (callno, (name, args, ret)) in calls.into_iter().enumerate() {
        let signature = registry.by_name(name).unwrap();
        let mut call = CallRecord::new(signature, 1, callno as u32 + 1, args).unwrap();
        if let Some(ret) = ret {
            call = call.with_return(signature, ret).unwrap();
        }
        writer.append(&call).unwrap();
    }
    writer.finish().unwrap()
}

fn frames() -> Vec<Call> {
    let none = || Value::Array(Array::from_i32s(&[0x3038]));
    let dpy = || Value::Pointer(DISPLAY);
    let ok = || Some(Value::Int32(1));
    let draw = || vec![Value::Enum(0x0004), Value::Int32(0), Value::Int32(3)];
    vec![
        ("eglGetDisplay", vec![Value::Null], Some(dpy())),
        (
            "eglCreateWindowSurface",
            vec![dpy(), Value::Pointer(0xcf), Value::Pointer(0x77), none()],
            Some(Value::Pointer(SURFACE)),
        ),
        (
            "eglCreateContext",
            vec![dpy(), Value::Pointer(0xcf), Value::Null, none()],
            Some(Value::Pointer(CONTEXT)),
        ),
        (
            "eglMakeCurrent",
            vec![
                dpy(),
                Value::Pointer(SURFACE),
                Value::Pointer(SURFACE),
                Value::Pointer(CONTEXT),
            ],
            ok(),
        ),
        ("glCreateClientSideBuffer", vec![], Some(Value::ClientSideBuffer(3))),
        (
            "glClientSideBufferData",
            vec![
                Value::ClientSideBuffer(3),
                Value::Int64(16),
                Value::Blob(vec![0x11; 16].into()),
            ],
            None,
        ),
        (
            "glVertexAttribPointer",
            vec![
                Value::UInt32(0),
                Value::Int32(3),
                Value::Enum(0x1406),
                Value::Int32(0),
                Value::Int32(0),
                Value::ClientSideRef {
                    buffer: 3,
                    offset: 4,
                },
            ],
            None,
        ),
        ("glDrawArrays", draw(), None),
        ("eglSwapBuffers", vec![dpy(), Value::Pointer(SURFACE)], ok()),
        ("glDrawArrays", draw(), None),
        ("eglSwapBuffers", vec![dpy(), Value::Pointer(SURFACE)], ok()),
    ]
}

fn images() -> Vec<Call> {
    let dpy = || Value::Pointer(DISPLAY);
    vec![
        (
            "eglCreateImageKHR",
            vec![
                dpy(),
                Value::Null,
                Value::Enum(0x3140),
                Value::Pointer(0xbeef),
                Value::Null,
            ],
            Some(Value::Pointer(IMAGE)),
        ),
        (
            "glEGLImageTargetTexture2DOES",
            vec![Value::Enum(0x0de1), Value::Pointer(IMAGE)],
            None,
        ),
        (
            "eglDestroyImageKHR",
            vec![dpy(), Value::Pointer(IMAGE)],
            Some(Value::Int32(1)),
        ),
    ]
}

fn replay(
    trace: &Vec<u8>,
    driver: RecordingDriver,
    backend: Backend,
    config: ReplayConfig,
) -> (Result<retracer::ReplayStats, ReplayError>, Retracer<RecordingDriver>) {
    let registry = Registry::gles();
    let mut stream = CallStream::open(trace, &registry).unwrap();
    let mut retracer = Retracer::new(driver, backend, config);
    let result = retracer.replay(&mut stream);
    (result, retracer)
}

#[test]
fn test_replay_presents_frames() {
    let registry = Registry::gles();
    let trace = build(&registry, br#"{"winW":640,"winH":480}"#, frames());
    let (stats, retracer) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Headless,
        ReplayConfig::default(),
    );
    let stats = stats.unwrap();
    assert_eq!(stats.calls, 11);
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.synthetic, 0);

    let effects = retracer.driver().effects();
    assert_eq!(
        effects[0],
        Effect::SurfaceCreated {
            surface: NativeHandle(1),
            kind: SurfaceKind::Surfaceless,
            width: 640,
            height: 480,
        }
    );
    assert!(effects.contains(&Effect::MadeCurrent {
        surface: Some(NativeHandle(1)),
        context: Some(NativeHandle(2)),
    }));
    assert!(effects.contains(&Effect::Executed {
        name: "glVertexAttribPointer",
        callno: 7,
        tid: 1,
        memory: vec![(5, 12)],
        images: vec![],
    }));
    let swaps = effects
        .iter()
        .filter(|effect| **effect == Effect::Swapped(NativeHandle(1)))
        .count();
    assert_eq!(swaps, 2);
}

#[test]
fn test_failed_drawable_skips_dependent_calls() {
    let registry = Registry::gles();
    let trace = build(&registry, b"{}", frames());
    let (stats, retracer) = replay(
        &trace,
        RecordingDriver::new().failing_surfaces(),
        Backend::Window { window: 0 },
        ReplayConfig::default(),
    );
    let stats = stats.unwrap();
    assert_eq!(stats.calls, 11);
    assert_eq!(stats.frames, 0);
    assert_eq!(stats.skipped, 7);
    assert_eq!(
        retracer.driver().effects(),
        &[Effect::ContextCreated {
            context: NativeHandle(1),
            share: None,
        }]
    );
}

#[test]
fn test_window_surfaces_use_configured_size() {
    let registry = Registry::gles();
    let trace = build(&registry, b"{}", frames());
    let config = ReplayConfig {
        width: 320,
        height: 200,
        window: 42,
        ..ReplayConfig::default()
    };
    let (stats, retracer) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Window { window: 0 },
        config,
    );
    assert_eq!(stats.unwrap().frames, 2);
    assert_eq!(
        retracer.driver().effects()[0],
        Effect::SurfaceCreated {
            surface: NativeHandle(1),
            kind: SurfaceKind::Window(42),
            width: 320,
            height: 200,
        }
    );
}

#[test]
fn test_recorded_window_is_not_replayed() {
    let registry = Registry::gles();
    let trace = build(&registry, b"{}", frames());
    let (stats, retracer) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Window { window: 5 },
        ReplayConfig::default(),
    );
    assert_eq!(stats.unwrap().frames, 2);
    assert!(matches!(
        retracer.driver().effects()[0],
        Effect::SurfaceCreated {
            kind: SurfaceKind::Window(5),
            ..
        }
    ));
}

#[test]
fn test_step_hook_runs_once_per_frame() {
    let registry = Registry::gles();
    let trace = build(&registry, b"{}", frames());
    let (stepper, controller) = step::channel();

    let stats = thread::scope(|scope| {
        let trace = &trace;
        let replay = scope.spawn(move || {
            let registry = Registry::gles();
            let mut stream = CallStream::open(trace, &registry).unwrap();
            let backend = Backend::Fbdev {
                stepper: Some(stepper),
            };
            let mut retracer = Retracer::new(RecordingDriver::new(), backend, ReplayConfig::default());
            retracer.replay(&mut stream).unwrap()
        });

        assert_eq!(controller.wait_frame(), Some(1));
        assert!(controller.send(StepCommand::Step));
        assert_eq!(controller.wait_frame(), Some(2));
        assert!(controller.send(StepCommand::Step));
        replay.join().unwrap()
    });

    assert_eq!(stats.frames, 2);
    assert_eq!(controller.wait_frame(), None);
}

#[test]
fn test_unsupported_image_import() {
    let registry = Registry::gles();
    let trace = build(&registry, b"{}", images());

    let (stats, _) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Pbuffer,
        ReplayConfig::default(),
    );
    assert_eq!(stats.unwrap().skipped, 3);

    let config = ReplayConfig {
        policy: UnsupportedPolicy::Abort,
        ..ReplayConfig::default()
    };
    let (result, _) = replay(&trace, RecordingDriver::new(), Backend::Pbuffer, config);
    assert!(matches!(result, Err(ReplayError::Unsupported(_))));

    let (stats, retracer) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Fbdev { stepper: None },
        ReplayConfig::default(),
    );
    assert_eq!(stats.unwrap().skipped, 0);
    assert_eq!(
        retracer.driver().effects(),
        &[
            Effect::ImageImported {
                image: NativeHandle(1),
                target: 0x3140,
                buffer: 0xbeef,
            },
            Effect::Executed {
                name: "glEGLImageTargetTexture2DOES",
                callno: 2,
                tid: 1,
                memory: vec![],
                images: vec![(1, NativeHandle(1))],
            },
            Effect::ImageDestroyed(NativeHandle(1)),
        ]
    );
}

#[test]
fn test_synthetic_deletions_release_memory() {
    let registry = Registry::gles();
    let trace = build(&registry, b"{}", frames());
    let mut writer = TraceWriter::new(Vec::new());
    let summary = inject_client_side_deletes(&trace, &registry, &mut writer).unwrap();
    assert_eq!(summary.injected, 1);
    let rewritten = writer.finish().unwrap();

    let (stats, retracer) = replay(
        &rewritten,
        RecordingDriver::new(),
        Backend::Headless,
        ReplayConfig::default(),
    );
    let stats = stats.unwrap();
    assert_eq!(stats.calls, 12);
    assert_eq!(stats.synthetic, 1);
    assert_eq!(stats.skipped, 0);
    assert!(retracer.memory().is_empty());
}

#[test]
fn test_client_side_data_sizes_are_checked() {
    let registry = Registry::gles();
    let data = |size: i64, bytes: Value<'static>| -> Call {
        (
            "glClientSideBufferData",
            vec![Value::ClientSideBuffer(1), Value::Int64(size), bytes],
            None,
        )
    };

    let trace = build(&registry, b"{}", vec![data(1 << 62, Value::Null)]);
    let (result, retracer) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Headless,
        ReplayConfig::default(),
    );
    assert!(matches!(
        result,
        Err(ReplayError::MalformedCall {
            callno: 1,
            name: "glClientSideBufferData",
        })
    ));
    assert!(retracer.memory().is_empty());

    let oversized = MAX_CLIENT_SIDE_BUFFER as i64 + 1;
    let trace = build(&registry, b"{}", vec![data(oversized, Value::Null)]);
    let (result, _) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Headless,
        ReplayConfig::default(),
    );
    assert!(matches!(result, Err(ReplayError::MalformedCall { callno: 1, .. })));

    let short = Value::Blob(vec![0x22; 4].into());
    let trace = build(&registry, b"{}", vec![data(8, short)]);
    let (result, _) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Headless,
        ReplayConfig::default(),
    );
    assert!(matches!(result, Err(ReplayError::MalformedCall { callno: 1, .. })));

    let trace = build(&registry, b"{}", vec![data(16, Value::Null)]);
    let (result, retracer) = replay(
        &trace,
        RecordingDriver::new(),
        Backend::Headless,
        ReplayConfig::default(),
    );
    assert_eq!(result.unwrap().skipped, 0);
    assert_eq!(retracer.memory().resolve(1, 1, 0), Some(&[0u8; 16][..]));
}
