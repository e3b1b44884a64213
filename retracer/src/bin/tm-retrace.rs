use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gltrace::{CallStream, Registry};
use retracer::step::{self, StepCommand, StepController};
use retracer::{Backend, RecordingDriver, ReplayConfig, Retracer, UnsupportedPolicy};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::filter::EnvFilter;

#[derive(ValueEnum, Debug, Copy, Clone, PartialEq, Eq)]
enum BackendKind {
    Window,
    Pbuffer,
    Fbdev,
    Headless,
}

/// Replays a trace against the recording driver and prints replay statistics.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Trace to replay.
    trace: PathBuf,

    #[arg(short, long, value_enum, default_value_t = BackendKind::Headless)]
    backend: BackendKind,

    /// Surface width when the trace has no size hint.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Surface height when the trace has no size hint.
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Native window to render to.
    #[arg(long, default_value_t = 0)]
    window: u64,

    /// Pause after every frame. Press enter to step, 'c' to continue. Needs the fbdev backend.
    #[arg(long)]
    step: bool,

    /// Stop instead of skipping calls the backend cannot replay.
    #[arg(long)]
    abort_unsupported: bool,

    /// Verbosity level for stderr logging.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("TA_LOG").unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let registry = Registry::gles();
    let mut stream = CallStream::open(&args.trace, &registry)
        .with_context(|| format!("failed to open {}", args.trace.display()))?;

    let mut controller = None;
    let backend = match args.backend {
        BackendKind::Window => Backend::Window {
            window: args.window,
        },
        BackendKind::Pbuffer => Backend::Pbuffer,
        BackendKind::Fbdev if args.step => {
            let (stepper, control) = step::channel();
            controller = Some(control);
            Backend::Fbdev {
                stepper: Some(stepper),
            }
        }
        BackendKind::Fbdev => Backend::Fbdev { stepper: None },
        BackendKind::Headless => Backend::Headless,
    };
    if args.step && controller.is_none() {
        tracing::warn!("--step needs a steppable backend, ignoring it");
    }
    let controller = controller.map(|control| thread::spawn(move || drive(control)));

    let config = ReplayConfig {
        width: args.width,
        height: args.height,
        window: args.window,
        attributes: Vec::new(),
        policy: if args.abort_unsupported {
            UnsupportedPolicy::Abort
        } else {
            UnsupportedPolicy::Skip
        },
    };
    let mut retracer = Retracer::new(RecordingDriver::new(), backend, config);
    let stats = retracer
        .replay(&mut stream)
        .with_context(|| format!("failed to replay {}", args.trace.display()))?;

    // Dropping the retracer closes the frame channel and lets the controller finish.
    drop(retracer);
    if let Some(controller) = controller {
        let _ = controller.join();
    }

    println!("calls => {}", stats.calls);
    println!("frames => {}", stats.frames);
    println!("skipped => {}", stats.skipped);
    println!("synthetic => {}", stats.synthetic);

    Ok(())
}

/// Steps the replay from stdin.
fn drive(controller: StepController) {
    let mut lines = io::stdin().lock().lines();
    while let Some(frame) = controller.wait_frame() {
        eprintln!("frame {frame}");
        let command = match lines.next() {
            Some(Ok(line)) if line.trim() == "c" => StepCommand::Continue,
            Some(Ok(_)) => StepCommand::Step,
            Some(Err(_)) | None => return,
        };
        if !controller.send(command) {
            return;
        }
    }
}
