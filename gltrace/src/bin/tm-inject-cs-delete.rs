use anyhow::{Context, Result};
use clap::Parser;
use gltrace::{ClientSideAnalysis, Registry, RewriteSummary, TraceWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

/// Injects a glDeleteClientSideBuffer call after the last use of every client-side buffer.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Trace to read. It is scanned twice.
    source: PathBuf,

    /// Rewritten trace to create.
    target: PathBuf,

    /// Log every buffer's last use.
    #[arg(short, long)]
    debug: bool,

    /// Verbosity level for stderr logging.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let level = match (args.debug, args.verbose) {
        (true, _) | (_, 2..) => "debug",
        (false, 1) => "info",
        (false, 0) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("TA_LOG").unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let registry = Registry::gles();

    // Nothing is created at the destination unless the discovery pass succeeds.
    let analysis = ClientSideAnalysis::run(&args.source, &registry)
        .with_context(|| format!("failed to analyze {}", args.source.display()))?;

    let writer = TraceWriter::create(&args.target)
        .with_context(|| format!("failed to create {}", args.target.display()))?;

    let summary = match rewrite(analysis, writer) {
        Ok(summary) => summary,
        Err(err) => {
            if let Err(e) = fs::remove_file(&args.target) {
                tracing::warn!("failed to remove {}: {e}", args.target.display());
            }
            return Err(err.context(format!("failed to rewrite {}", args.source.display())));
        }
    };

    for (tid, injected) in summary.threads.iter() {
        eprintln!("thread {tid} => {injected} deletions");
    }
    eprintln!(
        "{} records copied, {} deletions injected",
        summary.records, summary.injected
    );

    Ok(())
}

fn rewrite(
    analysis: ClientSideAnalysis<'_>,
    mut writer: TraceWriter<BufWriter<File>>,
) -> Result<RewriteSummary> {
    let summary = analysis.rewrite(&mut writer)?;
    writer.finish()?;
    Ok(summary)
}
