use anyhow::Result;
use clap::Parser;
use gltrace::reader::{try_break, TraceReader};
use gltrace::{Header, Registry, TraceError};
use std::fs;
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use tracing_subscriber::filter::EnvFilter;

/// Prints a human readable version of the trace.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input file or '-' to use stdin.
    #[arg(short, long, default_value_t = String::from("-"))]
    input: String,

    /// Also print the thread id of every call.
    #[arg(short, long)]
    threads: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("TA_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let registry = Registry::gles();

    let input = open_input(args.input.as_str())?;
    let mut trace = TraceReader::new(input)?;
    let mut stdout = io::stdout().lock();

    let header = Header::parse(trace.header())?;
    writeln!(stdout, "HEADER {}", String::from_utf8_lossy(&header.to_bytes()))?;
    for conversion in header.conversions() {
        writeln!(
            stdout,
            "CONVERSION {} from {} ({})",
            conversion.kind, conversion.source, conversion.tool_version
        )?;
    }

    trace
        .for_each(|raw| -> ControlFlow<TraceError> {
            let call = try_break!(raw.parse(&registry));
            let marker = if call.is_synthetic() { "*" } else { "" };
            if args.threads {
                try_break!(writeln!(stdout, "[{}] {marker}{call}", call.tid()));
            } else {
                try_break!(writeln!(stdout, "{marker}{call}"));
            }
            ControlFlow::Continue(())
        })?
        .map_or(Ok(()), Err)?;

    Ok(())
}

fn open_input(input: &str) -> io::Result<Box<dyn Read>> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    Ok(Box::new(fs::File::open(input)?))
}
