use anyhow::Result;
use clap::Parser;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};

use gltrace::reader::{cont, TraceReader};
use gltrace::Registry;
use tracing_subscriber::filter::EnvFilter;

/// Counts the calls of each kind and the calls made by each thread.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input file or '-' to use stdin.
    #[arg(short, long, default_value_t = String::from("-"))]
    input: String,
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

    let mut calls: BTreeMap<&'static str, u32> = BTreeMap::new();
    let mut threads: BTreeMap<u32, u32> = BTreeMap::new();
    let mut synthetic: u32 = 0;
    let mut unknown: u32 = 0;

    trace.for_each(|raw| -> std::ops::ControlFlow<()> {
        *threads.entry(raw.tid()).or_default() += 1;
        if raw.is_synthetic() {
            synthetic += 1;
        }
        match registry.by_opcode(raw.opcode()) {
            Some(signature) => *calls.entry(signature.name).or_default() += 1,
            None => unknown += 1,
        }
        cont!()
    })?;

    for (name, count) in calls {
        println!("{name} => {count}");
    }
    if unknown > 0 {
        println!("<unknown> => {unknown}");
    }
    for (tid, count) in threads {
        println!("thread {tid} => {count}");
    }
    println!("synthetic => {synthetic}");
    println!("total => {}", trace.records());

    Ok(())
}

fn open_input(input: &str) -> io::Result<Box<dyn Read>> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    Ok(Box::new(fs::File::open(input)?))
}
