//! Client-side buffer lifetime analysis and deletion injection.
//!
//! Client-side buffers are emulated by the tracer, so nothing in a recorded trace tells the
//! replayer when one can be released. The rewrite works in two sequential passes over the source:
//!
//! 1. Discovery: every call is decoded and each reference to a client-side buffer updates the
//!    [`LastUseTable`] for the calling thread.
//! 2. Rewrite: the source is reopened, every call is copied to the output and a synthetic
//!    `glDeleteClientSideBuffer` is written right after the last use of each buffer, on the same
//!    thread.
//!
//! Buffers whose latest reference is already a deletion are retired and get nothing injected, so
//! rewriting a rewritten trace adds no further calls.
use crate::header::Header;
use crate::reader::{CallStream, TraceSource};
use crate::record::{self, CallRecord, Value};
use crate::registry::{Registry, Signature, DELETE_CLIENT_SIDE_BUFFER};
use crate::writer::TraceWriter;
use crate::TraceError;
use std::collections::BTreeMap;
use std::io::Write;

/// Name of the transformation recorded in the header's conversion chain.
pub const CONVERSION_NAME: &str = "inject_client_side_delete";

/// Where in a call a client-side buffer was referenced.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Usage {
    Argument(usize),
    Return,
}

/// The latest reference to one client-side buffer on one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastUse {
    callno: u32,
    call: &'static str,
    usage: Usage,
    retired: bool,
}

impl LastUse {
    pub fn callno(&self) -> u32 {
        self.callno
    }

    pub fn call(&self) -> &'static str {
        self.call
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// True if the latest reference deleted the buffer.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Human readable description of the reference, e.g. `glVertexAttribPointer arg 5`.
    pub fn reason(&self) -> String {
        match self.usage {
            Usage::Argument(position) => format!("{} arg {position}", self.call),
            Usage::Return => format!("{} return", self.call),
        }
    }
}

/// Thread id → buffer id → latest reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastUseTable {
    threads: BTreeMap<u32, BTreeMap<u32, LastUse>>,
}

impl LastUseTable {
    /// Records every client-side buffer referenced by `call`.
    pub fn observe(&mut self, call: &CallRecord<'_>) {
        for (position, arg) in call.args().iter().enumerate() {
            if let Some(id) = arg.client_side_id() {
                self.touch(call, id, Usage::Argument(position));
            }
        }
        if let Some(id) = call.ret().and_then(Value::client_side_id) {
            self.touch(call, id, Usage::Return);
        }
        if call.name() == DELETE_CLIENT_SIDE_BUFFER {
            if let Some(id) = call.arg(0).and_then(Value::client_side_id) {
                if let Some(entry) = self.entry_mut(call.tid(), id) {
                    entry.retired = true;
                }
            }
        }
    }

    fn touch(&mut self, call: &CallRecord<'_>, id: u32, usage: Usage) {
        let entry = self
            .threads
            .entry(call.tid())
            .or_default()
            .entry(id)
            .or_insert(LastUse {
                callno: call.callno(),
                call: call.name(),
                usage,
                retired: false,
            });
        if call.callno() >= entry.callno {
            entry.callno = call.callno();
            entry.call = call.name();
            entry.usage = usage;
            entry.retired = false;
        }
    }

    fn entry_mut(&mut self, tid: u32, id: u32) -> Option<&mut LastUse> {
        self.threads.get_mut(&tid)?.get_mut(&id)
    }

    pub fn get(&self, tid: u32, id: u32) -> Option<&LastUse> {
        self.threads.get(&tid)?.get(&id)
    }

    /// Iterates threads in ascending id order.
    pub fn threads(&self) -> impl Iterator<Item = (u32, &BTreeMap<u32, LastUse>)> {
        self.threads.iter().map(|(tid, resources)| (*tid, resources))
    }

    /// Number of (thread, buffer) pairs.
    pub fn len(&self) -> usize {
        self.threads.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the list of deletions to inject, keyed by the call they follow.
    pub fn expiries(&self) -> ExpiryPlan {
        let mut by_call: BTreeMap<u32, Vec<(u32, u32)>> = BTreeMap::new();
        for (tid, resources) in self.threads.iter() {
            for (id, last) in resources.iter().filter(|(_, last)| !last.retired) {
                by_call.entry(last.callno).or_default().push((*tid, *id));
            }
        }
        ExpiryPlan { by_call }
    }
}

/// Deletions to inject: call number → `(tid, buffer id)` pairs in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryPlan {
    by_call: BTreeMap<u32, Vec<(u32, u32)>>,
}

impl ExpiryPlan {
    /// Deletions that go right after call `callno`.
    pub fn at(&self, callno: u32) -> &[(u32, u32)] {
        self.by_call.get(&callno).map_or(&[], Vec::as_slice)
    }

    /// Total number of deletions.
    pub fn len(&self) -> usize {
        self.by_call.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_call.is_empty()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Pass {
    Discovery,
    Rewrite,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Rewrite => write!(f, "rewrite"),
        }
    }
}

/// A fatal rewrite failure. The output must be treated as invalid.
#[derive(Debug, thiserror::Error)]
#[error("{pass} pass failed after {processed} records")]
pub struct RewriteError {
    pub pass: Pass,
    pub processed: usize,
    #[source]
    pub source: TraceError,
}

impl RewriteError {
    fn new(pass: Pass, processed: usize, source: impl Into<TraceError>) -> Self {
        Self {
            pass,
            processed,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// Source records copied to the output.
    pub records: usize,
    /// Deletions injected.
    pub injected: usize,
    /// Deletions injected per thread.
    pub threads: BTreeMap<u32, usize>,
}

/// Result of the discovery pass, ready to drive the rewrite pass.
pub struct ClientSideAnalysis<'s> {
    stream: CallStream<'s>,
    table: LastUseTable,
    delete: &'s Signature,
    records: usize,
}

impl<'s> ClientSideAnalysis<'s> {
    /// Runs the discovery pass over `source`.
    pub fn run(source: &'s dyn TraceSource, registry: &'s Registry) -> Result<Self, RewriteError> {
        let _span = tracing::debug_span!("discovery", source = %source.describe()).entered();

        let delete = registry.by_name(DELETE_CLIENT_SIDE_BUFFER).ok_or_else(|| {
            RewriteError::new(
                Pass::Discovery,
                0,
                record::Error::UnregisteredCall(String::from(DELETE_CLIENT_SIDE_BUFFER)),
            )
        })?;
        let mut stream = CallStream::open(source, registry)
            .map_err(|e| RewriteError::new(Pass::Discovery, 0, e))?;

        let mut records = 0;
        loop {
            match stream.next_call() {
                Ok(Some(_)) => records += 1,
                Ok(None) => break,
                Err(e) => return Err(RewriteError::new(Pass::Discovery, records, e)),
            }
        }

        let table = stream.take_last_use();
        for (tid, resources) in table.threads() {
            tracing::info!(tid, buffers = resources.len(), "client-side buffers in use");
            for (id, last) in resources {
                tracing::debug!(
                    tid,
                    id,
                    callno = last.callno(),
                    retired = last.is_retired(),
                    "last use in {}",
                    last.reason()
                );
            }
        }

        Ok(Self {
            stream,
            table,
            delete,
            records,
        })
    }

    pub fn last_use(&self) -> &LastUseTable {
        &self.table
    }

    /// Number of records seen by the discovery pass.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Raw header of the source trace.
    pub fn header(&self) -> &[u8] {
        self.stream.header()
    }

    /// Reopens the source and writes the rewritten trace to `writer`.
    pub fn rewrite<W: Write>(
        mut self,
        writer: &mut TraceWriter<W>,
    ) -> Result<RewriteSummary, RewriteError> {
        let source = self.stream.source().describe();
        let _span = tracing::debug_span!("rewrite", source = %source).entered();

        let plan = self.table.expiries();
        let mut header = Header::parse(self.stream.header())
            .map_err(|e| RewriteError::new(Pass::Rewrite, 0, e))?;
        header.add_conversion(
            CONVERSION_NAME,
            &source,
            serde_json::json!({ "deletions": plan.len() }),
        );

        self.stream
            .restart()
            .map_err(|e| RewriteError::new(Pass::Rewrite, 0, e))?;
        writer
            .write_header(&header.to_bytes())
            .map_err(|e| RewriteError::new(Pass::Rewrite, 0, e))?;

        let delete = self.delete;
        let mut summary = RewriteSummary::default();
        loop {
            let call = match self.stream.next_call() {
                Ok(Some(call)) => call,
                Ok(None) => break,
                Err(e) => return Err(RewriteError::new(Pass::Rewrite, summary.records, e)),
            };
            writer
                .append(&call)
                .map_err(|e| RewriteError::new(Pass::Rewrite, summary.records, e))?;
            summary.records += 1;

            if call.is_synthetic() {
                continue;
            }
            for &(tid, id) in plan.at(call.callno()) {
                if tid != call.tid() {
                    tracing::warn!(
                        tid,
                        id,
                        callno = call.callno(),
                        "last use recorded on a different thread, skipping"
                    );
                    continue;
                }
                let deletion = CallRecord::new(
                    delete,
                    tid,
                    call.callno(),
                    vec![Value::ClientSideBuffer(id)],
                )
                .map_err(|e| RewriteError::new(Pass::Rewrite, summary.records, e))?
                .into_synthetic();
                writer
                    .append(&deletion)
                    .map_err(|e| RewriteError::new(Pass::Rewrite, summary.records, e))?;
                summary.injected += 1;
                *summary.threads.entry(tid).or_default() += 1;
            }
        }

        if summary.records != self.records {
            tracing::warn!(
                discovered = self.records,
                rewritten = summary.records,
                "source changed between passes"
            );
        }
        Ok(summary)
    }
}

/// Runs both passes of the client-side deletion rewrite.
pub fn inject_client_side_deletes<W: Write>(
    source: &dyn TraceSource,
    registry: &Registry,
    writer: &mut TraceWriter<W>,
) -> Result<RewriteSummary, RewriteError> {
    ClientSideAnalysis::run(source, registry)?.rewrite(writer)
}
