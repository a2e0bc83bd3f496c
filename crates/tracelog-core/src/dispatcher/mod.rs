//! # Dispatcher
//!
//! Runs one worker per byte source and fans finished records out to sinks.
//!
//! Each worker owns a private [`Pipeline`] and runs on a blocking thread,
//! polling its source with a bounded timeout so it can observe the shared
//! stop flag. Records travel over a single multi-producer channel to one
//! ingestion loop, also on a blocking thread, which renders them and
//! notifies every sink plus the subscribers of the record's module.
//!
//! ## Ordering
//!
//! Records from one worker reach every sink in arrival order. Records from
//! different workers interleave arbitrarily.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tracelog_core::config::{ClockConfig, Protocol, ResolverConfig};
//! use tracelog_core::dispatcher::{Dispatcher, Registry, TracingSink};
//! use tracelog_core::symbols::SymbolResolver;
//! use tracelog_core::transport::FileSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = Arc::new(SymbolResolver::new(ResolverConfig::new(vec!["app.out".into()]))?);
//! let mut registry = Registry::new();
//! registry.add_sink(Arc::new(TracingSink));
//!
//! let mut handle = Dispatcher::new(registry, resolver).start();
//! let source = FileSource::open("capture.bin".as_ref())?;
//! handle.add_worker(Box::new(source), &Protocol::Itm(ClockConfig::default()))?;
//! let summary = handle.join().await;
//! println!("{} records", summary.delivered);
//! # Ok(())
//! # }
//! ```

mod render;
mod sinks;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use render::{format_printf, hex_dump, render_builtin, ModuleFormatter, RenderError, MAX_FIELD_WIDTH};
pub use sinks::{format_line, BacklogSink, Sink, TracingSink, WriterSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::Protocol;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::symbols::SymbolLookup;
use crate::transport::{ByteSource, Received};
use crate::types::LogRecord;

/// How long a worker waits on its source before rechecking the stop flag.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

const INGEST_QUEUE_DEPTH: usize = 1024;

/// Sinks, module subscribers and module formatters, fixed before start.
#[derive(Default)]
pub struct Registry
{
    sinks: Vec<Arc<dyn Sink>>,
    subscribers: HashMap<String, Vec<Arc<dyn Sink>>>,
    formatters: HashMap<String, Arc<dyn ModuleFormatter>>,
}

impl Registry
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Receive every record.
    pub fn add_sink(&mut self, sink: Arc<dyn Sink>)
    {
        self.sinks.push(sink);
    }

    /// Receive the records of one module only.
    pub fn subscribe(&mut self, module: impl Into<String>, sink: Arc<dyn Sink>)
    {
        self.subscribers.entry(module.into()).or_default().push(sink);
    }

    /// Install the formatter for a module. A later registration replaces an
    /// earlier one.
    pub fn register_formatter(&mut self, module: impl Into<String>, formatter: Arc<dyn ModuleFormatter>)
    {
        let module = module.into();
        if self.formatters.insert(module.clone(), formatter).is_some() {
            debug!(%module, "replacing module formatter");
        }
    }
}

/// Rendering and fan-out for finished records.
pub struct Dispatcher
{
    registry: Registry,
    lookup: Arc<dyn SymbolLookup>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher
{
    #[must_use]
    pub fn new(registry: Registry, lookup: Arc<dyn SymbolLookup>) -> Self
    {
        Self {
            registry,
            lookup,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Render a record: built-in rendering for reserved opcodes, then the
    /// module's formatter if one is registered.
    pub fn render(&self, record: &LogRecord) -> std::result::Result<String, RenderError>
    {
        let rendered = if record.opcode.is_builtin() {
            render_builtin(record)?
        } else {
            record.entry.format.clone()
        };
        Ok(match self.registry.formatters.get(&record.module) {
            Some(formatter) => formatter.format(record, rendered),
            None => rendered,
        })
    }

    /// Render one record and hand it to every interested sink.
    ///
    /// Returns `false` when the record failed to render and was dropped.
    pub fn ingest(&self, record: &LogRecord) -> bool
    {
        let rendered = match self.render(record) {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(
                    %err,
                    transport = %record.alias,
                    module = %record.module,
                    site = %format_args!("{}:{}", record.file, record.line),
                    data = %hex_dump(&record.data),
                    "dropping record that failed to render"
                );
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        for sink in &self.registry.sinks {
            sink.notify(record, &rendered);
        }
        if let Some(subscribers) = self.registry.subscribers.get(&record.module) {
            for subscriber in subscribers {
                subscriber.notify(record, &rendered);
            }
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    #[must_use]
    pub fn delivered(&self) -> u64
    {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64
    {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the ingestion loop. Must be called inside a Tokio runtime.
    ///
    /// Sinks do blocking I/O, so ingestion runs on the blocking pool rather
    /// than on a runtime worker.
    #[must_use]
    pub fn start(self) -> DispatcherHandle
    {
        let dispatcher = Arc::new(self);
        let (sender, mut receiver) = mpsc::channel::<LogRecord>(INGEST_QUEUE_DEPTH);

        let ingest_dispatcher = dispatcher.clone();
        let ingest = tokio::task::spawn_blocking(move || {
            while let Some(record) = receiver.blocking_recv() {
                ingest_dispatcher.ingest(&record);
            }
        });

        DispatcherHandle {
            dispatcher,
            sender,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            ingest,
        }
    }
}

/// Per-worker totals reported when the worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport
{
    pub transport: String,
    pub bytes: u64,
    pub records: u64,
}

/// Totals for a whole dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary
{
    pub workers: Vec<WorkerReport>,
    /// Records rendered and handed to sinks
    pub delivered: u64,
    /// Records dropped because they failed to render
    pub dropped: u64,
}

/// Running dispatcher: add workers, then stop or wait for them.
pub struct DispatcherHandle
{
    dispatcher: Arc<Dispatcher>,
    sender: mpsc::Sender<LogRecord>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<WorkerReport>>,
    ingest: JoinHandle<()>,
}

impl DispatcherHandle
{
    /// Start a worker reading `source` with the given wire protocol.
    ///
    /// ## Errors
    ///
    /// Pipeline configuration errors (such as a missing timestamp format for
    /// the header-framed wire) are returned here, before any byte is read.
    /// Other workers are unaffected.
    pub fn add_worker(&mut self, source: Box<dyn ByteSource>, protocol: &Protocol) -> Result<()>
    {
        let pipeline = Pipeline::new(source.name(), protocol, self.dispatcher.lookup.clone())?;
        let worker = spawn_worker(source, pipeline, self.sender.clone(), self.stop.clone());
        self.workers.push(worker);
        Ok(())
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher>
    {
        &self.dispatcher
    }

    /// Ask every worker to stop; they exit within one read timeout.
    pub fn stop(&self)
    {
        self.stop.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool>
    {
        self.stop.clone()
    }

    /// Wait for every worker to finish on its own, then drain the ingestion
    /// queue.
    pub async fn join(self) -> DispatchSummary
    {
        let Self {
            dispatcher,
            sender,
            workers,
            ingest,
            ..
        } = self;

        let mut reports = Vec::with_capacity(workers.len());
        for worker in workers {
            match worker.await {
                Ok(report) => reports.push(report),
                Err(err) => error!(%err, "worker task failed"),
            }
        }

        drop(sender);
        if let Err(err) = ingest.await {
            error!(%err, "ingestion task failed");
        }

        DispatchSummary {
            workers: reports,
            delivered: dispatcher.delivered(),
            dropped: dispatcher.dropped(),
        }
    }

    /// Stop all workers and wait for them.
    pub async fn shutdown(self) -> DispatchSummary
    {
        self.stop();
        self.join().await
    }
}

fn spawn_worker(
    mut source: Box<dyn ByteSource>,
    mut pipeline: Pipeline,
    sender: mpsc::Sender<LogRecord>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<WorkerReport>
{
    tokio::task::spawn_blocking(move || {
        let mut report = WorkerReport {
            transport: pipeline.alias().to_string(),
            ..WorkerReport::default()
        };
        debug!(transport = %report.transport, "worker started");

        'read: while !stop.load(Ordering::Relaxed) {
            match source.receive(READ_TIMEOUT) {
                Ok(Received::Data(bytes)) => {
                    report.bytes += bytes.len() as u64;
                    for record in pipeline.feed(&bytes) {
                        // receiver gone: the dispatcher is shutting down
                        if sender.blocking_send(record).is_err() {
                            break 'read;
                        }
                        report.records += 1;
                    }
                }
                Ok(Received::Timeout) => {}
                Ok(Received::Eof) => {
                    debug!(transport = %report.transport, "byte source reached end of stream");
                    break;
                }
                Err(err) => {
                    error!(transport = %report.transport, %err, "byte source failed");
                    break;
                }
            }
        }

        if let Err(err) = source.close() {
            warn!(transport = %report.transport, %err, "failed to close byte source");
        }
        debug!(
            transport = %report.transport,
            bytes = report.bytes,
            records = report.records,
            pending = pipeline.pending_bytes(),
            "worker stopped"
        );
        report
    })
}
