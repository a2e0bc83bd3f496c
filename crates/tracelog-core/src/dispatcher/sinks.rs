//! Output sinks and subscribers.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;

use chrono::SecondsFormat;
use tracing::{debug, error, info, warn};

use crate::types::{LogRecord, Severity};

/// Receiver of rendered records.
///
/// Called synchronously from the dispatcher's ingestion loop, once per
/// record and in arrival order per transport. The loop runs on Tokio's
/// blocking pool, so file and terminal writes are fine here; a sink that
/// stalls holds up every other sink.
pub trait Sink: Send + Sync
{
    fn notify(&self, record: &LogRecord, rendered: &str);
}

/// One-line text form shared by the text sinks.
#[must_use]
pub fn format_line(record: &LogRecord, rendered: &str) -> String
{
    let time = record.host_time().map_or_else(
        || format!("{:.6}", record.host_timestamp),
        |time| time.to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    format!(
        "{time} [{}] {:<7} {} {}:{} {rendered}",
        record.alias, record.level, record.module, record.file, record.line
    )
}

/// Re-emits records as `tracing` events, mapped onto tracing levels.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink
{
    fn notify(&self, record: &LogRecord, rendered: &str)
    {
        let transport = record.alias.as_str();
        let module = record.module.as_str();
        let site = format!("{}:{}", record.file, record.line);
        match record.level {
            Severity::Error => error!(transport, module, %site, device_time = record.device_timestamp, "{rendered}"),
            Severity::Warning => warn!(transport, module, %site, device_time = record.device_timestamp, "{rendered}"),
            Severity::Info => info!(transport, module, %site, device_time = record.device_timestamp, "{rendered}"),
            _ => debug!(transport, module, %site, device_time = record.device_timestamp, "{rendered}"),
        }
    }
}

/// Writes one line per record to any writer (stdout, a file, a buffer).
pub struct WriterSink<W>
{
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W>
{
    pub fn new(writer: W) -> Self
    {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W
    {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Sink for WriterSink<W>
{
    fn notify(&self, record: &LogRecord, rendered: &str)
    {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(writer, "{}", format_line(record, rendered)).and_then(|()| writer.flush()) {
            warn!(%err, "failed to write record");
        }
    }
}

enum BacklogMessage
{
    Line(String),
    Attach(Box<dyn Write + Send>),
    Flush(mpsc::Sender<()>),
}

/// Buffers lines until a consumer attaches, then streams.
///
/// A background thread owns the backlog. On [`BacklogSink::attach`] it writes
/// the backlog in arrival order before any newer line. If the consumer's
/// writer fails, it is detached and lines queue up again. The backlog keeps
/// at most `capacity` lines; the oldest are dropped first.
pub struct BacklogSink
{
    sender: mpsc::Sender<BacklogMessage>,
}

impl BacklogSink
{
    #[must_use]
    pub fn new(capacity: usize) -> Self
    {
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("tracelog-backlog".to_string())
            .spawn(move || backlog_loop(&receiver, capacity.max(1)));
        if let Err(err) = spawned {
            error!(%err, "failed to start backlog thread, records will be discarded");
        }
        Self { sender }
    }

    /// Hand over a consumer; the backlog is flushed to it first.
    pub fn attach(&self, writer: Box<dyn Write + Send>)
    {
        self.send(BacklogMessage::Attach(writer));
    }

    /// Block until every line sent so far has been handled.
    pub fn flush(&self)
    {
        let (ack, done) = mpsc::channel();
        self.send(BacklogMessage::Flush(ack));
        // a closed channel means the thread is gone; nothing left to wait for
        let _ = done.recv();
    }

    fn send(&self, message: BacklogMessage)
    {
        if self.sender.send(message).is_err() {
            warn!("backlog thread has stopped");
        }
    }
}

impl Sink for BacklogSink
{
    fn notify(&self, record: &LogRecord, rendered: &str)
    {
        self.send(BacklogMessage::Line(format_line(record, rendered)));
    }
}

fn backlog_loop(receiver: &mpsc::Receiver<BacklogMessage>, capacity: usize)
{
    let mut backlog: VecDeque<String> = VecDeque::new();
    let mut consumer: Option<Box<dyn Write + Send>> = None;
    let mut dropped = 0usize;

    while let Ok(message) = receiver.recv() {
        match message {
            BacklogMessage::Line(line) => {
                backlog.push_back(line);
                if backlog.len() > capacity {
                    backlog.pop_front();
                    dropped += 1;
                    if dropped == 1 || dropped % 1000 == 0 {
                        warn!(dropped, capacity, "backlog full, discarding oldest records");
                    }
                }
            }
            BacklogMessage::Attach(writer) => {
                debug!(pending = backlog.len(), "backlog consumer attached");
                consumer = Some(writer);
            }
            BacklogMessage::Flush(ack) => {
                drain(&mut backlog, &mut consumer);
                let _ = ack.send(());
                continue;
            }
        }
        drain(&mut backlog, &mut consumer);
    }
}

fn drain(backlog: &mut VecDeque<String>, consumer: &mut Option<Box<dyn Write + Send>>)
{
    let Some(writer) = consumer.as_mut() else {
        return;
    };
    while let Some(line) = backlog.front() {
        if let Err(err) = writeln!(writer, "{line}") {
            warn!(%err, pending = backlog.len(), "backlog consumer failed, detaching");
            *consumer = None;
            return;
        }
        backlog.pop_front();
    }
    if let Err(err) = writer.flush() {
        warn!(%err, "backlog consumer failed to flush, detaching");
        *consumer = None;
    }
}
