//! Tests for rendering, sinks and dispatcher workers

mod common;

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use common::{
    entry, itm_header, itm_word, sample_table, stimulus, Collect, SharedBuffer, BUFFER_ADDR, PAIR_ADDR, RADIO_ADDR,
    TEXT_ADDR,
};
use tracelog_core::config::{ClockConfig, Protocol};
use tracelog_core::decoder::{ports, RESET_TOKEN};
use tracelog_core::dispatcher::{
    format_line, BacklogSink, Dispatcher, ModuleFormatter, Registry, RenderError, Sink, WriterSink,
};
use tracelog_core::symbols::SymbolLookup;
use tracelog_core::transport::{ChannelSource, FileSource};
use tracelog_core::types::{LogRecord, Opcode, SymbolKind};
use tracelog_core::TraceError;

const ITM: Protocol = Protocol::Itm(ClockConfig {
    clock_hz: 48_000_000,
    prescaler: 64,
    radio_tick_hz: 4_000_000,
});

fn lookup(with_format: bool) -> Arc<dyn SymbolLookup>
{
    Arc::new(sample_table(with_format))
}

fn record(address: u32, data: &[u8]) -> LogRecord
{
    let entry = sample_table(true).get(address).unwrap();
    LogRecord::new("test", entry, data.to_vec(), 0.0, 0.0)
}

/// One text record per value, each in its own header.
fn counting_stream(values: impl IntoIterator<Item = u32>) -> Vec<u8>
{
    let mut stream = RESET_TOKEN.to_vec();
    for value in values {
        stream.extend_from_slice(&itm_header(TEXT_ADDR));
        stream.extend_from_slice(&itm_word(value));
    }
    stream
}

// ---- rendering ----

#[test]
fn test_builtin_rendering()
{
    let dispatcher = Dispatcher::new(Registry::new(), lookup(true));

    let text = record(PAIR_ADDR, &[3, 0, 0, 0, 9, 0, 0, 0]);
    assert_eq!(dispatcher.render(&text).unwrap(), "3 of 9");

    let buffer = record(BUFFER_ADDR, &[0x01, 0x02, 0x0A]);
    assert_eq!(buffer.entry.kind, SymbolKind::Buffer);
    assert_eq!(dispatcher.render(&buffer).unwrap(), "rx 01 02 0a");

    let empty = record(BUFFER_ADDR, &[]);
    assert_eq!(dispatcher.render(&empty).unwrap(), "rx");

    let negative = record(RADIO_ADDR, &(-50i32).to_le_bytes());
    assert_eq!(dispatcher.render(&negative).unwrap(), "rssi -50");
}

#[test]
fn test_custom_opcode_renders_format_verbatim()
{
    let dispatcher = Dispatcher::new(Registry::new(), lookup(true));
    let custom = record(common::CUSTOM_ADDR, &[1, 0, 0, 0]);
    assert_eq!(custom.opcode, Opcode::Custom("LOG_OPCODE_PACKET".to_string()));
    assert_eq!(dispatcher.render(&custom).unwrap(), "packet");
}

#[test]
fn test_formatter_last_registration_wins()
{
    let first: Arc<dyn ModuleFormatter> = Arc::new(|_: &LogRecord, rendered: String| format!("first {rendered}"));
    let second: Arc<dyn ModuleFormatter> = Arc::new(|record: &LogRecord, rendered: String| {
        format!("{} says {rendered}", record.module)
    });

    let mut registry = Registry::new();
    registry.register_formatter("LogMod_App", first);
    registry.register_formatter("LogMod_App", second);
    let dispatcher = Dispatcher::new(registry, lookup(true));

    assert_eq!(
        dispatcher.render(&record(TEXT_ADDR, &[5, 0, 0, 0])).unwrap(),
        "LogMod_App says count 5"
    );
    // other modules are untouched
    assert_eq!(
        dispatcher.render(&record(RADIO_ADDR, &[1, 0, 0, 0])).unwrap(),
        "rssi 1"
    );
}

#[test]
fn test_render_failure_drops_record()
{
    let all = Collect::new();
    let mut registry = Registry::new();
    registry.add_sink(all.clone());
    let dispatcher = Dispatcher::new(registry, lookup(true));

    let short = record(PAIR_ADDR, &[1, 0, 0, 0]);
    assert!(matches!(
        dispatcher.render(&short),
        Err(RenderError::ArgumentMismatch {
            expected: 2,
            actual: 1,
            ..
        })
    ));
    assert!(!dispatcher.ingest(&short));

    let misaligned = record(TEXT_ADDR, &[1, 0, 0]);
    assert_eq!(dispatcher.render(&misaligned), Err(RenderError::MisalignedData { len: 3 }));
    assert!(!dispatcher.ingest(&misaligned));

    assert!(dispatcher.ingest(&record(TEXT_ADDR, &[2, 0, 0, 0])));
    assert_eq!(all.rendered(), vec!["count 2".to_string()]);
    assert_eq!(dispatcher.dropped(), 2);
    assert_eq!(dispatcher.delivered(), 1);
}

#[test]
fn test_unsupported_conversion_is_a_render_error()
{
    let mut table = sample_table(true);
    let address = 0x9000_0100;
    table.insert(
        address,
        entry(SymbolKind::FormattedText, Opcode::FormattedText, "LogMod_App", "wide %n", 1),
    );
    let entry = table.get(address).unwrap();
    let dispatcher = Dispatcher::new(Registry::new(), Arc::new(table));

    let record = LogRecord::new("test", entry, vec![0; 4], 0.0, 0.0);
    assert!(matches!(
        dispatcher.render(&record),
        Err(RenderError::UnsupportedConversion { conversion: 'n', .. })
    ));
}

#[test]
fn test_oversized_field_width_drops_record()
{
    let all = Collect::new();
    let mut registry = Registry::new();
    registry.add_sink(all.clone());

    let mut table = sample_table(true);
    let address = 0x9000_0100;
    table.insert(
        address,
        entry(SymbolKind::FormattedText, Opcode::FormattedText, "LogMod_App", "%2000000000d", 1),
    );
    let wide = LogRecord::new("test", table.get(address).unwrap(), vec![1, 0, 0, 0], 0.0, 0.0);
    let dispatcher = Dispatcher::new(registry, Arc::new(table));

    assert!(matches!(dispatcher.render(&wide), Err(RenderError::WidthTooLarge { .. })));
    assert!(!dispatcher.ingest(&wide));
    assert!(all.rendered().is_empty());
    assert_eq!(dispatcher.dropped(), 1);
}

// ---- fan-out ----

#[test]
fn test_sinks_and_subscribers_receive_records()
{
    let all = Collect::new();
    let radio = Collect::new();
    let app = Collect::new();

    let mut registry = Registry::new();
    registry.add_sink(all.clone());
    registry.subscribe("LogMod_Radio", radio.clone());
    registry.subscribe("LogMod_App", app.clone());
    let dispatcher = Dispatcher::new(registry, lookup(true));

    assert!(dispatcher.ingest(&record(TEXT_ADDR, &[1, 0, 0, 0])));
    assert!(dispatcher.ingest(&record(RADIO_ADDR, &(-7i32).to_le_bytes())));
    assert!(dispatcher.ingest(&record(BUFFER_ADDR, &[0xFF])));

    assert_eq!(all.rendered(), vec!["count 1", "rssi -7", "rx ff"]);
    assert_eq!(radio.rendered(), vec!["rssi -7"]);
    assert_eq!(app.rendered(), vec!["count 1"]);
}

// ---- workers ----

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_records_reach_sinks_in_order()
{
    let all = Collect::new();
    let mut registry = Registry::new();
    registry.add_sink(all.clone());

    let mut handle = Dispatcher::new(registry, lookup(true)).start();
    let (sender, source) = ChannelSource::pair("itm0");
    handle.add_worker(Box::new(source), &ITM).unwrap();

    let stream = counting_stream(0..200);
    let total = stream.len() as u64;
    // odd chunk size so frames straddle reads
    for chunk in stream.chunks(7) {
        sender.send(chunk.to_vec()).unwrap();
    }
    drop(sender);

    let summary = handle.join().await;
    assert_eq!(summary.delivered, 200);
    assert_eq!(summary.dropped, 0);
    assert_eq!(summary.workers.len(), 1);
    assert_eq!(summary.workers[0].transport, "itm0");
    assert_eq!(summary.workers[0].bytes, total);
    assert_eq!(summary.workers[0].records, 200);

    let expected: Vec<String> = (0..200).map(|value| format!("count {value}")).collect();
    assert_eq!(all.rendered(), expected);
}

/// Sink that blocks its caller until released.
struct Gate
{
    entered: tokio::sync::mpsc::UnboundedSender<String>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Sink for Gate
{
    fn notify(&self, _record: &LogRecord, rendered: &str)
    {
        let _ = self.entered.send(rendered.to_string());
        let _ = self.release.lock().unwrap().recv();
    }
}

#[tokio::test]
async fn test_blocking_sink_does_not_stall_runtime()
{
    let (entered, mut entered_rx) = tokio::sync::mpsc::unbounded_channel();
    let (release, release_rx) = mpsc::channel();
    let mut registry = Registry::new();
    registry.add_sink(Arc::new(Gate {
        entered,
        release: Mutex::new(release_rx),
    }));

    let mut handle = Dispatcher::new(registry, lookup(true)).start();
    let (sender, source) = ChannelSource::pair("itm0");
    handle.add_worker(Box::new(source), &ITM).unwrap();
    sender.send(counting_stream([4])).unwrap();
    drop(sender);

    // single-threaded runtime: these awaits only complete if the sink runs elsewhere
    assert_eq!(entered_rx.recv().await.as_deref(), Some("count 4"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    release.send(()).unwrap();

    let summary = handle.join().await;
    assert_eq!(summary.delivered, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_workers_keep_per_transport_order()
{
    let all = Collect::new();
    let mut registry = Registry::new();
    registry.add_sink(all.clone());
    let mut handle = Dispatcher::new(registry, lookup(true)).start();

    let mut senders = Vec::new();
    for name in ["left", "right"] {
        let (sender, source) = ChannelSource::pair(name);
        handle.add_worker(Box::new(source), &ITM).unwrap();
        senders.push(sender);
    }
    let left = counting_stream(0..100);
    let right = counting_stream(1000..1100);
    for (index, (a, b)) in left.chunks(5).zip(right.chunks(5)).enumerate() {
        senders[0].send(a.to_vec()).unwrap();
        senders[1].send(b.to_vec()).unwrap();
        if index % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }
    drop(senders);

    let summary = handle.join().await;
    assert_eq!(summary.delivered, 200);

    let lines = all.lines();
    for (name, range) in [("left", 0..100), ("right", 1000..1100)] {
        let seen: Vec<&str> = lines
            .iter()
            .filter(|(alias, _)| alias == name)
            .map(|(_, rendered)| rendered.as_str())
            .collect();
        let expected: Vec<String> = range.map(|value| format!("count {value}")).collect();
        assert_eq!(seen, expected, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_misconfigured_worker_does_not_stop_others()
{
    let all = Collect::new();
    let mut registry = Registry::new();
    registry.add_sink(all.clone());
    // no timestamp format, so the header-framed wire cannot start
    let mut handle = Dispatcher::new(registry, lookup(false)).start();

    let (_uart_sender, uart) = ChannelSource::pair("uart0");
    assert!(matches!(
        handle.add_worker(Box::new(uart), &Protocol::Uart),
        Err(TraceError::MissingTimestampFormat)
    ));

    let (sender, itm) = ChannelSource::pair("itm0");
    handle.add_worker(Box::new(itm), &ITM).unwrap();
    sender.send(counting_stream([4, 5])).unwrap();
    drop(sender);

    let summary = handle.join().await;
    assert_eq!(summary.workers.len(), 1);
    assert_eq!(all.rendered(), vec!["count 4", "count 5"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_idle_workers()
{
    let mut handle = Dispatcher::new(Registry::new(), lookup(true)).start();
    let (sender, source) = ChannelSource::pair("idle");
    handle.add_worker(Box::new(source), &ITM).unwrap();

    // the sender stays alive, so only the stop flag can end the worker
    let summary = tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("workers did not observe the stop flag");
    assert_eq!(summary.workers.len(), 1);
    assert_eq!(summary.delivered, 0);
    drop(sender);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_worker_decodes_capture()
{
    let mut stream = counting_stream([1, 2]);
    stream.extend_from_slice(&itm_header(BUFFER_ADDR));
    stream.extend_from_slice(&itm_word(2));
    stream.extend_from_slice(&stimulus(ports::TRACE, &[0xAB, 0xCD]));

    let capture = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(capture.path(), &stream).unwrap();

    let output = SharedBuffer::default();
    let mut registry = Registry::new();
    registry.add_sink(Arc::new(WriterSink::new(output.clone())));
    let mut handle = Dispatcher::new(registry, lookup(true)).start();

    let source = FileSource::open(capture.path()).unwrap().with_name("capture").with_chunk_size(3);
    handle.add_worker(Box::new(source), &ITM).unwrap();
    let summary = handle.join().await;

    assert_eq!(summary.delivered, 3);
    let text = output.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("[capture]"));
    assert!(lines[0].ends_with("app/main.c:42 count 1"));
    assert!(lines[2].ends_with("rx ab cd"));
}

// ---- sinks ----

#[test]
fn test_format_line_layout()
{
    let record = LogRecord::new("uart0", sample_table(true).get(TEXT_ADDR).unwrap(), vec![], 1.5, 1.5);
    let line = format_line(&record, "count 3");
    assert_eq!(line, "1970-01-01T00:00:01.500000Z [uart0] INFO    LogMod_App app/main.c:42 count 3");
}

#[test]
fn test_writer_sink_appends_lines()
{
    let sink = WriterSink::new(Vec::new());
    sink.notify(&record(TEXT_ADDR, &[1, 0, 0, 0]), "count 1");
    sink.notify(&record(TEXT_ADDR, &[2, 0, 0, 0]), "count 2");

    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("count 1"));
    assert!(lines[1].ends_with("count 2"));
}

#[test]
fn test_backlog_replayed_before_new_lines()
{
    let sink = BacklogSink::new(16);
    for value in 0..3 {
        sink.notify(&record(TEXT_ADDR, &[value, 0, 0, 0]), &format!("count {value}"));
    }

    let output = SharedBuffer::default();
    sink.attach(Box::new(output.clone()));
    sink.notify(&record(TEXT_ADDR, &[3, 0, 0, 0]), "count 3");
    sink.flush();

    let text = output.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    for (value, line) in lines.iter().enumerate() {
        assert!(line.ends_with(&format!("count {value}")), "{line}");
    }
}

#[test]
fn test_backlog_drops_oldest_when_full()
{
    let sink = BacklogSink::new(2);
    for value in 0..5 {
        sink.notify(&record(TEXT_ADDR, &[value, 0, 0, 0]), &format!("count {value}"));
    }

    let output = SharedBuffer::default();
    sink.attach(Box::new(output.clone()));
    sink.flush();

    let text = output.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("count 3"));
    assert!(lines[1].ends_with("count 4"));
}
