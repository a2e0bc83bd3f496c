use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracelog_core::config::{ClockConfig, Protocol, ResolverConfig};
use tracelog_core::dispatcher::{Dispatcher, Registry, WriterSink};
use tracelog_core::symbols::{SymbolLookup, SymbolResolver};
use tracelog_core::transport::FileSource;
use tracelog_utils::{error, info, init_logging, warn};

/// Decode trace-port log streams from embedded devices into readable records.
#[derive(Parser, Debug)]
#[command(name = "tracelog")]
#[command(version)]
#[command(about = "Decode trace-port log streams from embedded devices", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Decode capture files and print one line per record on stdout
    Decode
    {
        /// Debug artifact (ELF) holding the log metadata; repeat for several images
        #[arg(short, long = "elf", required = true)]
        elf: Vec<PathBuf>,
        /// Raw capture files, decoded concurrently
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Wire encoding of the captures
        #[arg(short, long, value_enum, default_value_t = WireProtocol::Itm)]
        protocol: WireProtocol,
        /// Trace timestamp clock in Hz (bit-packed wire only)
        #[arg(long, default_value_t = 48_000_000)]
        clock_hz: u32,
        /// Local timestamp prescaler (bit-packed wire only)
        #[arg(long, default_value_t = 64)]
        prescaler: u32,
        /// Radio timer tick rate in Hz (bit-packed wire only)
        #[arg(long, default_value_t = 4_000_000)]
        radio_hz: u32,
        #[command(flatten)]
        cache: CacheArgs,
        /// Reload symbols when an artifact changes while decoding
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Print the symbol table built from debug artifacts
    Symbols
    {
        /// Debug artifact (ELF) holding the log metadata; repeat for several images
        #[arg(short, long = "elf", required = true)]
        elf: Vec<PathBuf>,
        #[command(flatten)]
        cache: CacheArgs,
    },
}

#[derive(clap::Args, Debug)]
struct CacheArgs
{
    /// Directory for persisted symbol tables (default: $TRACELOG_CACHE_DIR or ~/.tracelog/cache)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Always scan the artifacts; never read or write the cache
    #[arg(long, default_value_t = false)]
    no_cache: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum WireProtocol
{
    /// Bit-packed instrumentation trace (ITM/SWO)
    Itm,
    /// Header-framed records
    Uart,
}

impl CacheArgs
{
    fn resolver_config(&self, elf: Vec<PathBuf>, watch: bool) -> ResolverConfig
    {
        let config = ResolverConfig::new(elf).with_watch(watch);
        if self.no_cache {
            config.with_cache_dir(None)
        } else if let Some(dir) = &self.cache_dir {
            config.with_cache_dir(Some(dir.clone()))
        } else {
            config
        }
    }
}

fn main()
{
    // Reads RUST_LOG, TRACELOG_LOG_FORMAT and TRACELOG_LOG_FILE
    let _guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Decode {
            elf,
            inputs,
            protocol,
            clock_hz,
            prescaler,
            radio_hz,
            cache,
            watch,
        } => {
            let protocol = match protocol {
                WireProtocol::Itm => Protocol::Itm(ClockConfig {
                    clock_hz,
                    prescaler,
                    radio_tick_hz: radio_hz,
                }),
                WireProtocol::Uart => Protocol::Uart,
            };
            let config = cache.resolver_config(elf, watch);
            tokio::runtime::Runtime::new()
                .map_err(Into::into)
                .and_then(|rt| rt.block_on(decode(config, inputs, protocol)))
        }
        Commands::Symbols { elf, cache } => print_symbols(cache.resolver_config(elf, false)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn decode(config: ResolverConfig, inputs: Vec<PathBuf>, protocol: Protocol) -> Result<(), Box<dyn std::error::Error>>
{
    let resolver = Arc::new(SymbolResolver::new(config)?);

    let mut registry = Registry::new();
    registry.add_sink(Arc::new(WriterSink::new(io::stdout())));

    let mut handle = Dispatcher::new(registry, resolver).start();
    let mut started = 0;
    for input in &inputs {
        let source = FileSource::open(input)?;
        // a bad worker does not take the others down
        match handle.add_worker(Box::new(source), &protocol) {
            Ok(()) => started += 1,
            Err(err) => error!(input = %input.display(), %err, "cannot decode capture"),
        }
    }
    if started == 0 {
        handle.shutdown().await;
        return Err("no capture could be decoded".into());
    }

    let stop = handle.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping workers");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let summary = handle.join().await;
    for worker in &summary.workers {
        info!(
            transport = %worker.transport,
            bytes = worker.bytes,
            records = worker.records,
            "capture decoded"
        );
    }
    if summary.dropped > 0 {
        warn!(dropped = summary.dropped, "some records could not be rendered");
    }
    info!(delivered = summary.delivered, "decode finished");
    Ok(())
}

fn print_symbols(config: ResolverConfig) -> Result<(), Box<dyn std::error::Error>>
{
    let resolver = SymbolResolver::new(config)?;
    let table = resolver.table();

    let formats = resolver.timestamp_formats();
    if let Some(format) = formats.native32 {
        println!("timestamp32  {format:?}");
    }
    if let Some(format) = formats.native64 {
        println!("timestamp64  {format:?}");
    }

    for (address, entry) in table.sorted() {
        println!(
            "0x{address:08x}  {:<9} {:<15} {:<24} {}:{} nargs={} {:?}",
            entry.level,
            entry.opcode,
            entry.module,
            entry.file,
            entry.line,
            entry.nargs,
            entry.format
        );
    }
    info!(entries = table.len(), scans = resolver.rebuild_count(), "symbol table listed");
    Ok(())
}
