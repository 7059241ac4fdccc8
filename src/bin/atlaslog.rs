//! AtlasLog Diagnostic Tool
//!
//! Prints, summarizes, and checks a log directory without changing it.

use std::sync::Arc;

use atlaslog::reader::LogSummary;
use atlaslog::{Config, FileManager, FileReader, LogEntry, LogEntryType, LogError, Lsn, TraceRecord};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasLog inspector
#[derive(Parser, Debug)]
#[command(name = "atlaslog")]
#[command(about = "Inspect AtlasLog write-ahead log files")]
#[command(version)]
struct Args {
    /// Log directory
    #[arg(short, long, default_value = "./atlaslog_data")]
    dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print log entries
    Print {
        /// First LSN, as file/offset (e.g. 0x1/0x23)
        #[arg(short, long)]
        start: Option<String>,

        /// Last LSN to print, as file/offset
        #[arg(short, long)]
        finish: Option<String>,

        /// Walk the log from its end toward its start
        #[arg(short, long)]
        backward: bool,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Include file header entries
        #[arg(long)]
        headers: bool,
    },

    /// Summarize entries by type
    Stats,

    /// Check every entry and report where valid data ends
    Verify,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlaslog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("AtlasLog v{}", atlaslog::VERSION);

    let config = Config::builder().log_dir(&args.dir).build();
    if let Err(e) = run(&config, args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: &Config, command: Commands) -> atlaslog::Result<()> {
    let fm = Arc::new(FileManager::open(config)?);
    match command {
        Commands::Print {
            start,
            finish,
            backward,
            limit,
            headers,
        } => {
            let start = parse_lsn(start.as_deref())?;
            let finish = parse_lsn(finish.as_deref())?;
            let mut reader = if backward {
                let start = if start.is_null() {
                    FileReader::find_last_entry(&fm, config)?
                } else {
                    start
                };
                if start.is_null() {
                    println!("log is empty");
                    return Ok(());
                }
                FileReader::backward(Arc::clone(&fm), config, start, finish)?
            } else {
                FileReader::forward(Arc::clone(&fm), config, start, finish)?
            }
            .include_file_headers(headers);

            let mut printed = 0;
            while limit.map_or(true, |limit| printed < limit) {
                match reader.next_entry()? {
                    Some(entry) => {
                        println!("{}", describe(&entry));
                        printed += 1;
                    }
                    None => break,
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let mut reader = FileReader::forward(Arc::clone(&fm), config, Lsn::NULL, Lsn::NULL)?;
            let summary = LogSummary::collect(&mut reader)?;
            println!("{}", summary);
            let stats = reader.stats();
            println!(
                "read {} entries in {} reads ({} repeated)",
                stats.n_read, stats.n_read_operations, stats.n_repeat_iterator_reads
            );
            Ok(())
        }
        Commands::Verify => {
            let mut reader = FileReader::forward(Arc::clone(&fm), config, Lsn::NULL, Lsn::NULL)?
                .include_file_headers(true);
            let mut count = 0u64;
            loop {
                match reader.next_entry() {
                    Ok(Some(_)) => count += 1,
                    Ok(None) => {
                        println!("ok: {} entries, last {}", count, reader.last_lsn());
                        return Ok(());
                    }
                    Err(LogError::TornWrite { lsn }) => {
                        println!(
                            "ok: {} entries, last {}; torn tail at {} would be truncated on open",
                            count,
                            reader.last_lsn(),
                            lsn
                        );
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

fn parse_lsn(value: Option<&str>) -> atlaslog::Result<Lsn> {
    match value {
        None => Ok(Lsn::NULL),
        Some(s) => {
            Lsn::parse(s).ok_or_else(|| LogError::Config(format!("cannot parse LSN '{}'", s)))
        }
    }
}

fn describe(entry: &LogEntry) -> String {
    let mut line = format!(
        "{} {} size={}",
        entry.lsn(),
        entry.entry_type().name(),
        entry.entry_size()
    );
    if entry.is_provisional() {
        line.push_str(" provisional");
    }
    if let Some(txn_id) = entry.txn_id() {
        line.push_str(&format!(" txn={}", txn_id));
    }
    match entry.entry_type() {
        LogEntryType::Trace => {
            if let Ok(trace) = entry.read_item::<TraceRecord>() {
                line.push_str(&format!(" time={} \"{}\"", trace.time(), trace.message()));
            }
        }
        LogEntryType::TxnCommit | LogEntryType::TxnAbort => {
            if let Ok(end) = entry.read_txn_end() {
                line.push_str(&format!(" last_lsn={}", end.last_lsn()));
            }
        }
        LogEntryType::FileHeader => {
            if let Ok(header) = entry.read_item::<atlaslog::FileHeader>() {
                line.push_str(&format!(
                    " file={:08x} version={} prev_file_last={:#x}",
                    header.file_number(),
                    header.log_version(),
                    header.last_entry_in_prev_file_offset()
                ));
            }
        }
        _ => {}
    }
    line
}
