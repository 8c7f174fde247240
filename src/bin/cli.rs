//! AtlasWAL CLI Client
//!
//! Command-line interface for reading and appending to a served log.

use std::process;
use std::time::Duration;

use atlaswal::{Config, LogEntry, Lsn, RemoteLog, Wal};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasWAL CLI
#[derive(Parser, Debug)]
#[command(name = "atlaswal-cli")]
#[command(about = "CLI for the AtlasWAL log server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Append a text entry
    Append {
        /// The text to append
        text: String,
    },

    /// Get the entry at an LSN ("segment/offset" or raw number)
    Get {
        lsn: Lsn,
    },

    /// Show the first entry
    First,

    /// Show the last entry
    Last,

    /// Print entries from an LSN (or the start), following new appends
    Tail {
        /// Start LSN
        #[arg(short, long)]
        from: Option<Lsn>,

        /// Blocking wait per read in milliseconds
        #[arg(short, long, default_value = "1000")]
        wait: u64,

        /// Stop after the log is read to its end instead of following it
        #[arg(long)]
        no_follow: bool,
    },

    /// Ping the server
    Ping,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> atlaswal::Result<()> {
    let log = RemoteLog::connect(&args.server, &Config::default())?;

    match args.command {
        Commands::Append { text } => print_entry(&log.append_str(&text)?),
        Commands::Get { lsn } => print_optional(log.get(lsn)?),
        Commands::First => print_optional(log.first()?),
        Commands::Last => print_optional(log.last()?),
        Commands::Tail { from, wait, no_follow } => {
            let timeout = if no_follow {
                None
            } else {
                Some(Duration::from_millis(wait))
            };
            let mut it = log.iterator(from, timeout)?;
            loop {
                match it.has_next() {
                    Ok(true) => print_entry(&it.next()?),
                    Ok(false) => break,
                    Err(e) if e.is_timeout() => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        Commands::Ping => {
            log.ping()?;
            println!("PONG");
        }
    }

    log.close();
    Ok(())
}

fn print_entry(entry: &LogEntry) {
    match entry.as_str() {
        Some(text) => println!("{}\t{}", entry.lsn, text),
        None => println!("{}\t<{} bytes>", entry.lsn, entry.len()),
    }
}

fn print_optional(entry: Option<LogEntry>) {
    match entry {
        Some(entry) => print_entry(&entry),
        None => println!("(none)"),
    }
}
