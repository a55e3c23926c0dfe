//! CLI for querying and tailing a datastream server.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use datastream::{ClientConfig, FileEntry, HandlerError, HeaderEntry, Relay, StreamClient};
use tokio::sync::mpsc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "datastream", version, about = "Client for a datastream entry-log server")]
struct Cli {
    /// Server address (host:port). Overrides the config file.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Stream type sent with every command. Overrides the config file.
    #[arg(long, global = true)]
    stream_type: Option<u64>,

    /// JSON client config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the stream header.
    Header {
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Fetch a single entry by number.
    Entry {
        /// Entry number.
        number: u64,
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Fetch the entry a bookmark points to.
    Bookmark {
        /// Bookmark bytes, hex encoded.
        bookmark: String,
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Stream entries as they arrive.
    Stream(StreamArgs),

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Arguments for `datastream stream`.
#[derive(Args)]
struct StreamArgs {
    /// First entry to stream.
    #[arg(long, default_value_t = 0, conflicts_with = "bookmark")]
    from: u64,

    /// Start at the entry this hex-encoded bookmark points to.
    #[arg(long)]
    bookmark: Option<String>,

    /// Stop after this many entries.
    #[arg(long)]
    count: Option<u64>,

    /// Output format.
    #[arg(long, default_value = "table")]
    format: OutputFormat,
}

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("datastream: {e}");
    }

    if let Err(e) = cli.dispatch().await {
        eprintln!("datastream: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "datastream", &mut std::io::stdout());
            return Ok(());
        }

        let client = self.connect().await?;
        let res = match self.command {
            Command::Header { format } => header(&client, format).await,
            Command::Entry { number, format } => {
                let e = client.entry(number).await?;
                print_entry(&e, format)
            }
            Command::Bookmark { bookmark, format } => {
                let e = client.bookmark(&decode_bookmark(&bookmark)?).await?;
                print_entry(&e, format)
            }
            Command::Stream(args) => stream(&client, args).await,
            Command::Completion { .. } => Ok(()),
        };
        client.shutdown();
        res
    }

    /// Builds the client config from the file and flags, then connects.
    async fn connect(&self) -> Result<StreamClient> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(server) = &self.server {
            config.server.clone_from(server);
        }
        if let Some(st) = self.stream_type {
            config.stream_type = st;
        }

        let client = StreamClient::with_config(config)?;
        client
            .start()
            .await
            .with_context(|| format!("connecting to {}", client.server()))?;
        Ok(client)
    }
}

async fn header(client: &StreamClient, format: OutputFormat) -> Result<()> {
    let h: HeaderEntry = client.header().await?;
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&h)?);
        return Ok(());
    }
    println!("version:       {}", h.version);
    println!("system id:     {}", h.system_id);
    println!("stream type:   {}", h.stream_type.0);
    println!("total length:  {}", h.total_length);
    println!("total entries: {}", h.total_entries);
    Ok(())
}

async fn stream(client: &StreamClient, args: StreamArgs) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.set_handler(
        move |e: &FileEntry, _: &StreamClient, _: Option<&dyn Relay>| -> Result<(), HandlerError> {
            tx.send(e.clone())?;
            Ok(())
        },
    );

    match &args.bookmark {
        Some(b) => client.start_stream_at_bookmark(&decode_bookmark(b)?).await?,
        None => client.start_stream(args.from).await?,
    }
    info!(server = client.server(), "streaming started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut seen = 0u64;
    loop {
        tokio::select! {
            e = rx.recv() => {
                let Some(e) = e else { break };
                print_entry(&e, args.format)?;
                seen += 1;
                if args.count.is_some_and(|c| seen >= c) {
                    break;
                }
            }
            res = &mut ctrl_c => {
                res?;
                break;
            }
        }
    }

    client.stop_stream().await?;
    info!(entries = seen, next = client.next_entry(), "streaming stopped");
    Ok(())
}

fn decode_bookmark(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).with_context(|| format!("invalid hex bookmark {s:?}"))
}

fn print_entry(e: &FileEntry, format: OutputFormat) -> Result<()> {
    let data = hex::encode(&e.data);
    if matches!(format, OutputFormat::Json) {
        let obj = serde_json::json!({
            "number": e.number,
            "length": e.length,
            "type": e.entry_type.0,
            "data": data,
        });
        println!("{}", serde_json::to_string(&obj)?);
        return Ok(());
    }
    println!("{:<12} {:<6} {:>8}  {data}", e.number, e.entry_type.0, e.data.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_stream_arguments() {
        let cli = Cli::parse_from([
            "datastream",
            "--server",
            "10.0.0.1:6900",
            "stream",
            "--from",
            "42",
            "--count",
            "3",
        ]);
        assert_eq!(cli.server.as_deref(), Some("10.0.0.1:6900"));
        let Command::Stream(args) = cli.command else {
            panic!("expected stream command");
        };
        assert_eq!(args.from, 42);
        assert_eq!(args.count, Some(3));
        assert!(args.bookmark.is_none());
    }

    #[test]
    fn from_and_bookmark_conflict() {
        let res = Cli::try_parse_from(["datastream", "stream", "--from", "1", "--bookmark", "ab"]);
        assert!(res.is_err());
    }

    #[test]
    fn bookmark_must_be_hex() {
        assert_eq!(decode_bookmark("0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert!(decode_bookmark("xyz").is_err());
    }
}
