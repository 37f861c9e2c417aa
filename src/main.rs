use std::io;
use std::path::PathBuf;

use abx_client::capture::{self, CaptureHeader};
use abx_client::session::{DEFAULT_READ_CHUNK, LineSink, Session, SessionConfig};
use abx_client::transport;
use anyhow::{Context, Result, ensure};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Stream the ABX order feed and fill sequence gaps")]
struct Args {
    /// Exchange server host
    #[arg(long, env = "ABX_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Exchange server port
    #[arg(long, env = "ABX_PORT", default_value_t = 3000)]
    port: u16,

    /// Bytes per read while streaming
    #[arg(long, env = "ABX_READ_CHUNK", default_value_t = DEFAULT_READ_CHUNK)]
    read_chunk: usize,

    /// Capture file for the reconciled records (.bin)
    #[arg(long, env = "ABX_OUT_FILE")]
    out: Option<PathBuf>,

    /// Write a capture to captures/abx_YYYY_MM_DD_HHMMSS.bin when --out is not given
    #[arg(long, default_value_t = false)]
    capture: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    init_tracing();
    let args = Args::parse();
    ensure!(args.read_chunk > 0, "--read-chunk must be at least 1");

    ctrlc::set_handler(|| {
        warn!("interrupted");
        std::process::exit(130);
    })
    .ok();

    let stream = transport::connect(&args.host, args.port)
        .with_context(|| format!("connect to {}:{}", args.host, args.port))?;
    info!(host = %args.host, port = args.port, "client connected");

    let mut sink = LineSink::new(io::stdout().lock());
    let session = Session::new(stream, SessionConfig { read_chunk: args.read_chunk });
    let summary = session.run(&mut sink).context("session aborted")?;

    info!(
        records = summary.records.len(),
        max_sequence = summary.max_sequence,
        trailing_bytes = summary.trailing_bytes,
        missing = ?summary.missing(),
        unrequestable = ?summary.unrequestable(),
        output_failed = sink.error().is_some(),
        "client disconnected"
    );

    let out_path = args.out.clone().or_else(|| args.capture.then(capture::default_path));
    if let Some(path) = out_path {
        let header = CaptureHeader::new(&args.host, args.port, &summary);
        capture::write_capture(&path, header, &summary)
            .with_context(|| format!("write capture {}", path.display()))?;
        info!(path = %path.display(), "capture saved");
    }
    Ok(())
}
