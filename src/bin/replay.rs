use anyhow::{Context, Result};
use abx_client::capture::read_capture;
use abx_client::codec::MAX_RESEND_SEQUENCE;
use abx_client::tracker::SequenceTracker;
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;


#[derive(Debug, Parser)]
#[command(about = "Print the records of an ABX capture file")]
struct Args {
    /// Input file path to read (captured .bin)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Recompute gaps from the records and print them
    #[arg(long, default_value_t = false)]
    gaps: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let (header, records) = read_capture(&args.input).with_context(|| format!("read {:?}", args.input))?;
    eprintln!(
        "Header: v{} {}:{} max_seq={} missing={:?} unrequestable={:?} created={}ns",
        header.version,
        header.host,
        header.port,
        header.max_sequence,
        header.missing,
        header.unrequestable,
        header.created_unix_ns
    );

    let mut tracker = SequenceTracker::new();
    for r in &records {
        println!("{r}");
        tracker.observe(r.sequence);
    }

    if args.gaps {
        let (gaps, beyond) = tracker.split_gaps(MAX_RESEND_SEQUENCE);
        if gaps != header.missing || beyond != header.unrequestable {
            warn!(
                header = ?header.missing,
                computed = ?gaps,
                header_span = ?header.unrequestable,
                computed_span = ?beyond,
                "gap list disagrees with capture header"
            );
        }
        println!("gaps: {gaps:?}");
        if let Some(span) = beyond {
            println!("unrequestable: {}..={} ({} missing)", span.first, span.last, span.count);
        }
    }
    eprintln!("Read {} records, highest sequence {}.", records.len(), tracker.max_seen());
    Ok(())
}
