//! Capture files for reconciled sessions.
//!
//! A capture is a sequence of frames `[len: u32 LE][crc32: u32 LE][payload]`
//! where the payload is a bincode-encoded [`CaptureFrame`]. The first frame is
//! always a [`CaptureHeader`]; one [`CaptureFrame::Record`] per record follows,
//! ascending by sequence. Only sessions that reached `Done` are captured.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crc32fast::Hasher as Crc32;
use crossbeam_channel::{Receiver, bounded};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::codec::Record;
use crate::session::Summary;
use crate::tracker::GapSpan;

pub const CAPTURE_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub version: u16,
    pub created_unix_ns: i128,
    pub host: String,
    pub port: u16,
    pub max_sequence: i32,
    /// Requestable sequences still missing when the session finished.
    pub missing: Vec<i32>,
    /// Missing sequences above the resend limit.
    pub unrequestable: Option<GapSpan>,
}

impl CaptureHeader {
    pub fn new(host: &str, port: u16, summary: &Summary) -> Self {
        Self {
            version: CAPTURE_VERSION,
            created_unix_ns: OffsetDateTime::now_utc().unix_timestamp_nanos(),
            host: host.to_string(),
            port,
            max_sequence: summary.max_sequence,
            missing: summary.missing(),
            unrequestable: summary.unrequestable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaptureFrame {
    Header(CaptureHeader),
    Record(Record),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O")]
    Io(#[from] io::Error),
    #[error("bincode")]
    Codec(#[from] bincode::Error),
    #[error("CRC mismatch at frame {frame}: file={stored:#x}, calc={computed:#x}")]
    Crc { frame: usize, stored: u32, computed: u32 },
    #[error("capture does not start with a header")]
    MissingHeader,
    #[error("unexpected header at frame {0}")]
    DuplicateHeader(usize),
    #[error("capture writer thread panicked")]
    WriterPanicked,
}

pub fn write_frame<W: Write>(w: &mut W, frame: &CaptureFrame) -> Result<(), CaptureError> {
    let payload = bincode::serialize(frame)?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let len = payload.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read the next frame; `Ok(None)` at a clean end of file. `index` is only
/// used to label CRC errors.
pub fn read_frame<R: Read>(r: &mut R, index: usize) -> Result<Option<CaptureFrame>, CaptureError> {
    let len = match read_u32(r) {
        Ok(v) => v as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let stored = read_u32(r)?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let computed = hasher.finalize();
    if computed != stored {
        return Err(CaptureError::Crc { frame: index, stored, computed });
    }
    Ok(Some(bincode::deserialize(&payload)?))
}

fn writer_thread(out: PathBuf, rx: Receiver<CaptureFrame>) -> Result<(), CaptureError> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&out)?;
    let mut w = BufWriter::with_capacity(64 * 1024, file);
    let mut frames = 0usize;
    for frame in rx {
        write_frame(&mut w, &frame)?;
        frames += 1;
    }
    w.flush()?;
    debug!(path = %out.display(), frames, "capture written");
    Ok(())
}

/// Write a header plus every record of `summary` to `out`, on a writer thread.
pub fn write_capture(out: &Path, header: CaptureHeader, summary: &Summary) -> Result<(), CaptureError> {
    let (tx, rx) = bounded::<CaptureFrame>(1024);
    let path = out.to_path_buf();
    let writer = thread::spawn(move || writer_thread(path, rx));

    let frames = std::iter::once(CaptureFrame::Header(header))
        .chain(summary.records.iter().cloned().map(CaptureFrame::Record));
    for frame in frames {
        // A closed channel means the writer failed; its error comes back from join.
        if tx.send(frame).is_err() {
            break;
        }
    }
    drop(tx);
    writer.join().map_err(|_| CaptureError::WriterPanicked)?
}

/// Read a whole capture, validating framing and CRCs.
pub fn read_capture(path: &Path) -> Result<(CaptureHeader, Vec<Record>), CaptureError> {
    let mut r = BufReader::new(File::open(path)?);
    let header = match read_frame(&mut r, 0)? {
        Some(CaptureFrame::Header(h)) => h,
        _ => return Err(CaptureError::MissingHeader),
    };
    let mut records = Vec::new();
    let mut index = 1;
    while let Some(frame) = read_frame(&mut r, index)? {
        match frame {
            CaptureFrame::Record(rec) => records.push(rec),
            CaptureFrame::Header(_) => return Err(CaptureError::DuplicateHeader(index)),
        }
        index += 1;
    }
    Ok((header, records))
}

/// `captures/abx_YYYY_MM_DD_HHMMSS.bin`, local time when available.
pub fn default_path() -> PathBuf {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let fname = format!(
        "abx_{}_{:02}_{:02}_{:02}{:02}{:02}.bin",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    );
    let mut p = PathBuf::from("captures");
    p.push(fname);
    p
}
