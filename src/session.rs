//! Client session: bulk stream, gap analysis, then per-gap resends.
//!
//! A session walks `Idle -> Streaming -> GapAnalysis -> Reconciling -> Done`,
//! or drops to `Aborted` on any transport error. Failures while resending a
//! single gap are local to that gap and never abort the session; they are
//! collected into the [`Summary`]. The transport is closed on every exit.
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::codec::{self, FRAME_LEN, MAX_RESEND_SEQUENCE, Record, Request};
use crate::tracker::{GapSpan, SequenceTracker};
use crate::transport::{Transport, read_retrying};

/// Default stream-phase read size.
pub const DEFAULT_READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stream,
    Reconcile,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Stream => "stream",
            Phase::Reconcile => "reconcile",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    GapAnalysis,
    Reconciling { index: usize, sequence: i32 },
    Done,
    Aborted,
}

/// Transport failure that ends the whole session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to send {phase} request")]
    Send {
        phase: Phase,
        #[source]
        source: io::Error,
    },
    #[error("failed to read during {phase} phase")]
    Receive {
        phase: Phase,
        #[source]
        source: io::Error,
    },
}

/// Why a single gap could not be filled. The gap stays missing; no retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GapFailure {
    #[error(
        "sequences {first}..={last} ({count} missing) cannot be requested: resend field holds 1..={max}",
        max = MAX_RESEND_SEQUENCE
    )]
    OutOfRange { first: i32, last: i32, count: u64 },
    #[error("server closed the connection after {received} of {len} bytes while resending {sequence}", len = FRAME_LEN)]
    PrematureClose { sequence: i32, received: usize },
    #[error("unexpected sequence number: expected {expected}, received {received}")]
    Mismatch { expected: i32, received: i32 },
}

impl GapFailure {
    /// The gap this failure belongs to; the lowest one for a span.
    pub fn sequence(&self) -> i32 {
        match *self {
            GapFailure::OutOfRange { first, .. } => first,
            GapFailure::PrematureClose { sequence, .. } => sequence,
            GapFailure::Mismatch { expected, .. } => expected,
        }
    }
}

/// Receives every record as it is accepted, including duplicates.
pub trait RecordSink {
    fn accept(&mut self, record: &Record);
}

impl<F: FnMut(&Record)> RecordSink for F {
    fn accept(&mut self, record: &Record) {
        self(record)
    }
}

/// Writes one line per record. After the first write error (a closed pipe,
/// say) it logs once and drops every later record.
pub struct LineSink<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    /// The write error that stopped output, if any.
    pub fn error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }
}

impl<W: Write> RecordSink for LineSink<W> {
    fn accept(&mut self, record: &Record) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.out, "{record}") {
            warn!(error = %e, sequence = record.sequence, "record output failed; no longer printing records");
            self.error = Some(e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bytes requested per read during the stream phase.
    pub read_chunk: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { read_chunk: DEFAULT_READ_CHUNK }
    }
}

/// Outcome of a session that reached `Done`.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// One record per sequence (first delivery wins), ascending.
    pub records: Vec<Record>,
    /// Records delivered by the server, duplicates included.
    pub delivered: usize,
    pub max_sequence: i32,
    /// Gaps filled by a resend.
    pub resolved: Vec<i32>,
    /// Gaps left open, with the reason.
    pub unresolved: Vec<GapFailure>,
    /// Bytes of an incomplete frame dropped at the end of the stream phase.
    pub trailing_bytes: usize,
}

impl Summary {
    /// Unresolved gaps that were individually requestable.
    pub fn missing(&self) -> Vec<i32> {
        self.unresolved
            .iter()
            .filter(|f| !matches!(f, GapFailure::OutOfRange { .. }))
            .map(GapFailure::sequence)
            .collect()
    }

    /// Missing sequences above the resend limit, as one span.
    pub fn unrequestable(&self) -> Option<GapSpan> {
        self.unresolved.iter().find_map(|f| match *f {
            GapFailure::OutOfRange { first, last, count } => Some(GapSpan { first, last, count }),
            _ => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn sequences(&self) -> Vec<i32> {
        self.records.iter().map(|r| r.sequence).collect()
    }
}

pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    tracker: SequenceTracker,
    records: BTreeMap<i32, Record>,
    delivered: usize,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Idle,
            tracker: SequenceTracker::new(),
            records: BTreeMap::new(),
            delivered: 0,
        }
    }

    /// Drive the session to completion. The transport is closed before
    /// returning, whether the session finished or aborted.
    pub fn run(mut self, sink: &mut dyn RecordSink) -> Result<Summary, SessionError> {
        let outcome = self.drive(sink);
        if let Err(e) = self.transport.close() {
            warn!(error = %e, "failed to close transport");
        }
        match &outcome {
            Ok(summary) => {
                self.transition(SessionState::Done);
                info!(
                    records = summary.records.len(),
                    resolved = summary.resolved.len(),
                    unresolved = summary.unresolved.len(),
                    "session complete"
                );
            }
            Err(e) => {
                self.transition(SessionState::Aborted);
                error!(error = %e, cause = ?std::error::Error::source(e), "session aborted");
            }
        }
        outcome
    }

    fn drive(&mut self, sink: &mut dyn RecordSink) -> Result<Summary, SessionError> {
        let trailing_bytes = self.stream_phase(sink)?;

        self.transition(SessionState::GapAnalysis);
        if self.tracker.is_empty() {
            info!("server streamed no records");
        }
        let (gaps, beyond) = self.tracker.split_gaps(MAX_RESEND_SEQUENCE);
        info!(
            received = self.tracker.len(),
            max_sequence = self.tracker.max_seen(),
            gaps = self.tracker.gap_count(),
            "stream phase finished"
        );

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for (index, &sequence) in gaps.iter().enumerate() {
            self.transition(SessionState::Reconciling { index, sequence });
            match self.reconcile_gap(sequence, sink)? {
                Ok(()) => resolved.push(sequence),
                Err(failure) => {
                    warn!(sequence, "{failure}");
                    unresolved.push(failure);
                }
            }
        }
        if let Some(GapSpan { first, last, count }) = beyond {
            let failure = GapFailure::OutOfRange { first, last, count };
            warn!("{failure}");
            unresolved.push(failure);
        }

        Ok(Summary {
            records: self.records.values().cloned().collect(),
            delivered: self.delivered,
            max_sequence: self.tracker.max_seen(),
            resolved,
            unresolved,
            trailing_bytes,
        })
    }

    /// Request the full stream and consume it until the server closes.
    /// Returns the number of undecodable trailing bytes.
    fn stream_phase(&mut self, sink: &mut dyn RecordSink) -> Result<usize, SessionError> {
        self.transition(SessionState::Streaming);
        self.send(Request::stream_all(), Phase::Stream)?;

        let mut chunk = vec![0u8; self.config.read_chunk.max(1)];
        let mut pending: Vec<u8> = Vec::with_capacity(chunk.len() + FRAME_LEN);
        loop {
            let n = read_retrying(&mut self.transport, &mut chunk)
                .map_err(|source| SessionError::Receive { phase: Phase::Stream, source })?;
            if n == 0 {
                break;
            }
            debug!(bytes = n, "stream read");
            pending.extend_from_slice(&chunk[..n]);
            let (records, consumed) = codec::decode_all(&pending);
            pending.drain(..consumed);
            for record in records {
                self.accept(record, sink);
            }
        }

        if !pending.is_empty() {
            warn!(bytes = pending.len(), "dropping incomplete frame at end of stream");
        }
        Ok(pending.len())
    }

    /// Resend one gap. The outer error aborts the session; the inner one
    /// only abandons this gap.
    fn reconcile_gap(
        &mut self,
        sequence: i32,
        sink: &mut dyn RecordSink,
    ) -> Result<Result<(), GapFailure>, SessionError> {
        let Some(request) = Request::try_resend(sequence) else {
            return Ok(Err(GapFailure::OutOfRange { first: sequence, last: sequence, count: 1 }));
        };
        self.send(request, Phase::Reconcile)?;
        debug!(sequence, "resend requested");

        let mut frame = [0u8; FRAME_LEN];
        let mut received = 0;
        while received < FRAME_LEN {
            let n = read_retrying(&mut self.transport, &mut frame[received..])
                .map_err(|source| SessionError::Receive { phase: Phase::Reconcile, source })?;
            if n == 0 {
                return Ok(Err(GapFailure::PrematureClose { sequence, received }));
            }
            received += n;
        }

        let record = Record::from_frame(&frame);
        if record.sequence != sequence {
            return Ok(Err(GapFailure::Mismatch { expected: sequence, received: record.sequence }));
        }
        self.accept(record, sink);
        Ok(Ok(()))
    }

    fn accept(&mut self, record: Record, sink: &mut dyn RecordSink) {
        self.delivered += 1;
        self.tracker.observe(record.sequence);
        sink.accept(&record);
        self.records.entry(record.sequence).or_insert(record);
    }

    fn send(&mut self, request: Request, phase: Phase) -> Result<(), SessionError> {
        self.transport
            .write_all(&request.encode())
            .and_then(|()| self.transport.flush())
            .map_err(|source| SessionError::Send { phase, source })
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
