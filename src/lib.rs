//! Client for the ABX exchange's fixed-length binary feed.
//!
//! The client asks the server to stream every record it holds, works out
//! which sequence numbers never arrived, and requests each of those again
//! one at a time. Modules:
//!
//! - `codec`: request encoding and 17-byte frame decoding
//! - `tracker`: observed sequences and gap computation
//! - `session`: the stream/reconcile state machine over a `Transport`
//! - `transport`: the byte-channel seam and its TCP implementation
//! - `capture`: framed, CRC-checked capture files of a finished session
//!
//! The `abx_client` binary runs a session against a live server; the
//! `replay` binary reads a capture back.
pub mod capture;
pub mod codec;
pub mod session;
pub mod tracker;
pub mod transport;

pub use codec::{FRAME_LEN, Record, Request};
pub use session::{GapFailure, Session, SessionConfig, SessionError, Summary};
pub use tracker::SequenceTracker;
