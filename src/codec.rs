//! Wire codec for the ABX exchange protocol.
//!
//! Outbound requests are two bytes: `[call_type][sequence]`. Inbound
//! responses are fixed 17-byte frames laid out as:
//!
//! ```text
//! [symbol: 4 x ASCII][side: u8][quantity: i32 BE][price: i32 BE][sequence: i32 BE]
//! ```
//!
//! The stream carries no message boundaries, so [`decode_all`] consumes as
//! many whole frames as a buffer holds and reports how far it got; the caller
//! keeps the remainder for the next read.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one response frame on the wire.
pub const FRAME_LEN: usize = 17;

/// Size of one request on the wire.
pub const REQUEST_LEN: usize = 2;

/// Highest sequence number a resend request can carry.
pub const MAX_RESEND_SEQUENCE: i32 = u8::MAX as i32;

/// Request kinds understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallType {
    /// Stream every record the server holds, then close the send side.
    StreamAll = 1,
    /// Resend exactly one record.
    Resend = 2,
}

/// Outbound request. The sequence byte is only meaningful for [`CallType::Resend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub call_type: CallType,
    pub sequence: u8,
}

impl Request {
    pub fn stream_all() -> Self {
        Self { call_type: CallType::StreamAll, sequence: 0 }
    }

    fn resend(sequence: u8) -> Self {
        Self { call_type: CallType::Resend, sequence }
    }

    /// Build a resend request, or `None` when `sequence` is outside
    /// `1..=MAX_RESEND_SEQUENCE`.
    pub fn try_resend(sequence: i32) -> Option<Self> {
        if (1..=MAX_RESEND_SEQUENCE).contains(&sequence) {
            Some(Self::resend(sequence as u8))
        } else {
            None
        }
    }

    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        encode_request(self.call_type, Some(self.sequence))
    }
}

/// Encode a request; an absent sequence is sent as 0.
pub fn encode_request(call_type: CallType, sequence: Option<u8>) -> [u8; REQUEST_LEN] {
    [call_type as u8, sequence.unwrap_or(0)]
}

/// One decoded response frame. `sequence` is the record's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Raw symbol bytes, exactly four, no terminator.
    pub symbol: [u8; 4],
    /// Raw buy/sell indicator byte (`b'B'` / `b'S'` from a well-behaved server).
    pub side: u8,
    pub quantity: i32,
    pub price: i32,
    pub sequence: i32,
}

impl Record {
    /// Symbol as text; bytes outside ASCII render as `?`.
    pub fn symbol(&self) -> String {
        self.symbol
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect()
    }

    pub fn side(&self) -> char {
        self.side as char
    }

    /// Decode a single frame. Returns `None` if `bytes` is shorter than
    /// [`FRAME_LEN`]; anything past the first frame is ignored.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let frame: &[u8; FRAME_LEN] = bytes.get(..FRAME_LEN)?.try_into().ok()?;
        Some(Self::from_frame(frame))
    }

    pub fn from_frame(frame: &[u8; FRAME_LEN]) -> Self {
        let mut symbol = [0u8; 4];
        symbol.copy_from_slice(&frame[0..4]);
        Self {
            symbol,
            side: frame[4],
            quantity: read_i32_be(frame, 5),
            price: read_i32_be(frame, 9),
            sequence: read_i32_be(frame, 13),
        }
    }

    /// Encode back to the wire layout. The client never sends frames; this
    /// exists for fake servers and captures.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[0..4].copy_from_slice(&self.symbol);
        out[4] = self.side;
        out[5..9].copy_from_slice(&self.quantity.to_be_bytes());
        out[9..13].copy_from_slice(&self.price.to_be_bytes());
        out[13..17].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Symbol: {}, Buy/Sell: {}, Quantity: {}, Price: {}, Sequence: {}",
            self.symbol(),
            self.side(),
            self.quantity,
            self.price,
            self.sequence
        )
    }
}

fn read_i32_be(b: &[u8], off: usize) -> i32 {
    let mut tmp = [0u8; 4];
    tmp.copy_from_slice(&b[off..off + 4]);
    i32::from_be_bytes(tmp)
}

/// Decode every complete frame in `buffer`, in order.
///
/// Returns the records and the number of bytes consumed (always a multiple
/// of [`FRAME_LEN`]). A trailing partial frame is left untouched for the
/// caller to carry over; this never fails.
pub fn decode_all(buffer: &[u8]) -> (Vec<Record>, usize) {
    let chunks = buffer.chunks_exact(FRAME_LEN);
    let consumed = buffer.len() - chunks.remainder().len();
    let records = chunks
        .map(|chunk| {
            let mut frame = [0u8; FRAME_LEN];
            frame.copy_from_slice(chunk);
            Record::from_frame(&frame)
        })
        .collect();
    (records, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(seq: i32) -> Record {
        Record { symbol: *b"MSFT", side: b'B', quantity: 50, price: 100, sequence: seq }
    }

    #[test]
    fn request_layout() {
        assert_eq!(Request::stream_all().encode(), [1, 0]);
        assert_eq!(Request::resend(7).encode(), [2, 7]);
        assert_eq!(encode_request(CallType::StreamAll, None), [1, 0]);
    }

    #[test]
    fn try_resend_rejects_unencodable() {
        assert_eq!(Request::try_resend(255), Some(Request::resend(255)));
        assert_eq!(Request::try_resend(256), None);
        assert_eq!(Request::try_resend(1).map(|r| r.encode()), Some([2, 1]));
        assert_eq!(Request::try_resend(0), None);
        assert_eq!(Request::try_resend(-3), None);
    }

    #[test]
    fn decodes_big_endian_fields() {
        let bytes = [
            b'A', b'A', b'P', b'L', b'S', //
            0x00, 0x00, 0x01, 0x00, // 256
            0xFF, 0xFF, 0xFF, 0xFE, // -2
            0x00, 0x00, 0x00, 0x2A, // 42
        ];
        let r = Record::decode(&bytes).unwrap();
        assert_eq!(r.symbol(), "AAPL");
        assert_eq!(r.side(), 'S');
        assert_eq!(r.quantity, 256);
        assert_eq!(r.price, -2);
        assert_eq!(r.sequence, 42);
        assert_eq!(r.encode(), bytes);
    }

    #[test]
    fn decode_all_leaves_partial_tail() {
        for extra in 0..FRAME_LEN {
            let mut buf = Vec::new();
            for s in 1..=3 {
                buf.extend_from_slice(&rec(s).encode());
            }
            buf.extend(std::iter::repeat_n(0xAB, extra));
            let (records, consumed) = decode_all(&buf);
            assert_eq!(records.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
            assert_eq!(consumed, 3 * FRAME_LEN);
        }
    }

    #[test]
    fn decode_all_empty_and_short() {
        assert_eq!(decode_all(&[]), (Vec::new(), 0));
        assert_eq!(decode_all(&[1, 2, 3]).1, 0);
    }

    #[test]
    fn resend_sequence_matches_frame() {
        for n in 1..=255i32 {
            let req = Request::try_resend(n).unwrap();
            let r = Record::decode(&rec(n).encode()).unwrap();
            assert_eq!(r.sequence, req.encode()[1] as i32);
        }
    }

    #[test]
    fn non_ascii_symbol_is_masked() {
        let r = Record { symbol: [b'X', 0xC3, b'Y', b'Z'], ..rec(1) };
        assert_eq!(r.symbol(), "X?YZ");
    }
}
