//! Delimiter framing for every TCP link in the system.
//!
//! The wire format is a bare byte stream of text messages, each terminated by
//! a single reserved delimiter byte:
//!
//! ```text
//! AAPL,172.53*MSFT,325.2*NEWS,42*AAPL,172.61*...
//! └─ TAG ─┘└ VALUE ┘└ DELIMITER
//! ```
//!
//! There is no length prefix, checksum or version field. [`FrameBuffer`]
//! accumulates raw reads and hands back complete frames; [`decode`] and
//! [`encode`] convert between frames and [`Tick`]s. The order channel reuses
//! [`FrameBuffer`] with JSON payloads.

use crate::types::{MAX_SENTIMENT, Symbol, Tick};

/// Reserved frame terminator. Never valid inside a payload.
pub const DELIMITER: u8 = b'*';

/// Tag that marks a news sentiment frame.
pub const NEWS_TAG: &str = "NEWS";

/// Longest undelimited tail a [`FrameBuffer`] keeps before discarding it.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Per-connection receive buffer holding bytes not yet delimited.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the socket.
    ///
    /// If the bytes after the last delimiter grow past [`MAX_FRAME_LEN`], that
    /// tail is discarded and its length returned; complete frames are kept.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        self.buf.extend_from_slice(bytes);
        let complete = self.buf.iter().rposition(|&b| b == DELIMITER).map_or(0, |i| i + 1);
        let partial = self.buf.len() - complete;
        if partial <= MAX_FRAME_LEN {
            return 0;
        }
        self.buf.truncate(complete);
        partial
    }

    /// Remove and return every complete frame, without delimiters.
    ///
    /// Empty frames (two consecutive delimiters) are skipped. Bytes after the
    /// last delimiter stay buffered for the next [`feed`](Self::feed).
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let Some(last) = self.buf.iter().rposition(|&b| b == DELIMITER) else {
            return Vec::new();
        };
        let rest = self.buf.split_off(last + 1);
        let complete = std::mem::replace(&mut self.buf, rest);
        complete[..last]
            .split(|&b| b == DELIMITER)
            .filter(|frame| !frame.is_empty())
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// Drain complete frames and decode them, dropping malformed ones.
    pub fn drain_ticks(&mut self) -> Vec<Tick> {
        self.drain().iter().filter_map(|frame| decode(frame)).collect()
    }

    /// Discard everything, including a partial trailing frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered bytes awaiting a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Decode one frame payload (`TAG,VALUE`, no delimiter) into a [`Tick`].
///
/// Returns `None` for anything malformed: invalid UTF-8, no comma, an
/// invalid symbol, an unparsable or negative price, or a sentiment outside
/// `0..=100`.
pub fn decode(frame: &[u8]) -> Option<Tick> {
    let text = std::str::from_utf8(frame).ok()?;
    let (tag, value) = text.split_once(',')?;
    let tag = tag.trim();
    let value = value.trim();

    if tag.eq_ignore_ascii_case(NEWS_TAG) {
        let sentiment: i64 = value.parse().ok()?;
        if !(0..=MAX_SENTIMENT as i64).contains(&sentiment) {
            return None;
        }
        return Some(Tick::news(sentiment as u8));
    }

    let symbol = Symbol::new(tag).ok()?;
    let price: f64 = fast_float2::parse(value).ok()?;
    if !price.is_finite() || price < 0.0 {
        return None;
    }
    Some(Tick::price(symbol, price))
}

/// Encode a [`Tick`] as a complete frame, delimiter included.
pub fn encode(tick: &Tick) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    encode_into(tick, &mut out);
    out
}

/// Append the encoded frame for `tick` to `out`.
///
/// Prices use the shortest representation that parses back to the same
/// `f64`, so `decode(encode(t)) == t`.
pub fn encode_into(tick: &Tick, out: &mut Vec<u8>) {
    use std::io::Write;
    // Writing into a Vec cannot fail.
    let _ = match tick {
        Tick::Price { symbol, price } => write!(out, "{symbol},{price}"),
        Tick::News { sentiment } => write!(out, "{NEWS_TAG},{sentiment}"),
    };
    out.push(DELIMITER);
}

/// Frame an arbitrary payload (used by the order channel).
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(DELIMITER);
    out
}
