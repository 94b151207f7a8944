//! Inbound clip framing.
//!
//! A clip starts with nine raw bytes `00 01 .. 08`. Everything after that is
//! hex-encoded on arrival and scanned for the hex text of `08 07 .. 00`. The
//! controller's keep-alive `F0 F1 .. F8` may land inside a frame and is
//! stripped from the payload text before decoding.

use crate::error::{LinkError, Result};
use crate::hex_codec;

/// Length of the start-marker probe read from the socket.
pub const PROBE_LEN: usize = 9;

pub const START_MARKER: [u8; PROBE_LEN] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

/// End of frame, matched as hex text rather than raw bytes.
pub const END_MARKER_HEX: &str = "080706050403020100";

/// Keep-alive bytes `F0..F8` as hex text.
pub const HEARTBEAT_HEX: &str = "F0F1F2F3F4F5F6F7F8";

pub fn is_start_marker(window: &[u8]) -> bool {
    window == START_MARKER
}

/// One completed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Payload hex text with keep-alives removed.
    pub payload_hex: String,
    /// Raw bytes that followed the end marker in the same read.
    pub trailing: Vec<u8>,
}

/// Result of feeding a chunk to an open frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// No end marker yet.
    Pending,
    Complete(Extraction),
    /// The end marker of a dropped frame arrived. Holds the raw bytes that
    /// followed it.
    Resynced(Vec<u8>),
}

/// Accumulates hex text between a start marker and the next end marker.
pub struct FrameDetector {
    buffer: String,
    // even offset where the next end-marker search begins
    cursor: usize,
    in_frame: bool,
    // frame outgrew the limit; only look for its end marker
    discarding: bool,
    max_hex_len: usize,
}

impl FrameDetector {
    /// `max_payload_bytes` bounds how much is buffered before a frame without
    /// an end marker is dropped.
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            in_frame: false,
            discarding: false,
            max_hex_len: max_payload_bytes
                .saturating_mul(2)
                .saturating_add(END_MARKER_HEX.len()),
        }
    }

    /// Check a probe window; a start marker opens a new frame.
    pub fn probe(&mut self, window: &[u8]) -> bool {
        if is_start_marker(window) {
            self.begin();
            true
        } else {
            false
        }
    }

    pub fn begin(&mut self) {
        self.reset();
        self.in_frame = true;
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.in_frame = false;
        self.discarding = false;
    }

    /// True from the start marker until the end marker, including while an
    /// oversized frame is being skipped.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Hex characters buffered for the open frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a raw chunk to the open frame.
    ///
    /// Completes once the end marker shows up after at least one payload
    /// byte. Outgrowing the size limit yields [`LinkError::MalformedHexInput`]
    /// once; the payload is dropped and the rest of the frame is skipped up to
    /// its end marker, which is reported as [`Feed::Resynced`]. Chunks fed
    /// outside a frame are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Feed> {
        if !self.in_frame {
            return Ok(Feed::Pending);
        }
        hex_codec::encode_into(chunk, &mut self.buffer);

        if self.discarding {
            return self.skip_to_end();
        }

        // an end marker at offset 0 does not count, a frame needs payload first
        let from = self.cursor.max(2);
        if let Some(idx) = find_aligned(&self.buffer, END_MARKER_HEX, from) {
            let payload_hex = strip_aligned(&self.buffer[..idx], HEARTBEAT_HEX);
            let trailing = hex_codec::decode(&self.buffer[idx + END_MARKER_HEX.len()..])?;
            self.reset();
            return Ok(Feed::Complete(Extraction {
                payload_hex,
                trailing,
            }));
        }

        if self.buffer.len() > self.max_hex_len {
            let buffered = self.buffer.len();
            self.discarding = true;
            self.keep_marker_tail();
            return Err(LinkError::MalformedHexInput {
                index: buffered,
                reason: format!(
                    "no end marker within {} hex characters, frame dropped",
                    self.max_hex_len
                ),
            });
        }

        // the marker may straddle this chunk and the next one
        self.cursor = self.buffer.len().saturating_sub(END_MARKER_HEX.len() - 2);
        Ok(Feed::Pending)
    }

    fn skip_to_end(&mut self) -> Result<Feed> {
        if let Some(idx) = find_aligned(&self.buffer, END_MARKER_HEX, 0) {
            let trailing = hex_codec::decode(&self.buffer[idx + END_MARKER_HEX.len()..])?;
            self.reset();
            return Ok(Feed::Resynced(trailing));
        }
        self.keep_marker_tail();
        Ok(Feed::Pending)
    }

    // Only the last bytes that could start a split end marker are kept.
    fn keep_marker_tail(&mut self) {
        let keep = END_MARKER_HEX.len() - 2;
        let cut = self.buffer.len().saturating_sub(keep);
        self.buffer.drain(..cut);
        self.cursor = 0;
    }
}

/// First byte-aligned (even) offset `>= from` where `needle` starts.
fn find_aligned(hay: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = hay.as_bytes();
    let needle = needle.as_bytes();
    if hay.len() < needle.len() {
        return None;
    }
    let start = from + from % 2;
    (start..=hay.len() - needle.len())
        .step_by(2)
        .find(|&i| &hay[i..i + needle.len()] == needle)
}

/// Remove every byte-aligned occurrence of `marker`.
fn strip_aligned(text: &str, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i..].starts_with(marker) {
            i += marker.len();
        } else {
            let end = (i + 2).min(text.len());
            out.push_str(&text[i..end]);
            i = end;
        }
    }
    out
}
