//! The top-level session controller. [`BlackboxReader`] parses one session's header
//! eagerly, then hands out [`BlackboxRecord`]s one at a time through `Iterator::next`,
//! a lazy sequence in place of a callback-driven `metadataReady`/frame API.
//! [`MultiSegmentBlackboxReader`] locates every session start in a file that may contain
//! several back-to-back logs (Betaflight appends a new session per arm/disarm cycle) and
//! yields one [`BlackboxReader`] per session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{BlackboxReaderError, HeaderError};
use crate::frame::decoder::{DecodedFrame, FrameDecoder, GarbageReason};
use crate::frame::event::EventFrame;
use crate::stream::cursor::ByteStream;
use crate::stream::header::{parse_headers, Header};

/// Cap on how many back-to-back sessions [`MultiSegmentBlackboxReader`] will locate in a
/// single file, matching the firmware's own bound on logs-per-flight-controller-session.
pub const MAX_LOGS_IN_FILE: usize = 1000;

/// Minimum read-ahead a caller streaming from a live character device (rather than a
/// regular file already fully in memory) should buffer before constructing a reader, so
/// the header section and the first few frames are available without blocking mid-parse.
/// Reading from a character device at all is out of scope for this crate (see
/// [`BlackboxReader::from_bytes`]); this constant exists for callers who implement that
/// themselves.
pub const FRAME_SERIAL_BUFFER_LENGTH: usize = 2048;

/// The fixed ASCII product line every Blackbox-compatible firmware (Baseflight,
/// Cleanflight, Betaflight) emits as the first line of every session, used to find
/// session boundaries in a file that may hold more than one.
const LOG_START_SENTINEL: &[u8] = b"H Product:Blackbox flight data recorder by Nicholas Sherlock";

/// Per-frame-type-letter counters, keyed by the ASCII frame type (`'I'`, `'P'`, `'S'`,
/// `'G'`, `'H'`, `'E'`) in [`Statistics::frame`].
#[derive(Clone, Debug, Default)]
pub struct FrameTypeStats {
    pub bytes: u64,
    pub valid: u32,
    pub desync: u32,
    pub corrupt: u32,
    pub length_histogram: HashMap<usize, u32>,
}

/// Running min/max for one main-frame column, keyed by field index in [`Statistics::field`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldStats {
    pub min: i64,
    pub max: i64,
}

/// Aggregated over the whole session as frames are decoded; available mid-iteration via
/// [`BlackboxReader::statistics`] and still valid if iteration stops early.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub frame: HashMap<char, FrameTypeStats>,
    pub field: HashMap<usize, FieldStats>,
    pub total_corrupt_bytes: u64,
    pub intentionally_absent_iterations: u32,
}

impl Statistics {
    fn record(&mut self, letter: char, byte_len: usize, valid: bool) -> &mut FrameTypeStats {
        let entry = self.frame.entry(letter).or_default();
        entry.bytes += byte_len as u64;
        if valid {
            entry.valid += 1;
        }
        *entry.length_histogram.entry(byte_len).or_insert(0) += 1;
        entry
    }

    fn record_fields(&mut self, columns: &[i64]) {
        for (ix, &value) in columns.iter().enumerate() {
            let entry = self
                .field
                .entry(ix)
                .or_insert(FieldStats { min: value, max: value });
            entry.min = entry.min.min(value);
            entry.max = entry.max.max(value);
        }
    }
}

/// One decoded frame, valid or not. Every byte of the frame stream ends up attributed to
/// exactly one record, so offsets/lengths across consecutive records tile the input with
/// no gaps — the main way a consumer can audit what the decoder actually consumed.
#[derive(Debug, Clone)]
pub enum BlackboxRecord {
    Main {
        valid: bool,
        columns: Vec<i64>,
        frame_type: u8,
        byte_offset: usize,
        byte_len: usize,
    },
    Gnss {
        valid: bool,
        /// Set when this `G` frame decoded against a zero (never-seen) GPS home baseline,
        /// i.e. no `H` frame has been observed yet this session (`DecodeError::ReferenceMissing`,
        /// non-fatal — the frame still commits, it is just unanchored).
        unreferenced: bool,
        columns: Vec<i64>,
        byte_offset: usize,
        byte_len: usize,
    },
    Slow {
        valid: bool,
        columns: Vec<i64>,
        byte_offset: usize,
        byte_len: usize,
    },
    /// `H` (GPS home) frames, exposed as their own record so the offset/length of every
    /// input byte is still accounted for even though their only other effect is updating
    /// the home-coordinate predictor baseline.
    Home {
        valid: bool,
        columns: Vec<i64>,
        byte_offset: usize,
        byte_len: usize,
    },
    Event(EventFrame),
    Garbage {
        byte_offset: usize,
        byte_len: usize,
    },
}

/// One parsed session: header plus the frame stream that follows it. Built from a byte
/// slice that already begins at a session's start marker — either handed in directly
/// (`&buf` read from a single-session file) or sliced out by
/// [`MultiSegmentBlackboxReader`].
pub struct BlackboxReader<'a> {
    decoder: FrameDecoder,
    stream: ByteStream<'a>,
    statistics: Statistics,
    cancel: Arc<AtomicBool>,
    last_slow_frame: Option<Vec<i64>>,
}

impl<'a> BlackboxReader<'a> {
    /// Parses `data`'s header immediately, as if a `metadataReady` callback fired
    /// during construction, and returns a reader positioned at the first frame byte.
    ///
    /// `data` must begin with the log-start sentinel line; a caller reading from a live
    /// character device rather than a file already fully buffered should read at least
    /// [`FRAME_SERIAL_BUFFER_LENGTH`] bytes ahead before calling this, so the header
    /// section is guaranteed to be present. Detecting character-device vs regular-file
    /// semantics itself is out of scope for this crate.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, BlackboxReaderError> {
        if !data.starts_with(LOG_START_SENTINEL) {
            return Err(BlackboxReaderError::NoSession);
        }
        let (remaining, header) = parse_headers(data).map_err(|_| {
            BlackboxReaderError::Header(HeaderError::MalformedLine(
                "header section could not be parsed".into(),
            ))
        })?;

        Ok(Self {
            decoder: FrameDecoder::new(header),
            stream: ByteStream::new(remaining),
            statistics: Statistics::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            last_slow_frame: None,
        })
    }

    pub fn header(&self) -> &Header {
        self.decoder.header()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn last_slow_frame(&self) -> Option<&[i64]> {
        self.last_slow_frame.as_deref()
    }

    /// Bytes of the frame stream not yet consumed by `Iterator::next`.
    pub fn remaining_bytes(&self) -> &'a [u8] {
        self.stream.remaining()
    }

    /// Builder toggle: when `true`, predictors are bypassed and every column is the raw
    /// on-wire residual, for diagnosing the predictor/encoding layers independently.
    pub fn raw(mut self, raw: bool) -> Self {
        self.decoder.set_raw(raw);
        self
    }

    /// Overrides the default `1 << 31` tolerance used to tell a genuine backward time
    /// jump (corruption) from a 32-bit microsecond-counter rollover.
    pub fn rollover_tolerance(mut self, tolerance: i64) -> Self {
        self.decoder.set_rollover_tolerance(tolerance);
        self
    }

    /// Returns a handle the caller can set from another thread (or a signal handler) to
    /// stop iteration cooperatively. Checked once per frame; never interrupts mid-frame.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Replaces this reader's cancellation flag with one the caller already holds a
    /// handle to, e.g. one shared across several readers stopped together.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    fn record_from(&mut self, decoded: DecodedFrame, byte_offset: usize, byte_len: usize) -> BlackboxRecord {
        match decoded {
            DecodedFrame::Main { intra, columns } => {
                let letter = if intra { 'I' } else { 'P' };
                self.statistics.record(letter, byte_len, true);
                self.statistics.record_fields(&columns);
                self.statistics.intentionally_absent_iterations += self.decoder.last_skipped_frames();
                BlackboxRecord::Main {
                    valid: true,
                    frame_type: letter as u8,
                    columns,
                    byte_offset,
                    byte_len,
                }
            }
            DecodedFrame::Gnss { columns } => {
                let unreferenced = !self.decoder.gps_home_valid();
                self.statistics.record('G', byte_len, true);
                BlackboxRecord::Gnss {
                    valid: true,
                    unreferenced,
                    columns,
                    byte_offset,
                    byte_len,
                }
            }
            DecodedFrame::Slow { columns } => {
                self.statistics.record('S', byte_len, true);
                self.last_slow_frame = Some(columns.clone());
                BlackboxRecord::Slow {
                    valid: true,
                    columns,
                    byte_offset,
                    byte_len,
                }
            }
            DecodedFrame::Home { columns } => {
                self.statistics.record('H', byte_len, true);
                BlackboxRecord::Home {
                    valid: true,
                    columns,
                    byte_offset,
                    byte_len,
                }
            }
            DecodedFrame::Event(event) => {
                self.statistics.record('E', byte_len, true);
                BlackboxRecord::Event(event)
            }
            DecodedFrame::Garbage { bytes, reason } => {
                self.statistics.total_corrupt_bytes += byte_len as u64;
                if let Some(&first) = bytes.first() {
                    let letter = first as char;
                    let entry = self.statistics.record(letter, byte_len, false);
                    match reason {
                        GarbageReason::Desync => entry.desync += 1,
                        GarbageReason::Corrupt | GarbageReason::UnknownFrameType => entry.corrupt += 1,
                    }
                }
                BlackboxRecord::Garbage { byte_offset, byte_len }
            }
        }
    }
}

impl<'a> Iterator for BlackboxReader<'a> {
    type Item = BlackboxRecord;

    fn next(&mut self) -> Option<BlackboxRecord> {
        if self.cancel.load(Ordering::Relaxed) {
            return None;
        }
        let start = self.stream.position();
        let decoded = self.decoder.decode_next(&mut self.stream)?;
        let end = self.stream.position();
        Some(self.record_from(decoded, start, end - start))
    }
}

/// Scans a file for every session-start sentinel and yields one [`BlackboxReader`] per
/// session found, each given an independent slice of `data` running from its own start
/// marker to the next session's start marker (or end of file for the last one).
pub struct MultiSegmentBlackboxReader<'a> {
    data: &'a [u8],
    starts: Vec<usize>,
    next_ix: usize,
}

impl<'a> MultiSegmentBlackboxReader<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Self {
        let mut starts = Vec::new();
        let mut search_from = 0;
        while starts.len() < MAX_LOGS_IN_FILE {
            match find_subslice(&data[search_from..], LOG_START_SENTINEL) {
                Some(rel) => {
                    let abs = search_from + rel;
                    starts.push(abs);
                    search_from = abs + LOG_START_SENTINEL.len();
                }
                None => break,
            }
        }
        Self {
            data,
            starts,
            next_ix: 0,
        }
    }
}

impl<'a> Iterator for MultiSegmentBlackboxReader<'a> {
    type Item = Result<BlackboxReader<'a>, BlackboxReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = *self.starts.get(self.next_ix)?;
        self.next_ix += 1;
        let end = self.starts.get(self.next_ix).copied().unwrap_or(self.data.len());
        Some(BlackboxReader::from_bytes(&self.data[start..end]))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
