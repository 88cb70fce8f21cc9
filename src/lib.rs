//! Decodes Blackbox flight-log files (Betaflight/Cleanflight/Baseflight) into typed
//! per-frame records: header parsing, the variable-length wire encodings, predictor
//! baselines, and the frame-level resync state machine.
//!
//! [`BlackboxReader`] is the entry point for a single session; [`MultiSegmentBlackboxReader`]
//! splits a file holding several back-to-back sessions and hands out one reader per session.

pub(crate) mod error;
pub(crate) mod frame;
pub mod session;
pub mod stream;

pub use error::{BlackboxReaderError, DecodeError, FrameError, HeaderError};
pub use frame::event::{Adjustment, EventFrame};
pub use session::{BlackboxReader, BlackboxRecord, MultiSegmentBlackboxReader, Statistics};

#[cfg(test)]
mod tests;
