use thiserror::Error;

/// Errors raised while pulling primitive values off a [`crate::stream::cursor::ByteStream`].
///
/// These are the lowest-level failures in the crate: they never escape a session's
/// iterator directly, but are folded into [`FrameError`] by the frame decoder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("end of stream")]
    EndOfStream,
    #[error("variable-length integer did not terminate within 5 bytes")]
    VarIntOverflow,
    #[error("bit read of {0} bits is out of the supported 1..=32 range")]
    BitReadOutOfRange(u32),
}

/// Per-frame failures. All are recoverable: the state machine counts them and enters
/// resync rather than aborting the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("unrecognized frame type byte {0:#04x}")]
    UnknownFrameType(u8),
    #[error("corrupt frame: {reason}")]
    CorruptFrame { reason: String },
    #[error("desynced frame: {reason}")]
    DesyncFrame { reason: String },
    #[error("predictor referenced history that does not exist yet")]
    ReferenceMissing,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Header-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("malformed header line: {0}")]
    MalformedLine(String),
    #[error("missing required header key {0}")]
    MissingRequiredKey(&'static str),
}

/// Session-level, fatal failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlackboxReaderError {
    #[error("no blackbox log session found in the supplied data")]
    NoSession,
    #[error(transparent)]
    Header(#[from] HeaderError),
}
