//! `E` frames: one-off occurrences (arming state changes, flight mode toggles, in-flight
//! tuning adjustments, the sync beep, end-of-log) interleaved with the periodic `I`/`P`
//! stream. Unlike main/GPS/slow frames, events carry no header-declared schema: their
//! shape is fixed by the numeric event code that leads the frame body.

use crate::error::FrameError;
use crate::frame::encoding::{read_unsigned_vb, zigzag_decode};
use crate::stream::cursor::ByteStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjustment {
    Float(f32),
    Int(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventFrame {
    SyncBeep { time: u32 },
    FlightMode { flags: u32, old_flags: u32 },
    Disarm { reason: u32 },
    InFlightAdjustment { function: u8, adjustment: Adjustment },
    LoggingResume { iteration: u32, time: u32 },
    EndOfLog,
}

const END_OF_LOG_MARKER: &[u8] = b"End of log\0";

/// Decodes one event body, having already consumed the leading `E` frame-type byte and
/// the event code that selects which of these variants follows.
pub(crate) fn parse_event(stream: &mut ByteStream, event_code: u8) -> Result<EventFrame, FrameError> {
    Ok(match event_code {
        0 => EventFrame::SyncBeep {
            time: read_unsigned_vb(stream)?,
        },
        13 => {
            let function = stream.read_u8()?;
            if function & 0b1000_0000 != 0 {
                let function = function & 0b0111_1111;
                let bits = stream.read_u32_le()?;
                EventFrame::InFlightAdjustment {
                    function,
                    adjustment: Adjustment::Float(f32::from_bits(bits)),
                }
            } else {
                let raw = read_unsigned_vb(stream)?;
                EventFrame::InFlightAdjustment {
                    function,
                    adjustment: Adjustment::Int(zigzag_decode(raw)),
                }
            }
        }
        14 => {
            let iteration = read_unsigned_vb(stream)?;
            let time = read_unsigned_vb(stream)?;
            EventFrame::LoggingResume { iteration, time }
        }
        15 => EventFrame::Disarm {
            reason: read_unsigned_vb(stream)?,
        },
        30 => {
            let flags = read_unsigned_vb(stream)?;
            let old_flags = read_unsigned_vb(stream)?;
            EventFrame::FlightMode { flags, old_flags }
        }
        255 => {
            for &expected in END_OF_LOG_MARKER {
                if stream.read_u8()? != expected {
                    return Err(FrameError::CorruptFrame {
                        reason: "end-of-log marker mismatch".into(),
                    });
                }
            }
            EventFrame::EndOfLog
        }
        other => {
            return Err(FrameError::CorruptFrame {
                reason: format!("unrecognized event code {other}"),
            })
        }
    })
}
