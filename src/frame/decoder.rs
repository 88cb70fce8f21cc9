//! The frame decoder state machine: `AwaitFrameType -> DecodeFields -> Validate ->
//! {Commit, DiscardResync}`. One [`FrameDecoder`] is built per session from its parsed
//! [`Header`] and is then fed the byte stream that follows the header, one frame at a
//! time, through [`FrameDecoder::decode_next`].
//!
//! Resync is realized as: on any failure, rewind to the mark taken before the frame-type
//! byte was read, report that single byte as [`DecodedFrame::Garbage`], and advance past
//! it. The caller (`crate::session`) drives the retry by calling `decode_next` again,
//! which re-enters `AwaitFrameType` one byte further into the stream — a faithful,
//! simplified realization of scanning byte-by-byte for the next frame that decodes clean.

use crate::error::FrameError;
use crate::frame::encoding::{
    read_elias_delta_s32, read_elias_delta_u32, read_neg_14bit, read_null, read_signed_vb,
    read_tag2_3s32, read_tag8_4s16, read_tag8_8svb, read_unsigned_vb_i64,
};
use crate::frame::event::{parse_event, EventFrame};
use crate::frame::FieldEncoding;
use crate::stream::cursor::ByteStream;
use crate::stream::header::{home_predictor_axis, FieldDefinition, FrameDefinition, Header};
use crate::stream::predictor::{compute_baseline, HistoryRing, HomeRing, Predictor, PredictorContext};

/// Why a byte was reported as [`DecodedFrame::Garbage`] rather than a decoded frame,
/// mirroring the three non-clean outcomes in §7 of the frame-level error model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GarbageReason {
    UnknownFrameType,
    Corrupt,
    Desync,
}

#[derive(Debug)]
pub(crate) enum DecodedFrame {
    Main { intra: bool, columns: Vec<i64> },
    Gnss { columns: Vec<i64> },
    Slow { columns: Vec<i64> },
    Home { columns: Vec<i64> },
    Event(EventFrame),
    Garbage { bytes: Vec<u8>, reason: GarbageReason },
}

/// Persistent state threaded from one frame to the next: the history rings each frame
/// type predicts off of, the GPS home reference, and the bookkeeping the main stream's
/// `Increment`/`LastMainFrameTime` predictors and time-rollover reconciliation need.
pub(crate) struct DecoderState {
    main_history: HistoryRing,
    s_history: HistoryRing,
    g_history: HistoryRing,
    h_history: HistoryRing,
    home: HomeRing,
    main_stream_valid: bool,
    gps_home_valid: bool,
    time_rollover_accumulator: i64,
    last_main_frame_time_raw: Option<i64>,
    last_main_frame_time: Option<i64>,
    last_main_frame_iteration: Option<u32>,
    last_skipped_frames: u32,
    /// Below this forward wrap distance, a main-frame time that decreased from the
    /// previous frame is treated as a 2^32-microsecond rollover rather than corruption.
    rollover_tolerance: i64,
}

impl DecoderState {
    fn new(header: &Header, rollover_tolerance: i64) -> Self {
        Self {
            main_history: HistoryRing::with_size(header.frame_defs.i.len()),
            s_history: HistoryRing::with_size(header.frame_defs.s.len()),
            g_history: HistoryRing::with_size(header.frame_defs.g.len()),
            h_history: HistoryRing::with_size(header.frame_defs.h.len()),
            home: HomeRing::new(),
            main_stream_valid: false,
            gps_home_valid: false,
            time_rollover_accumulator: 0,
            last_main_frame_time_raw: None,
            last_main_frame_time: None,
            last_main_frame_iteration: None,
            last_skipped_frames: 0,
            rollover_tolerance,
        }
    }
}

/// Owns a clone of the session's [`Header`] rather than borrowing it, so a
/// [`crate::session::BlackboxReader`] can keep its own copy for consumer inspection
/// alongside a decoder that is free to outlive any particular borrow of it.
pub(crate) struct FrameDecoder {
    header: Header,
    state: DecoderState,
    min_throttle: i64,
    min_motor: i64,
    vbat_ref: i64,
    /// When set, predictors are bypassed (baseline `0`) and residuals are emitted
    /// verbatim, for the `raw` diagnostic mode of §4.6.
    raw: bool,
}

/// Default tolerance for the main-frame time-rollover check: half the 32-bit space, so
/// any backward jump smaller than it is assumed to be a wrap rather than corruption.
pub(crate) const DEFAULT_ROLLOVER_TOLERANCE: i64 = 1 << 31;

/// Upper bound on a single frame's byte length; a frame that decodes past this is
/// corrupt rather than trusted, since no legitimate encoding produces a frame anywhere
/// near this size.
pub(crate) const FRAME_MAX: usize = 256;

impl FrameDecoder {
    pub(crate) fn new(header: Header) -> Self {
        Self::with_rollover_tolerance(header, DEFAULT_ROLLOVER_TOLERANCE)
    }

    pub(crate) fn with_rollover_tolerance(header: Header, rollover_tolerance: i64) -> Self {
        let state = DecoderState::new(&header, rollover_tolerance);
        Self {
            min_throttle: header.system_config.min_throttle as i64,
            min_motor: header.system_config.motor_output_range.0 as i64,
            vbat_ref: header.system_config.vbat_ref as i64,
            header,
            state,
            raw: false,
        }
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn set_raw(&mut self, raw: bool) {
        self.raw = raw;
    }

    pub(crate) fn set_rollover_tolerance(&mut self, tolerance: i64) {
        self.state.rollover_tolerance = tolerance;
    }

    /// Whether an `H` frame has set the GPS home baseline yet this session, used by
    /// `crate::session` to flag a `G` frame `unreferenced` when it predicted against a
    /// never-set home coordinate.
    pub(crate) fn gps_home_valid(&self) -> bool {
        self.state.gps_home_valid
    }

    /// Loop iterations silently skipped before the most recently decoded main frame, per
    /// the `Increment` predictor's bookkeeping; folded into `Statistics::intentionally_absent_iterations`.
    pub(crate) fn last_skipped_frames(&self) -> u32 {
        self.state.last_skipped_frames
    }

    /// Attempts to decode exactly one frame starting at the stream's current position.
    /// Returns `None` only at end of stream; a byte that doesn't start a recognizable,
    /// validatable frame comes back as a one-byte [`DecodedFrame::Garbage`] rather than
    /// being silently dropped, so callers can account for every byte of the body.
    pub(crate) fn decode_next(&mut self, stream: &mut ByteStream) -> Option<DecodedFrame> {
        if stream.eof() {
            return None;
        }
        let frame_start = stream.position();
        let mark = stream.mark();
        let frame_type = match stream.read_u8() {
            Ok(b) => b,
            Err(_) => return None,
        };

        let result: Result<DecodedFrame, FrameError> = match frame_type {
            b'I' => self.decode_main_frame(stream, true),
            b'P' => {
                if self.state.main_stream_valid {
                    self.decode_main_frame(stream, false)
                } else {
                    Err(FrameError::DesyncFrame {
                        reason: "P frame with no preceding I frame".into(),
                    })
                }
            }
            b'S' => self.decode_slow_frame(stream),
            b'G' => self.decode_gnss_frame(stream),
            b'H' => self.decode_home_frame(stream),
            b'E' => {
                let event_code = match stream.read_u8() {
                    Ok(code) => code,
                    Err(e) => return Some(self.resync(stream, mark, frame_type, e.into())),
                };
                parse_event(stream, event_code).map(DecodedFrame::Event)
            }
            _ => {
                stream.rewind(mark);
                stream.skip_byte();
                return Some(DecodedFrame::Garbage {
                    bytes: vec![frame_type],
                    reason: GarbageReason::UnknownFrameType,
                });
            }
        };

        match result {
            Ok(frame) => {
                let byte_len = stream.position() - frame_start;
                if byte_len > FRAME_MAX {
                    Some(self.resync(
                        stream,
                        mark,
                        frame_type,
                        FrameError::CorruptFrame {
                            reason: format!("frame length {byte_len} exceeds {FRAME_MAX} bytes"),
                        },
                    ))
                } else {
                    Some(frame)
                }
            }
            Err(err) => Some(self.resync(stream, mark, frame_type, err)),
        }
    }

    fn resync(
        &mut self,
        stream: &mut ByteStream,
        mark: crate::stream::cursor::Mark,
        frame_type: u8,
        reason: FrameError,
    ) -> DecodedFrame {
        tracing::debug!(frame_type = %(frame_type as char), %reason, "discarding frame and resyncing");
        stream.rewind(mark);
        stream.skip_byte();
        self.state.main_stream_valid = false;
        let garbage_reason = match reason {
            FrameError::DesyncFrame { .. } => GarbageReason::Desync,
            _ => GarbageReason::Corrupt,
        };
        DecodedFrame::Garbage {
            bytes: vec![frame_type],
            reason: garbage_reason,
        }
    }

    fn decode_main_frame(&mut self, stream: &mut ByteStream, intra: bool) -> Result<DecodedFrame, FrameError> {
        let def = if intra {
            &self.header.frame_defs.i
        } else {
            &self.header.frame_defs.p
        };
        if def.is_empty() {
            return Err(FrameError::CorruptFrame {
                reason: "no field definition for main frame".into(),
            });
        }
        if def.fields.len() != self.header.frame_defs.i.fields.len() {
            return Err(FrameError::CorruptFrame {
                reason: "P frame field count does not match I frame field count".into(),
            });
        }

        let loop_ix = self.header.main_field_indexes.loop_iteration;
        let time_ix = self.header.main_field_indexes.time;
        let motor0_ix = self.header.main_field_indexes.motor[0];

        let last_iteration = self.state.last_main_frame_iteration;
        let last_raw_time = self.state.last_main_frame_time_raw;
        let rollover_tolerance = self.state.rollover_tolerance;
        let accumulator = self.state.time_rollover_accumulator;

        // Loop iterations the schedule expects to have elapsed silently since the last
        // committed main frame. Must be known before `loopIteration` is decoded: its
        // residual is conventionally NULL under the Increment predictor, so deriving the
        // skip count from the value it produces would always collapse to zero.
        let schedule_skip = if intra {
            0i64
        } else {
            let ratio = self.header.system_config.main_frame_interval.p_ratio;
            let (num, den) = (*ratio.numer() as i64, *ratio.denom() as i64);
            if num <= 0 {
                0
            } else {
                ((den / num) - 1).max(0)
            }
        };

        let mut rollover_bump = 0i64;
        let mut time_regressed = false;
        let mut new_raw_time = None;

        let mut ctx = PredictorContext {
            min_throttle: self.min_throttle,
            min_motor: self.min_motor,
            vbat_ref: self.vbat_ref,
            last_main_frame_time: self.state.last_main_frame_time.unwrap_or(0),
            last_skipped_frames: schedule_skip,
        };

        let values = decode_fields(
            stream,
            def,
            &self.state.main_history,
            &self.state.home,
            motor0_ix,
            self.raw,
            &mut ctx,
            |field_ix, _field, values, ctx| {
                if time_ix == Some(field_ix) {
                    let raw = values[field_ix];
                    let mut acc = accumulator;
                    if let Some(last_raw) = last_raw_time {
                        if raw < last_raw {
                            let forward_wrap_distance = (u32::MAX as i64 - last_raw) + 1 + raw;
                            if forward_wrap_distance < rollover_tolerance {
                                acc += 1i64 << 32;
                            } else {
                                time_regressed = true;
                            }
                        }
                    }
                    rollover_bump = acc - accumulator;
                    new_raw_time = Some(raw);
                    let reconciled = raw + acc;
                    values[field_ix] = reconciled;
                    ctx.last_main_frame_time = reconciled;
                }
            },
        )?;

        if time_regressed {
            return Err(FrameError::DesyncFrame {
                reason: "time moved backward by more than the rollover tolerance".into(),
            });
        }

        if let Some(lix) = loop_ix {
            if let Some(last) = last_iteration {
                if values[lix] <= last as i64 {
                    return Err(FrameError::DesyncFrame {
                        reason: "iteration did not advance".into(),
                    });
                }
            }
        }

        self.state.time_rollover_accumulator += rollover_bump;
        if let Some(raw) = new_raw_time {
            self.state.last_main_frame_time_raw = Some(raw);
            self.state.last_main_frame_time = Some(raw + self.state.time_rollover_accumulator);
        }
        let observed_skip = match (loop_ix, last_iteration) {
            (Some(lix), Some(last)) => (values[lix] - last as i64 - 1).max(0),
            _ => 0,
        };
        if let Some(lix) = loop_ix {
            self.state.last_main_frame_iteration = Some(values[lix] as u32);
        }
        self.state.last_skipped_frames = observed_skip as u32;

        if intra {
            self.state.main_history.commit_i_frame(&values);
            self.state.main_stream_valid = true;
        } else {
            self.state.main_history.commit_p_frame(&values);
        }

        Ok(DecodedFrame::Main { intra, columns: values })
    }

    fn decode_slow_frame(&mut self, stream: &mut ByteStream) -> Result<DecodedFrame, FrameError> {
        let def = &self.header.frame_defs.s;
        if def.is_empty() {
            return Err(FrameError::CorruptFrame {
                reason: "no field definition for S frame".into(),
            });
        }
        let mut ctx = self.static_ctx();
        let values = decode_fields(
            stream,
            def,
            &self.state.s_history,
            &self.state.home,
            None,
            self.raw,
            &mut ctx,
            |_, _, _, _| {},
        )?;
        self.state.s_history.commit_p_frame(&values);
        Ok(DecodedFrame::Slow { columns: values })
    }

    fn decode_gnss_frame(&mut self, stream: &mut ByteStream) -> Result<DecodedFrame, FrameError> {
        let def = &self.header.frame_defs.g;
        if def.is_empty() {
            return Err(FrameError::CorruptFrame {
                reason: "no field definition for G frame".into(),
            });
        }
        let mut ctx = self.static_ctx();
        let values = decode_fields(
            stream,
            def,
            &self.state.g_history,
            &self.state.home,
            None,
            self.raw,
            &mut ctx,
            |_, _, _, _| {},
        )?;
        self.state.g_history.commit_p_frame(&values);
        Ok(DecodedFrame::Gnss { columns: values })
    }

    fn decode_home_frame(&mut self, stream: &mut ByteStream) -> Result<DecodedFrame, FrameError> {
        let def = &self.header.frame_defs.h;
        if def.is_empty() {
            return Err(FrameError::CorruptFrame {
                reason: "no field definition for H frame".into(),
            });
        }
        let mut ctx = self.static_ctx();
        let values = decode_fields(
            stream,
            def,
            &self.state.h_history,
            &self.state.home,
            None,
            self.raw,
            &mut ctx,
            |_, _, _, _| {},
        )?;
        self.state.h_history.commit_p_frame(&values);

        let coord = self.header.gps_home_field_indexes.coord;
        if let (Some(lat_ix), Some(lon_ix)) = (coord[0], coord[1]) {
            self.state.home.set(values[lat_ix], values[lon_ix]);
            self.state.gps_home_valid = true;
        }
        Ok(DecodedFrame::Home { columns: values })
    }

    fn static_ctx(&self) -> PredictorContext {
        PredictorContext {
            min_throttle: self.min_throttle,
            min_motor: self.min_motor,
            vbat_ref: self.vbat_ref,
            last_main_frame_time: self.state.last_main_frame_time.unwrap_or(0),
            last_skipped_frames: 0,
        }
    }
}

/// Decodes every field of one frame body in declaration order, resolving group
/// encodings' shared wire reads into their constituent columns. `on_field` runs once per
/// decoded column, after it's pushed into `values`, so callers can read/patch the column
/// just written (used by main frames for time rollover reconciliation).
fn decode_fields(
    stream: &mut ByteStream,
    def: &FrameDefinition,
    history: &HistoryRing,
    home: &HomeRing,
    motor0_field_ix: Option<usize>,
    raw_mode: bool,
    ctx: &mut PredictorContext,
    mut on_field: impl FnMut(usize, &FieldDefinition, &mut Vec<i64>, &mut PredictorContext),
) -> Result<Vec<i64>, FrameError> {
    let mut values = Vec::with_capacity(def.fields.len());
    let mut i = 0;
    while i < def.fields.len() {
        let encoding = def.fields[i].encoding;
        let residuals: Vec<i64> = match encoding {
            FieldEncoding::SignedVB => vec![read_signed_vb(stream)?],
            FieldEncoding::UnsignedVB => vec![read_unsigned_vb_i64(stream)?],
            FieldEncoding::Negative14BitVB => vec![read_neg_14bit(stream)?],
            FieldEncoding::Null => vec![read_null(stream)?],
            FieldEncoding::EliasDeltaU32 => vec![read_elias_delta_u32(stream)? as i64],
            FieldEncoding::EliasDeltaS32 => vec![read_elias_delta_s32(stream)?],
            FieldEncoding::Tag8_8SVB(count) => {
                let raw = read_tag8_8svb(stream, count)?;
                raw[..count].to_vec()
            }
            FieldEncoding::Tag2_3S32(count) => {
                let raw = read_tag2_3s32(stream)?;
                raw[..count].to_vec()
            }
            FieldEncoding::Tag8_4S16(count) => {
                let raw = read_tag8_4s16(stream)?;
                raw[..count].to_vec()
            }
        };
        stream.align_to_byte();

        for (offset, residual) in residuals.into_iter().enumerate() {
            let field_ix = i + offset;
            let field = &def.fields[field_ix];
            let home_which = if field.predictor == Predictor::HomeCoordinate {
                home_predictor_axis(&field.name)
            } else {
                None
            };
            let baseline = if raw_mode {
                0
            } else {
                compute_baseline(
                    field.predictor,
                    field_ix,
                    &values,
                    history,
                    home,
                    motor0_field_ix,
                    home_which,
                    ctx,
                )?
            };
            values.push(baseline + residual);
            on_field(field_ix, field, &mut values, ctx);
        }
        i += residuals_len(encoding);
    }
    Ok(values)
}

fn residuals_len(encoding: FieldEncoding) -> usize {
    match encoding {
        FieldEncoding::Tag8_8SVB(count) | FieldEncoding::Tag2_3S32(count) | FieldEncoding::Tag8_4S16(count) => {
            count
        }
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::header::{parse_headers, SystemConfig};

    fn header_with_two_i_fields() -> Header {
        let (_, header) = parse_headers(
            b"H Field I name:loopIteration,time\n\
              H Field I signed:0,0\n\
              H Field I predictor:0,0\n\
              H Field I encoding:1,1\n\
              I",
        )
        .unwrap();
        header
    }

    #[test]
    fn decodes_a_single_i_frame() {
        let header = header_with_two_i_fields();
        let mut decoder = FrameDecoder::new(header);
        // loopIteration=5 (unsigned vb), time=1000 (unsigned vb, encoded multi-byte)
        let mut data = vec![b'I', 5];
        // 1000 = 0b1111101000 -> low7=1101000(0x68)|cont, next=0000111(7)
        data.extend_from_slice(&[0xe8, 0x07]);
        let mut stream = ByteStream::new(&data);

        match decoder.decode_next(&mut stream) {
            Some(DecodedFrame::Main { intra: true, columns }) => {
                assert_eq!(columns, vec![5, 1000]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn p_frame_before_any_i_frame_becomes_garbage() {
        let header = header_with_two_i_fields();
        let mut decoder = FrameDecoder::new(header);
        let data = vec![b'P', 1, 2];
        let mut stream = ByteStream::new(&data);
        match decoder.decode_next(&mut stream) {
            Some(DecodedFrame::Garbage { bytes, .. }) => assert_eq!(bytes, vec![b'P']),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_frame_type_is_reported_as_garbage_and_consumes_one_byte() {
        let header = header_with_two_i_fields();
        let mut decoder = FrameDecoder::new(header);
        let data = vec![b'?', b'I', 5, 0xe8, 0x07];
        let mut stream = ByteStream::new(&data);
        match decoder.decode_next(&mut stream) {
            Some(DecodedFrame::Garbage { bytes, .. }) => assert_eq!(bytes, vec![b'?']),
            other => panic!("unexpected {:?}", other),
        }
        match decoder.decode_next(&mut stream) {
            Some(DecodedFrame::Main { intra: true, columns }) => {
                assert_eq!(columns, vec![5, 1000]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn time_rollover_adds_a_full_32_bit_span() {
        let header = header_with_two_i_fields();
        let mut decoder = FrameDecoder::new(header);

        // First I-frame: loopIteration=0, time=4_294_967_000 via 5-byte unsigned VB.
        let mut data = vec![b'I', 0];
        push_unsigned_vb(&mut data, 4_294_967_000);
        let mut stream = ByteStream::new(&data);
        decoder.decode_next(&mut stream).unwrap();

        // Second I-frame: loopIteration=1, time=500 (wrapped past 2^32).
        let mut data2 = vec![b'I'];
        push_unsigned_vb(&mut data2, 1);
        push_unsigned_vb(&mut data2, 500);
        let mut stream2 = ByteStream::new(&data2);
        match decoder.decode_next(&mut stream2) {
            Some(DecodedFrame::Main { intra: true, columns }) => {
                assert_eq!(columns[0], 1);
                assert_eq!(columns[1], 500i64 + (1i64 << 32));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn time_regression_beyond_tolerance_is_rejected_as_desync() {
        let header = header_with_two_i_fields();
        let mut decoder = FrameDecoder::new(header);

        // First I-frame: loopIteration=0, time=2_000_000_000.
        let mut data = vec![b'I', 0];
        push_unsigned_vb(&mut data, 2_000_000_000);
        let mut stream = ByteStream::new(&data);
        decoder.decode_next(&mut stream).unwrap();

        // Second I-frame: loopIteration=1, time=0 -- a backward step far larger than the
        // rollover tolerance, so it can't plausibly be a 32-bit wrap.
        let mut data2 = vec![b'I'];
        push_unsigned_vb(&mut data2, 1);
        push_unsigned_vb(&mut data2, 0);
        let mut stream2 = ByteStream::new(&data2);
        match decoder.decode_next(&mut stream2) {
            Some(DecodedFrame::Garbage {
                reason: GarbageReason::Desync,
                ..
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn increment_predictor_uses_schedule_derived_skip_count() {
        let (_, header) = parse_headers(
            b"H Field I name:loopIteration,time\n\
              H Field I signed:0,0\n\
              H Field I predictor:0,0\n\
              H Field I encoding:1,1\n\
              H Field P predictor:6,1\n\
              H Field P encoding:9,1\n\
              H P interval:1/3\n\
              I",
        )
        .unwrap();
        let mut decoder = FrameDecoder::new(header);

        // I-frame: loopIteration=0, time=1000.
        let mut data = vec![b'I', 0];
        push_unsigned_vb(&mut data, 1000);
        let mut stream = ByteStream::new(&data);
        decoder.decode_next(&mut stream).unwrap();

        // P-frame: loopIteration residual is NULL (no bytes), time predictor is Previous
        // with a +500 residual.
        let mut data2 = vec![b'P'];
        push_unsigned_vb(&mut data2, 500);
        let mut stream2 = ByteStream::new(&data2);
        match decoder.decode_next(&mut stream2) {
            Some(DecodedFrame::Main { intra: false, columns }) => {
                // prev(0) + 1 + 2 skipped, per a P interval of 1/3.
                assert_eq!(columns[0], 3);
                assert_eq!(columns[1], 1500);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(decoder.last_skipped_frames(), 2);
    }

    fn push_unsigned_vb(out: &mut Vec<u8>, mut value: u32) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    #[test]
    fn cell_count_helper_is_reachable_through_system_config() {
        let cfg = SystemConfig {
            vbat_scale: 110,
            ..Default::default()
        };
        assert_eq!(cfg.estimate_cell_count(0), 1);
    }
}
