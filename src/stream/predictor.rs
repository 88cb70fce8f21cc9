//! Predictor baselines: the value added to a frame's decoded residual to recover the
//! actual field value. The same twelve kinds drive I/P main frames as well as S/G/H
//! frames (see `frame::decoder`).

use crate::error::FrameError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predictor {
    None = 0,
    Previous = 1,
    StraightLine = 2,
    Average2 = 3,
    MinThrottle = 4,
    Motor0 = 5,
    Increment = 6,
    HomeCoordinate = 7,
    Around1500 = 8,
    VBatRef = 9,
    LastMainFrameTime = 10,
    MinMotor = 11,
}

/// Two persisted frames' worth of field values, indexed by the main field list's column
/// order. The currently-decoding frame is not part of the ring: the decoder assembles it
/// in a plain `Vec<i64>` and only commits it here once the whole frame validates.
pub(crate) struct HistoryRing {
    slots: [Vec<i64>; 2],
    previous_ix: usize,
    previous2_ix: usize,
}

impl HistoryRing {
    pub fn with_size(n: usize) -> Self {
        Self {
            slots: [vec![0; n], vec![0; n]],
            previous_ix: 0,
            previous2_ix: 1,
        }
    }

    pub fn previous(&self) -> &[i64] {
        &self.slots[self.previous_ix]
    }

    pub fn previous2(&self) -> &[i64] {
        &self.slots[self.previous2_ix]
    }

    /// An I-frame carries no prediction across frames: both history slots collapse to
    /// the values it just decoded.
    pub fn commit_i_frame(&mut self, values: &[i64]) {
        self.slots[self.previous_ix].copy_from_slice(values);
        self.slots[self.previous2_ix].copy_from_slice(values);
    }

    /// A P-frame's residuals predicted off the existing `previous`/`previous2`; roll
    /// them forward by one frame.
    pub fn commit_p_frame(&mut self, values: &[i64]) {
        std::mem::swap(&mut self.previous_ix, &mut self.previous2_ix);
        self.slots[self.previous_ix].copy_from_slice(values);
    }
}

/// The GPS home coordinate pair, refreshed whenever an H-frame is decoded. `G` frames
/// reference it through the `HomeCoordinate` predictor for their own lat/lon fields.
pub(crate) struct HomeRing {
    current: [i64; 2],
}

impl HomeRing {
    pub fn new() -> Self {
        Self { current: [0, 0] }
    }

    pub fn set(&mut self, lat: i64, lon: i64) {
        self.current = [lat, lon];
    }

    pub fn get(&self, which: usize) -> i64 {
        self.current[which]
    }
}

/// Scalars pulled once from the header that a handful of predictors treat as constants
/// for the whole session, plus `last_main_frame_time`, which the decoder refreshes after
/// every committed I/P frame that carries a `time` field.
pub(crate) struct PredictorContext {
    pub min_throttle: i64,
    pub min_motor: i64,
    pub vbat_ref: i64,
    pub last_main_frame_time: i64,
    /// Loop iterations the logger intentionally skipped before the frame currently
    /// being decoded (loop-rate downsampling, see `frame::decoder`'s schedule check).
    pub last_skipped_frames: i64,
}

/// Computes the baseline a decoded residual is added to. `current_so_far` holds the
/// values already decoded earlier in the same frame (for `Motor0`, which refers to a
/// column within its own frame rather than history); `home_which` selects lat (0) or
/// lon (1) for `HomeCoordinate`.
pub(crate) fn compute_baseline(
    predictor: Predictor,
    field_ix: usize,
    current_so_far: &[i64],
    history: &HistoryRing,
    home: &HomeRing,
    motor0_field_ix: Option<usize>,
    home_which: Option<usize>,
    ctx: &PredictorContext,
) -> Result<i64, FrameError> {
    Ok(match predictor {
        Predictor::None => 0,
        Predictor::Previous => *history
            .previous()
            .get(field_ix)
            .ok_or(FrameError::ReferenceMissing)?,
        Predictor::StraightLine => {
            let p1 = *history
                .previous()
                .get(field_ix)
                .ok_or(FrameError::ReferenceMissing)?;
            let p2 = *history
                .previous2()
                .get(field_ix)
                .ok_or(FrameError::ReferenceMissing)?;
            p1 - p2 + p1
        }
        Predictor::Average2 => {
            let p1 = *history
                .previous()
                .get(field_ix)
                .ok_or(FrameError::ReferenceMissing)?;
            let p2 = *history
                .previous2()
                .get(field_ix)
                .ok_or(FrameError::ReferenceMissing)?;
            // avoids overflowing i64 the way (p1 + p2) / 2 could for extreme values
            (p1 / 2) + (p2 / 2) + ((p1 % 2 + p2 % 2) / 2)
        }
        Predictor::MinThrottle => ctx.min_throttle,
        Predictor::Motor0 => {
            let ix = motor0_field_ix.ok_or(FrameError::ReferenceMissing)?;
            *current_so_far.get(ix).ok_or(FrameError::ReferenceMissing)?
        }
        Predictor::Increment => {
            *history
                .previous()
                .get(field_ix)
                .ok_or(FrameError::ReferenceMissing)?
                + 1
                + ctx.last_skipped_frames
        }
        Predictor::HomeCoordinate => {
            let which = home_which.ok_or(FrameError::ReferenceMissing)?;
            home.get(which)
        }
        Predictor::Around1500 => 1500,
        Predictor::VBatRef => ctx.vbat_ref,
        Predictor::LastMainFrameTime => ctx.last_main_frame_time,
        Predictor::MinMotor => ctx.min_motor,
    })
}
