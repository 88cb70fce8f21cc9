//! Builds a session's frozen [`Header`] by folding the `H `-prefixed lines at the start
//! of a log into a [`SystemConfig`], one [`FrameDefinition`] per frame-type letter, and
//! the well-known [`MainFieldIndexes`]/[`GpsFieldIndexes`]/[`GpsHomeFieldIndexes`]/
//! [`SlowFieldIndexes`] lookup tables, as `frame::header`'s per-line grammar feeds
//! into this module's `HeaderBuilder`.

use std::collections::HashMap;
use std::f32::consts::PI;

use itertools::izip;
use nom::{
    error::{ErrorKind, ParseError},
    multi::fold_many0,
    IResult,
};
use num_rational::Ratio;
use tracing::warn;

use crate::frame::header::{parse_header, Frame, VBatCellVoltage as RawVBatCellVoltage, PID};
use crate::frame::{resolve_group_encodings, FieldEncoding, RawFieldEncoding};
use crate::stream::predictor::Predictor;

/// A field's nominal wire width, purely informational (statistics/debugging aid): the
/// wire encoding is always variable-length, so this never gates decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldWidth {
    One,
    Two,
    Four,
}

impl FieldEncoding {
    pub(crate) fn nominal_width(&self) -> FieldWidth {
        match self {
            FieldEncoding::Null => FieldWidth::One,
            FieldEncoding::SignedVB | FieldEncoding::UnsignedVB => FieldWidth::Four,
            FieldEncoding::Negative14BitVB => FieldWidth::Two,
            FieldEncoding::Tag8_8SVB(_) => FieldWidth::Four,
            FieldEncoding::Tag2_3S32(_) => FieldWidth::Four,
            FieldEncoding::Tag8_4S16(_) => FieldWidth::Two,
            FieldEncoding::EliasDeltaU32 | FieldEncoding::EliasDeltaS32 => FieldWidth::Four,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub signed: bool,
    pub nominal_width: FieldWidth,
    pub predictor: Predictor,
    pub encoding: FieldEncoding,
}

/// One frame type's schema. Immutable for the session once [`parse_headers`] returns:
/// nothing in this crate mutates a `FrameDefinition` after header parsing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDefinition {
    pub fields: Vec<FieldDefinition>,
}

impl FrameDefinition {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameDefinitions {
    pub i: FrameDefinition,
    pub p: FrameDefinition,
    pub s: FrameDefinition,
    pub g: FrameDefinition,
    pub h: FrameDefinition,
}

impl FrameDefinitions {
    pub(crate) fn get(&self, letter: u8) -> Option<&FrameDefinition> {
        match letter {
            b'I' => Some(&self.i),
            b'P' => Some(&self.p),
            b'S' => Some(&self.s),
            b'G' => Some(&self.g),
            b'H' => Some(&self.h),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FirmwareKind {
    #[default]
    Unknown,
    Baseflight,
    Cleanflight,
    Betaflight,
}

impl FirmwareKind {
    fn from_str(s: &str) -> Self {
        match s {
            "Baseflight" => FirmwareKind::Baseflight,
            "Cleanflight" => FirmwareKind::Cleanflight,
            "Betaflight" => FirmwareKind::Betaflight,
            _ => FirmwareKind::Unknown,
        }
    }
}

pub type VbatCellVoltage = RawVBatCellVoltage;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct CurrentMeter {
    pub offset: i16,
    pub scale: i16,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MainFrameInterval {
    pub i_interval: u32,
    pub p_ratio: Ratio<u32>,
}

impl Default for MainFrameInterval {
    fn default() -> Self {
        Self {
            i_interval: 1,
            p_ratio: Ratio::new(1, 1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct PidValues {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub ff: Option<f32>,
}

impl From<PID> for PidValues {
    fn from(pid: PID) -> Self {
        Self {
            p: pid.p,
            i: pid.i,
            d: pid.d,
            ff: pid.ff,
        }
    }
}

/// Scalars shared by the whole session: scales, PID gains, and the handful of constants
/// a few predictors treat as baselines (`minthrottle`, `vbatref`, `motorOutput[0]`).
#[derive(Clone, Debug, Default)]
pub struct SystemConfig {
    pub min_throttle: u16,
    pub max_throttle: u16,
    pub motor_output_range: (u16, u16),
    pub rc_rate: u16,
    pub yaw_rate: u16,
    pub acc_1g: u16,
    /// Raw `gyro.scale` header value in degrees/microsecond, as reported.
    pub raw_gyro_scale: f32,
    /// `raw_gyro_scale` converted to radians/microsecond, used by `gyro_raw_to_rad_per_sec`.
    pub gyro_scale: f32,
    pub vbat_scale: u8,
    pub vbat_cell_voltage: VbatCellVoltage,
    pub vbat_ref: u16,
    pub current_meter: CurrentMeter,
    pub firmware: FirmwareKind,
    pub firmware_revision: Option<String>,
    pub firmware_date: Option<String>,
    pub data_version: String,
    pub main_frame_interval: MainFrameInterval,
    pub pid_values: [PidValues; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MainFieldIndexes {
    pub loop_iteration: Option<usize>,
    pub time: Option<usize>,
    pub pid: [[Option<usize>; 3]; 3],
    pub rc_command: [Option<usize>; 4],
    pub vbat_latest: Option<usize>,
    pub amperage_latest: Option<usize>,
    pub mag_adc: [Option<usize>; 3],
    pub baro_alt: Option<usize>,
    pub sonar_raw: Option<usize>,
    pub rssi: Option<usize>,
    pub gyro_adc: [Option<usize>; 3],
    pub acc_smooth: [Option<usize>; 3],
    pub motor: [Option<usize>; 8],
    pub servo: [Option<usize>; 8],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GpsFieldIndexes {
    pub time: Option<usize>,
    pub num_sat: Option<usize>,
    pub coord: [Option<usize>; 2],
    pub altitude: Option<usize>,
    pub speed: Option<usize>,
    pub ground_course: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GpsHomeFieldIndexes {
    pub coord: [Option<usize>; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SlowFieldIndexes {
    pub flight_mode_flags: Option<usize>,
    pub state_flags: Option<usize>,
    pub failsafe_phase: Option<usize>,
}

/// A main (`I`/`P`) field, kept for name-based lookup (`header.ip_fields["gyroADC[0]"]`).
#[derive(Clone, Debug, PartialEq)]
pub struct IPField {
    pub name: String,
    pub ix: usize,
    pub signed: bool,
}

#[derive(Clone, Debug)]
pub struct Header {
    pub product: String,
    pub board_information: Option<String>,
    pub craft_name: Option<String>,
    pub system_config: SystemConfig,
    pub frame_defs: FrameDefinitions,
    pub main_field_indexes: MainFieldIndexes,
    pub gps_field_indexes: GpsFieldIndexes,
    pub gps_home_field_indexes: GpsHomeFieldIndexes,
    pub slow_field_indexes: SlowFieldIndexes,
    pub ip_fields: HashMap<String, IPField>,
    pub other_headers: HashMap<String, String>,
}

#[derive(Clone, Debug, Default)]
struct HeaderBuilder {
    product: Option<String>,
    data_version: Option<String>,
    firmware_type: Option<String>,
    firmware_revision: Option<String>,
    firmware_date: Option<String>,
    board_information: Option<String>,
    craft_name: Option<String>,

    i_interval: Option<i16>,
    p_interval: Option<Ratio<u16>>,
    p_denom: Option<u16>,

    min_throttle: Option<u16>,
    max_throttle: Option<u16>,
    motor_output: Option<(u16, u16)>,
    rc_rate: Option<u16>,
    yaw_rate: Option<u16>,
    acc_1g: Option<u16>,
    gyro_scale: Option<f32>,
    vbat_scale: Option<u8>,
    vbat_cell_voltage: Option<VbatCellVoltage>,
    vbat_ref: Option<u16>,
    current_meter: Option<(i16, i16)>,
    roll_pid: Option<PID>,
    pitch_pid: Option<PID>,
    yaw_pid: Option<PID>,

    other_headers: HashMap<String, String>,

    i_field_names: Vec<String>,
    i_field_signed: Vec<bool>,
    i_field_encoding: Vec<RawFieldEncoding>,
    i_field_predictor: Vec<Predictor>,

    p_field_names: Vec<String>,
    p_field_signed: Vec<bool>,
    p_field_encoding: Vec<RawFieldEncoding>,
    p_field_predictor: Vec<Predictor>,

    s_field_names: Vec<String>,
    s_field_signed: Vec<bool>,
    s_field_encoding: Vec<RawFieldEncoding>,
    s_field_predictor: Vec<Predictor>,

    g_field_names: Vec<String>,
    g_field_signed: Vec<bool>,
    g_field_encoding: Vec<RawFieldEncoding>,
    g_field_predictor: Vec<Predictor>,

    h_field_names: Vec<String>,
    h_field_signed: Vec<bool>,
    h_field_encoding: Vec<RawFieldEncoding>,
    h_field_predictor: Vec<Predictor>,
}

/// Pulls the integer inside a single pair of brackets out of a field name, e.g.
/// `"GPS_coord[1]"` -> `Some(1)`. Used to tell which axis a `HomeCoordinate`-predicted
/// GPS field refers to, by reading a field's own `[n]` suffix to resolve per-axis
/// predictor wiring.
fn bracket_index(name: &str) -> Option<usize> {
    let start = name.find('[')?;
    let end = name[start..].find(']')? + start;
    name[start + 1..end].parse().ok()
}

/// Builds one frame type's [`FrameDefinition`] from its parallel name/signed/encoding/
/// predictor lists. A length mismatch invalidates the whole frame type per the header
/// parser's failure policy (§4.3): its frames are then always treated as corrupt, since
/// an empty definition never matches a live column count.
fn build_frame_def(
    names: Vec<String>,
    signed: Vec<bool>,
    raw_encodings: Vec<RawFieldEncoding>,
    predictors: Vec<Predictor>,
    frame_letter: &str,
) -> FrameDefinition {
    if names.is_empty() {
        return FrameDefinition::default();
    }
    if names.len() != signed.len() || names.len() != raw_encodings.len() || names.len() != predictors.len()
    {
        warn!(
            frame = frame_letter,
            names = names.len(),
            signed = signed.len(),
            encodings = raw_encodings.len(),
            predictors = predictors.len(),
            "header field lists have mismatched lengths; frame type disabled"
        );
        return FrameDefinition::default();
    }

    let encodings = resolve_group_encodings(&raw_encodings);
    let fields = izip!(names, signed, encodings, predictors)
        .map(|(name, signed, encoding, predictor)| FieldDefinition {
            name,
            signed,
            nominal_width: encoding.nominal_width(),
            predictor,
            encoding,
        })
        .collect();
    FrameDefinition { fields }
}

fn index_of(fields: &[FieldDefinition], name: &str) -> Option<usize> {
    fields.iter().position(|f| f.name == name)
}

fn build_main_field_indexes(fields: &[FieldDefinition]) -> MainFieldIndexes {
    let mut idx = MainFieldIndexes {
        loop_iteration: index_of(fields, "loopIteration"),
        time: index_of(fields, "time"),
        vbat_latest: index_of(fields, "vbatLatest"),
        amperage_latest: index_of(fields, "amperageLatest"),
        baro_alt: index_of(fields, "BaroAlt"),
        sonar_raw: index_of(fields, "sonarRaw"),
        rssi: index_of(fields, "rssi"),
        ..Default::default()
    };
    for axis in 0..3 {
        idx.pid[0][axis] = index_of(fields, &format!("axisP[{}]", axis));
        idx.pid[1][axis] = index_of(fields, &format!("axisI[{}]", axis));
        idx.pid[2][axis] = index_of(fields, &format!("axisD[{}]", axis));
        idx.mag_adc[axis] = index_of(fields, &format!("magADC[{}]", axis));
        idx.gyro_adc[axis] = index_of(fields, &format!("gyroADC[{}]", axis));
        idx.acc_smooth[axis] = index_of(fields, &format!("accSmooth[{}]", axis));
    }
    for ch in 0..4 {
        idx.rc_command[ch] = index_of(fields, &format!("rcCommand[{}]", ch));
    }
    for m in 0..8 {
        idx.motor[m] = index_of(fields, &format!("motor[{}]", m));
        idx.servo[m] = index_of(fields, &format!("servo[{}]", m));
    }
    idx
}

fn build_gps_field_indexes(fields: &[FieldDefinition]) -> GpsFieldIndexes {
    GpsFieldIndexes {
        time: index_of(fields, "time"),
        num_sat: index_of(fields, "GPS_numSat"),
        coord: [
            index_of(fields, "GPS_coord[0]"),
            index_of(fields, "GPS_coord[1]"),
        ],
        altitude: index_of(fields, "GPS_altitude"),
        speed: index_of(fields, "GPS_speed"),
        ground_course: index_of(fields, "GPS_ground_course"),
    }
}

fn build_gps_home_field_indexes(fields: &[FieldDefinition]) -> GpsHomeFieldIndexes {
    GpsHomeFieldIndexes {
        coord: [
            index_of(fields, "GPS_home[0]"),
            index_of(fields, "GPS_home[1]"),
        ],
    }
}

fn build_slow_field_indexes(fields: &[FieldDefinition]) -> SlowFieldIndexes {
    SlowFieldIndexes {
        flight_mode_flags: index_of(fields, "flightModeFlags"),
        state_flags: index_of(fields, "stateFlags"),
        failsafe_phase: index_of(fields, "failsafePhase"),
    }
}

impl From<HeaderBuilder> for Header {
    fn from(b: HeaderBuilder) -> Self {
        // P frames conventionally omit their own name/signed lists and inherit the I
        // frame's, carrying only their own predictor/encoding lists (real Betaflight
        // logs never emit "Field P name"). Fall back to I's lists when P's are absent.
        let p_names = if b.p_field_names.is_empty() {
            b.i_field_names.clone()
        } else {
            b.p_field_names
        };
        let p_signed = if b.p_field_signed.is_empty() {
            b.i_field_signed.clone()
        } else {
            b.p_field_signed
        };

        let i_def = build_frame_def(
            b.i_field_names,
            b.i_field_signed,
            b.i_field_encoding,
            b.i_field_predictor,
            "I",
        );
        let p_def = build_frame_def(p_names, p_signed, b.p_field_encoding, b.p_field_predictor, "P");
        let s_def = build_frame_def(
            b.s_field_names,
            b.s_field_signed,
            b.s_field_encoding,
            b.s_field_predictor,
            "S",
        );
        let g_def = build_frame_def(
            b.g_field_names,
            b.g_field_signed,
            b.g_field_encoding,
            b.g_field_predictor,
            "G",
        );
        let h_def = build_frame_def(
            b.h_field_names,
            b.h_field_signed,
            b.h_field_encoding,
            b.h_field_predictor,
            "H",
        );

        let mut ip_fields = HashMap::with_capacity(i_def.fields.len());
        for (ix, f) in i_def.fields.iter().enumerate() {
            ip_fields.insert(
                f.name.clone(),
                IPField {
                    name: f.name.clone(),
                    ix,
                    signed: f.signed,
                },
            );
        }

        let main_field_indexes = build_main_field_indexes(&i_def.fields);
        let gps_field_indexes = build_gps_field_indexes(&g_def.fields);
        let gps_home_field_indexes = build_gps_home_field_indexes(&h_def.fields);
        let slow_field_indexes = build_slow_field_indexes(&s_def.fields);

        let (min_throttle, max_throttle) = (
            b.min_throttle.unwrap_or(1000),
            b.max_throttle.unwrap_or(2000),
        );
        let motor_output_range = b.motor_output.unwrap_or((min_throttle, max_throttle));
        let raw_gyro_scale = b.gyro_scale.unwrap_or(0.0);

        let i_interval = b.i_interval.filter(|v| *v > 0).unwrap_or(1) as u32;
        let p_ratio = match (b.p_interval, b.p_denom) {
            (Some(r), _) => Ratio::new(*r.numer() as u32, *r.denom() as u32),
            (None, Some(denom)) if denom > 0 => Ratio::new(1, denom as u32),
            _ => Ratio::new(1, 1),
        };

        let data_version = b.data_version.clone().unwrap_or_default();

        Header {
            product: b.product.unwrap_or_default(),
            board_information: b.board_information,
            craft_name: b.craft_name,
            system_config: SystemConfig {
                min_throttle,
                max_throttle,
                motor_output_range,
                rc_rate: b.rc_rate.unwrap_or(0),
                yaw_rate: b.yaw_rate.unwrap_or(0),
                acc_1g: b.acc_1g.unwrap_or(1),
                raw_gyro_scale,
                gyro_scale: raw_gyro_scale * (PI / 180.0) * 0.000_001,
                vbat_scale: b.vbat_scale.unwrap_or(0),
                vbat_cell_voltage: b.vbat_cell_voltage.unwrap_or(VbatCellVoltage {
                    min: 0,
                    warning: 0,
                    max: 0,
                }),
                vbat_ref: b.vbat_ref.unwrap_or(0),
                current_meter: b
                    .current_meter
                    .map(|(offset, scale)| CurrentMeter { offset, scale })
                    .unwrap_or_default(),
                firmware: b
                    .firmware_type
                    .as_deref()
                    .map(FirmwareKind::from_str)
                    .unwrap_or_default(),
                firmware_revision: b.firmware_revision,
                firmware_date: b.firmware_date,
                data_version,
                main_frame_interval: MainFrameInterval { i_interval, p_ratio },
                pid_values: [
                    b.roll_pid.map(PidValues::from).unwrap_or_default(),
                    b.pitch_pid.map(PidValues::from).unwrap_or_default(),
                    b.yaw_pid.map(PidValues::from).unwrap_or_default(),
                ],
            },
            frame_defs: FrameDefinitions {
                i: i_def,
                p: p_def,
                s: s_def,
                g: g_def,
                h: h_def,
            },
            main_field_indexes,
            gps_field_indexes,
            gps_home_field_indexes,
            slow_field_indexes,
            ip_fields,
            other_headers: b.other_headers,
        }
    }
}

#[derive(Debug)]
pub enum ParseHeadersError<I> {
    Nom(I, ErrorKind),
}

impl<I> ParseError<I> for ParseHeadersError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        ParseHeadersError::Nom(input, kind)
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I> From<nom::error::Error<I>> for ParseHeadersError<I> {
    fn from(err: nom::error::Error<I>) -> Self {
        Self::Nom(err.input, err.code)
    }
}

/// A single `H `-prefixed line. A line whose key is recognized but whose value is
/// malformed is reported via `tracing::warn!` and skipped rather than aborting the whole
/// header; only a line that doesn't start with `H ` at all ends the header section.
fn header_line(input: &[u8]) -> IResult<&[u8], Option<Frame>> {
    if !input.starts_with(b"H ") {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Tag,
        )));
    }
    match parse_header(input) {
        Ok((rest, frame)) => Ok((rest, Some(frame))),
        Err(nom::Err::Incomplete(needed)) => Err(nom::Err::Incomplete(needed)),
        Err(_) => match input.iter().position(|&b| b == b'\n') {
            Some(nl) => {
                warn!(
                    line = %String::from_utf8_lossy(&input[..nl]),
                    "skipping malformed header line"
                );
                Ok((&input[nl + 1..], None))
            }
            None => Err(nom::Err::Error(nom::error::Error::new(
                input,
                ErrorKind::Eof,
            ))),
        },
    }
}

/// Folds every leading `H `-prefixed line into a [`Header`]. Parsing stops at the first
/// byte that doesn't start a recognized header line — conventionally the first frame's
/// type letter — which is returned as the remaining input for `frame::decoder` to
/// continue from.
pub fn parse_headers(input: &[u8]) -> IResult<&[u8], Header, ParseHeadersError<&[u8]>> {
    let (input, builder) = fold_many0(
        header_line,
        HeaderBuilder::default,
        |mut b, header_frame| {
            let header_frame = match header_frame {
                Some(f) => f,
                None => return b,
            };
            match header_frame {
                Frame::Product(v) => b.product = Some(v.to_owned()),
                Frame::DataVersion(v) => b.data_version = Some(v.to_owned()),
                Frame::FirmwareType(v) => b.firmware_type = Some(v.to_owned()),
                Frame::FirmwareRevision(v) => b.firmware_revision = Some(v.to_owned()),
                Frame::FirmwareDate(v) => b.firmware_date = Some(v.to_owned()),
                Frame::IInterval(v) => b.i_interval = Some(v),
                Frame::PInterval(v) => b.p_interval = Some(v),
                Frame::PDenom(v) => b.p_denom = Some(v),
                Frame::MinThrottle(v) => b.min_throttle = Some(v),
                Frame::MaxThrottle(v) => b.max_throttle = Some(v),
                Frame::MotorOutput(lo, hi) => b.motor_output = Some((lo, hi)),
                Frame::RcRate(v) => b.rc_rate = Some(v),
                Frame::YawRate(v) => b.yaw_rate = Some(v),
                Frame::Acc1G(v) => b.acc_1g = Some(v),
                Frame::GyroScale(v) => b.gyro_scale = Some(v),
                Frame::VBatScale(v) => b.vbat_scale = Some(v),
                Frame::VBatCellVoltage(v) => b.vbat_cell_voltage = Some(v),
                Frame::VBatRef(v) => b.vbat_ref = Some(v),
                Frame::CurrentMeter(o, s) => b.current_meter = Some((o, s)),
                Frame::RollPID(v) => b.roll_pid = Some(v),
                Frame::PitchPID(v) => b.pitch_pid = Some(v),
                Frame::YawPID(v) => b.yaw_pid = Some(v),
                Frame::LoopTime(_) => {}

                Frame::FieldIName(v) => b.i_field_names = v.into_iter().map(str::to_owned).collect(),
                Frame::FieldISignedness(v) => b.i_field_signed = v,
                Frame::FieldIEncoding(v) => b.i_field_encoding = v,
                Frame::FieldIPredictor(v) => b.i_field_predictor = v,

                Frame::FieldPName(v) => b.p_field_names = v.into_iter().map(str::to_owned).collect(),
                Frame::FieldPSignedness(v) => b.p_field_signed = v,
                Frame::FieldPEncoding(v) => b.p_field_encoding = v,
                Frame::FieldPPredictor(v) => b.p_field_predictor = v,

                Frame::FieldSName(v) => b.s_field_names = v.into_iter().map(str::to_owned).collect(),
                Frame::FieldSSignedness(v) => b.s_field_signed = v,
                Frame::FieldSEncoding(v) => b.s_field_encoding = v,
                Frame::FieldSPredictor(v) => b.s_field_predictor = v,

                Frame::FieldGName(v) => b.g_field_names = v.into_iter().map(str::to_owned).collect(),
                Frame::FieldGSignedness(v) => b.g_field_signed = v,
                Frame::FieldGEncoding(v) => b.g_field_encoding = v,
                Frame::FieldGPredictor(v) => b.g_field_predictor = v,

                Frame::FieldHName(v) => b.h_field_names = v.into_iter().map(str::to_owned).collect(),
                Frame::FieldHSignedness(v) => b.h_field_signed = v,
                Frame::FieldHEncoding(v) => b.h_field_encoding = v,
                Frame::FieldHPredictor(v) => b.h_field_predictor = v,

                Frame::UnkownHeader(name, value) => {
                    if name == "board_information" {
                        b.board_information = Some(value.to_owned());
                    } else if name == "Craft name" {
                        b.craft_name = Some(value.to_owned());
                    } else {
                        b.other_headers.insert(name.to_owned(), value.to_owned());
                    }
                }
            };
            b
        },
    )(input)
    .map_err(nom::Err::convert)?;

    Ok((input, builder.into()))
}

pub(crate) fn home_predictor_axis(name: &str) -> Option<usize> {
    bracket_index(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Header {
        let (rest, header) = parse_headers(data).unwrap();
        assert_eq!(rest, b"I");
        header
    }

    #[test]
    fn minimal_header_builds_with_defaults() {
        let header = parse(b"H Field I name:loopIteration,time\nI");
        assert_eq!(header.frame_defs.i.len(), 2);
        assert_eq!(header.main_field_indexes.loop_iteration, Some(0));
        assert_eq!(header.main_field_indexes.time, Some(1));
        assert_eq!(header.ip_fields["time"].ix, 1);
    }

    #[test]
    fn p_frame_inherits_i_frame_names() {
        let header = parse(
            b"H Field I name:loopIteration,time\n\
              H Field I predictor:0,0\n\
              H Field I encoding:1,1\n\
              H Field P predictor:1,1\n\
              H Field P encoding:0,0\n\
              I",
        );
        assert_eq!(header.frame_defs.p.len(), 2);
        assert_eq!(header.frame_defs.p.fields[0].name, "loopIteration");
        assert_eq!(header.frame_defs.p.fields[1].predictor, Predictor::Previous);
    }

    #[test]
    fn mismatched_field_lists_disable_the_frame_type() {
        let header = parse(
            b"H Field S name:flightModeFlags,stateFlags\n\
              H Field S predictor:0\n\
              I",
        );
        assert!(header.frame_defs.s.is_empty());
    }

    #[test]
    fn gps_home_coordinate_axis_from_bracket_suffix() {
        assert_eq!(bracket_index("GPS_home[0]"), Some(0));
        assert_eq!(bracket_index("GPS_home[1]"), Some(1));
        assert_eq!(bracket_index("time"), None);
    }

    #[test]
    fn gyro_scale_is_converted_to_radians_per_microsecond() {
        let header = parse(b"H gyro.scale:0.0122\nH Field I name:loopIteration\nI");
        assert!((header.system_config.raw_gyro_scale - 0.0122).abs() < 1e-6);
        assert!(header.system_config.gyro_scale > 0.0);
    }

    #[test]
    fn malformed_header_value_is_skipped_without_aborting_the_header() {
        let header = parse(b"H gyro.scale:not-a-number\nH Field I name:loopIteration\nI");
        assert_eq!(header.system_config.raw_gyro_scale, 0.0);
        assert_eq!(header.frame_defs.i.len(), 1);
    }
}
