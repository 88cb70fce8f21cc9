use nom::{
    bytes::streaming::{tag, take_until},
    combinator::{map, map_res, opt},
    IResult,
};
use num_rational::Ratio;

use crate::stream::predictor::Predictor;

use super::{
    parse_dec_as_bool_list, parse_dec_as_encoding_list, parse_dec_as_predictor_list, parse_i16_dec,
    parse_str, parse_str_list, parse_u16_dec, parse_u16_ratio_dec_or_inverse_dec, parse_u32_dec,
    RawFieldEncoding,
};

/// One parsed `H <key>:<value>` line. `HeaderParser` folds a stream of these into a
/// `HeaderBuilder` (see `stream::header`); unrecognized keys fall through to
/// `UnknownHeader` rather than failing the whole parse.
#[derive(Debug)]
pub(crate) enum Frame<'f> {
    Product(&'f str),
    DataVersion(&'f str),
    FieldIName(Vec<&'f str>),
    FieldISignedness(Vec<bool>),
    FieldIEncoding(Vec<RawFieldEncoding>),
    FieldIPredictor(Vec<Predictor>),
    FieldPName(Vec<&'f str>),
    FieldPSignedness(Vec<bool>),
    FieldPEncoding(Vec<RawFieldEncoding>),
    FieldPPredictor(Vec<Predictor>),
    FieldSName(Vec<&'f str>),
    FieldSSignedness(Vec<bool>),
    FieldSEncoding(Vec<RawFieldEncoding>),
    FieldSPredictor(Vec<Predictor>),
    FieldGName(Vec<&'f str>),
    FieldGSignedness(Vec<bool>),
    FieldGEncoding(Vec<RawFieldEncoding>),
    FieldGPredictor(Vec<Predictor>),
    FieldHName(Vec<&'f str>),
    FieldHSignedness(Vec<bool>),
    FieldHEncoding(Vec<RawFieldEncoding>),
    FieldHPredictor(Vec<Predictor>),
    FirmwareType(&'f str),
    FirmwareRevision(&'f str),
    FirmwareDate(&'f str),
    IInterval(i16),
    PInterval(Ratio<u16>),
    PDenom(u16),
    MinThrottle(u16),
    MaxThrottle(u16),
    MotorOutput(u16, u16),
    RcRate(u16),
    YawRate(u16),
    Acc1G(u16),
    GyroScale(f32),
    VBatScale(u8),
    VBatCellVoltage(VBatCellVoltage),
    VBatRef(u16),
    CurrentMeter(i16, i16),
    RollPID(PID),
    PitchPID(PID),
    YawPID(PID),
    LoopTime(u32),

    UnkownHeader(&'f str, &'f str),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VBatCellVoltage {
    pub min: u16,
    pub warning: u16,
    pub max: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PID {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub ff: Option<f32>,
}

fn parse_u16_until_comma(input: &[u8]) -> IResult<&[u8], u16> {
    map_res(take_until(","), |b: &[u8]| {
        std::str::from_utf8(b)
            .map_err(|_| ())
            .and_then(|s| s.parse::<u16>().map_err(|_| ()))
    })(input)
}

fn parse_i16_until_comma(input: &[u8]) -> IResult<&[u8], i16> {
    map_res(take_until(","), |b: &[u8]| {
        std::str::from_utf8(b)
            .map_err(|_| ())
            .and_then(|s| s.parse::<i16>().map_err(|_| ()))
    })(input)
}

fn parse_f32_until_comma_or_nl(input: &[u8]) -> IResult<&[u8], f32> {
    map_res(nom::bytes::streaming::is_not(",\n"), |b: &[u8]| {
        std::str::from_utf8(b)
            .map_err(|_| ())
            .and_then(|s| s.parse::<f32>().map_err(|_| ()))
    })(input)
}

fn parse_f32_dec(input: &[u8]) -> IResult<&[u8], f32> {
    map_res(take_until("\n"), |b: &[u8]| {
        std::str::from_utf8(b)
            .map_err(|_| ())
            .and_then(|s| s.parse::<f32>().map_err(|_| ()))
    })(input)
}

fn parse_vbat_cell_voltage(input: &[u8]) -> IResult<&[u8], VBatCellVoltage> {
    let (input, min) = parse_u16_until_comma(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, warning) = parse_u16_until_comma(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, max) = parse_u16_dec(input)?;
    Ok((input, VBatCellVoltage { min, warning, max }))
}

fn parse_motor_output(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, low) = parse_u16_until_comma(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, high) = parse_u16_dec(input)?;
    Ok((input, (low, high)))
}

fn parse_current_meter(input: &[u8]) -> IResult<&[u8], (i16, i16)> {
    let (input, offset) = parse_i16_until_comma(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, scale) = parse_i16_dec(input)?;
    Ok((input, (offset, scale)))
}

/// PID triples are `P,I,D`; newer Betaflight builds append a fourth feed-forward term.
fn parse_pid(input: &[u8]) -> IResult<&[u8], PID> {
    let (input, p) = parse_f32_until_comma_or_nl(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, i) = parse_f32_until_comma_or_nl(input)?;
    let (input, _) = tag(",")(input)?;
    let (input, d) = parse_f32_until_comma_or_nl(input)?;
    let (input, ff) = opt(nom::sequence::preceded(tag(","), parse_f32_dec))(input)?;
    Ok((input, PID { p, i, d, ff }))
}

pub(crate) fn parse_header(input: &[u8]) -> IResult<&[u8], Frame> {
    let (input, _) = tag("H ")(input)?;
    let (input, name) = map_res(take_until(":"), super::str_from_bytes)(input)?;
    let (input, _) = tag(":")(input)?;

    let (input, header_frame) = match name {
        "Product" => map(parse_str, Frame::Product)(input),
        "Data version" => map(parse_str, Frame::DataVersion)(input),
        "Firmware type" => map(parse_str, Frame::FirmwareType)(input),
        "Firmware revision" => map(parse_str, Frame::FirmwareRevision)(input),
        "Firmware date" => map(parse_str, Frame::FirmwareDate)(input),
        "I interval" => map(parse_i16_dec, Frame::IInterval)(input),
        "P interval" => map(parse_u16_ratio_dec_or_inverse_dec, Frame::PInterval)(input),
        "P denom" | "P ratio" => map(parse_u16_dec, Frame::PDenom)(input),
        "Field I name" => map(parse_str_list, Frame::FieldIName)(input),
        "Field I signed" => map(parse_dec_as_bool_list, Frame::FieldISignedness)(input),
        "Field I encoding" => map(parse_dec_as_encoding_list, Frame::FieldIEncoding)(input),
        "Field I predictor" => map(parse_dec_as_predictor_list, Frame::FieldIPredictor)(input),
        "Field P name" => map(parse_str_list, Frame::FieldPName)(input),
        "Field P signed" => map(parse_dec_as_bool_list, Frame::FieldPSignedness)(input),
        "Field P encoding" => map(parse_dec_as_encoding_list, Frame::FieldPEncoding)(input),
        "Field P predictor" => map(parse_dec_as_predictor_list, Frame::FieldPPredictor)(input),
        "Field S name" => map(parse_str_list, Frame::FieldSName)(input),
        "Field S signed" => map(parse_dec_as_bool_list, Frame::FieldSSignedness)(input),
        "Field S encoding" => map(parse_dec_as_encoding_list, Frame::FieldSEncoding)(input),
        "Field S predictor" => map(parse_dec_as_predictor_list, Frame::FieldSPredictor)(input),
        "Field G name" => map(parse_str_list, Frame::FieldGName)(input),
        "Field G signed" => map(parse_dec_as_bool_list, Frame::FieldGSignedness)(input),
        "Field G encoding" => map(parse_dec_as_encoding_list, Frame::FieldGEncoding)(input),
        "Field G predictor" => map(parse_dec_as_predictor_list, Frame::FieldGPredictor)(input),
        "Field H name" => map(parse_str_list, Frame::FieldHName)(input),
        "Field H signed" => map(parse_dec_as_bool_list, Frame::FieldHSignedness)(input),
        "Field H encoding" => map(parse_dec_as_encoding_list, Frame::FieldHEncoding)(input),
        "Field H predictor" => map(parse_dec_as_predictor_list, Frame::FieldHPredictor)(input),
        "minthrottle" => map(parse_u16_dec, Frame::MinThrottle)(input),
        "maxthrottle" => map(parse_u16_dec, Frame::MaxThrottle)(input),
        "motorOutput" => map(parse_motor_output, |(l, h)| Frame::MotorOutput(l, h))(input),
        "rcRate" => map(parse_u16_dec, Frame::RcRate)(input),
        "yaw_rate" => map(parse_u16_dec, Frame::YawRate)(input),
        "acc_1G" => map(parse_u16_dec, Frame::Acc1G)(input),
        "gyro.scale" | "gyro_scale" => map(parse_f32_dec, Frame::GyroScale)(input),
        "vbatscale" => map(
            map_res(parse_u16_dec, |v| u8::try_from(v).map_err(|_| ())),
            Frame::VBatScale,
        )(input),
        "vbatcellvoltage" => map(parse_vbat_cell_voltage, Frame::VBatCellVoltage)(input),
        "vbatref" => map(parse_u16_dec, Frame::VBatRef)(input),
        "currentMeter" => map(parse_current_meter, |(o, s)| Frame::CurrentMeter(o, s))(input),
        "rollPID" => map(parse_pid, Frame::RollPID)(input),
        "pitchPID" => map(parse_pid, Frame::PitchPID)(input),
        "yawPID" => map(parse_pid, Frame::YawPID)(input),
        "looptime" => map(parse_u32_dec, Frame::LoopTime)(input),
        name => map(parse_str, |v| Frame::UnkownHeader(name, v))(input),
    }?;

    let (input, _) = tag("\n")(input)?;
    Ok((input, header_frame))
}
