use nom::{
    branch::alt,
    bytes::streaming::{is_not, tag, take_until},
    combinator::map,
    combinator::map_res,
    error::ParseError,
    multi::separated_list0,
    IResult,
};
use num_rational::Ratio;

use crate::stream::predictor::Predictor;

pub(crate) mod decoder;
pub(crate) mod encoding;
pub mod event;
pub(crate) mod header;

/// A field's encoding as declared by a header line, before group encodings have been
/// told how many columns they span (that happens once `stream::header` knows how many
/// field names preceded a given `Tag8_8SVB`/`Tag2_3S32`/`Tag8_4S16` column).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RawFieldEncoding {
    SignedVB,
    UnsignedVB,
    Negative14BitVB,
    Tag8_8SVB,
    Tag2_3S32,
    Tag8_4S16,
    Null,
    EliasDeltaU32,
    EliasDeltaS32,
}

impl Default for RawFieldEncoding {
    fn default() -> Self {
        RawFieldEncoding::Null
    }
}

/// A field's encoding with group width resolved, as stored in a [`super::header::Header`]'s
/// [`super::header::FieldDefinition`] list. The `usize` on group variants is the number of
/// consecutive columns sharing that group's single on-wire encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FieldEncoding {
    SignedVB,
    UnsignedVB,
    Negative14BitVB,
    Tag8_8SVB(usize),
    Tag2_3S32(usize),
    Tag8_4S16(usize),
    Null,
    EliasDeltaU32,
    EliasDeltaS32,
}

impl Default for FieldEncoding {
    fn default() -> Self {
        FieldEncoding::Null
    }
}

fn i16_from_dec(bytes: &[u8]) -> Result<i16, ()> {
    std::str::from_utf8(bytes)
        .map_err(|_| ())?
        .parse()
        .map_err(|_| ())
}

fn u16_from_dec(bytes: &[u8]) -> Result<u16, ()> {
    std::str::from_utf8(bytes)
        .map_err(|_| ())?
        .parse()
        .map_err(|_| ())
}

fn u32_from_dec(bytes: &[u8]) -> Result<u32, ()> {
    std::str::from_utf8(bytes)
        .map_err(|_| ())?
        .parse()
        .map_err(|_| ())
}

pub(crate) fn str_from_bytes(bytes: &[u8]) -> Result<&str, ()> {
    std::str::from_utf8(bytes).map_err(|_| ())
}

fn bool_from_dec(bytes: &[u8]) -> Result<bool, ()> {
    u16_from_dec(bytes).map(|i| i != 0)
}

/// Maps a header's numeric encoding tag to [`RawFieldEncoding`]. Tags 10/11 are read as
/// Elias-delta here (see `frame::encoding`'s module doc for why this departs from the
/// tag these numbers carry in shipping firmware).
fn field_encoding_from_dec(bytes: &[u8]) -> Result<RawFieldEncoding, ()> {
    let i = u16_from_dec(bytes)?;
    Ok(match i {
        0 => RawFieldEncoding::SignedVB,
        1 => RawFieldEncoding::UnsignedVB,
        3 => RawFieldEncoding::Negative14BitVB,
        6 => RawFieldEncoding::Tag8_8SVB,
        7 => RawFieldEncoding::Tag2_3S32,
        8 => RawFieldEncoding::Tag8_4S16,
        9 => RawFieldEncoding::Null,
        10 => RawFieldEncoding::EliasDeltaU32,
        11 => RawFieldEncoding::EliasDeltaS32,
        _ => return Err(()),
    })
}

fn field_predictor_from_dec(bytes: &[u8]) -> Result<Predictor, ()> {
    let i = u16_from_dec(bytes)?;
    Ok(match i {
        0 => Predictor::None,
        1 => Predictor::Previous,
        2 => Predictor::StraightLine,
        3 => Predictor::Average2,
        4 => Predictor::MinThrottle,
        5 => Predictor::Motor0,
        6 => Predictor::Increment,
        7 => Predictor::HomeCoordinate,
        8 => Predictor::Around1500,
        9 => Predictor::VBatRef,
        10 => Predictor::LastMainFrameTime,
        11 => Predictor::MinMotor,
        _ => return Err(()),
    })
}

pub(crate) fn parse_str(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(take_until("\n"), str_from_bytes)(input)
}

pub(crate) fn parse_i16_dec(input: &[u8]) -> IResult<&[u8], i16> {
    map_res(take_until("\n"), i16_from_dec)(input)
}

fn parse_u16_ratio_dec(input: &[u8]) -> IResult<&[u8], Ratio<u16>> {
    let (input, numer) = map_res(take_until("/"), u16_from_dec)(input)?;
    let (input, _) = tag("/")(input)?;
    let (input, denom) = map_res(take_until("\n"), u16_from_dec)(input)?;
    Ok((input, Ratio::new(numer, denom)))
}

pub(crate) fn parse_u16_dec(input: &[u8]) -> IResult<&[u8], u16> {
    map_res(take_until("\n"), u16_from_dec)(input)
}

pub(crate) fn parse_u32_dec(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(take_until("\n"), u32_from_dec)(input)
}

pub(crate) fn parse_u16_ratio_dec_or_inverse_dec(input: &[u8]) -> IResult<&[u8], Ratio<u16>> {
    alt((
        parse_u16_ratio_dec,
        map(parse_u16_dec, |denom| Ratio::new(1, denom)),
    ))(input)
}

fn parse_list<'a, F, T, E: ParseError<&'a [u8]>>(
    input: &'a [u8],
    parser: F,
) -> IResult<&'a [u8], Vec<T>>
where
    F: Fn(&'a [u8]) -> Result<T, E>,
{
    separated_list0(tag(","), map_res(is_not(",\n"), parser))(input)
}

pub(crate) fn parse_str_list(input: &[u8]) -> IResult<&[u8], Vec<&str>> {
    parse_list(input, str_from_bytes)
}

pub(crate) fn parse_dec_as_bool_list(input: &[u8]) -> IResult<&[u8], Vec<bool>> {
    parse_list(input, bool_from_dec)
}

pub(crate) fn parse_dec_as_encoding_list(input: &[u8]) -> IResult<&[u8], Vec<RawFieldEncoding>> {
    parse_list(input, field_encoding_from_dec)
}

pub(crate) fn parse_dec_as_predictor_list(input: &[u8]) -> IResult<&[u8], Vec<Predictor>> {
    parse_list(input, field_predictor_from_dec)
}

/// Widens a [`RawFieldEncoding`] into a [`FieldEncoding`] once the number of columns that
/// share a group encoding is known, folding consecutive identical group tags together.
pub(crate) fn resolve_group_encodings(raw: &[RawFieldEncoding]) -> Vec<FieldEncoding> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            RawFieldEncoding::SignedVB => {
                out.push(FieldEncoding::SignedVB);
                i += 1;
            }
            RawFieldEncoding::UnsignedVB => {
                out.push(FieldEncoding::UnsignedVB);
                i += 1;
            }
            RawFieldEncoding::Negative14BitVB => {
                out.push(FieldEncoding::Negative14BitVB);
                i += 1;
            }
            RawFieldEncoding::Null => {
                out.push(FieldEncoding::Null);
                i += 1;
            }
            RawFieldEncoding::EliasDeltaU32 => {
                out.push(FieldEncoding::EliasDeltaU32);
                i += 1;
            }
            RawFieldEncoding::EliasDeltaS32 => {
                out.push(FieldEncoding::EliasDeltaS32);
                i += 1;
            }
            RawFieldEncoding::Tag8_8SVB => {
                let run = run_length(raw, i, RawFieldEncoding::Tag8_8SVB).min(8);
                for _ in 0..run {
                    out.push(FieldEncoding::Tag8_8SVB(run));
                }
                i += run;
            }
            RawFieldEncoding::Tag2_3S32 => {
                let run = run_length(raw, i, RawFieldEncoding::Tag2_3S32).min(3);
                for _ in 0..run {
                    out.push(FieldEncoding::Tag2_3S32(run));
                }
                i += run;
            }
            RawFieldEncoding::Tag8_4S16 => {
                let run = run_length(raw, i, RawFieldEncoding::Tag8_4S16).min(4);
                for _ in 0..run {
                    out.push(FieldEncoding::Tag8_4S16(run));
                }
                i += run;
            }
        }
    }
    out
}

fn run_length(raw: &[RawFieldEncoding], start: usize, kind: RawFieldEncoding) -> usize {
    raw[start..].iter().take_while(|&&e| e == kind).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_tag8_8svb_run_of_three_columns() {
        let raw = [
            RawFieldEncoding::Tag8_8SVB,
            RawFieldEncoding::Tag8_8SVB,
            RawFieldEncoding::Tag8_8SVB,
            RawFieldEncoding::SignedVB,
        ];
        let resolved = resolve_group_encodings(&raw);
        assert_eq!(
            resolved,
            vec![
                FieldEncoding::Tag8_8SVB(3),
                FieldEncoding::Tag8_8SVB(3),
                FieldEncoding::Tag8_8SVB(3),
                FieldEncoding::SignedVB,
            ]
        );
    }

    #[test]
    fn caps_tag2_3s32_runs_at_three_columns() {
        let raw = [RawFieldEncoding::Tag2_3S32; 6];
        let resolved = resolve_group_encodings(&raw);
        assert_eq!(resolved.len(), 6);
        assert!(resolved
            .iter()
            .all(|e| matches!(e, FieldEncoding::Tag2_3S32(3))));
    }
}
