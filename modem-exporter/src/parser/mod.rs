//! Status payload parsing.
//!
//! Each device family has a fixed template. A payload either yields a
//! snapshot with every required statistic, or an error naming the first field
//! that could not be read. Fields the template does not know are ignored so
//! firmware additions do not break parsing.

pub mod hilink;
pub mod surfboard;
pub mod zte;

use crate::error::ParseError;
use crate::payload::{DeviceFamily, RawPayload};
use crate::snapshot::StatSnapshot;

/// Parse a raw payload with the parser of its device family.
pub fn parse(payload: RawPayload) -> Result<StatSnapshot, ParseError> {
    match payload.family() {
        DeviceFamily::HuaweiHilink => hilink::parse(&payload),
        DeviceFamily::ZteGoform => zte::parse(&payload),
        DeviceFamily::ArrisSurfboard => surfboard::parse(&payload),
    }
}

/// Fetch a section as UTF-8 text.
fn section_text<'a>(payload: &'a RawPayload, name: &str) -> Result<&'a str, ParseError> {
    let body = payload
        .section(name)
        .ok_or(ParseError::UnexpectedFormat)?;
    std::str::from_utf8(body).map_err(|_| ParseError::UnexpectedFormat)
}

/// A field that must be present.
fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ParseError> {
    value.map(str::trim).ok_or_else(|| ParseError::missing(name))
}

/// A required plain number such as a byte counter.
fn number(value: Option<&str>, name: &str) -> Result<f64, ParseError> {
    let raw = required(value, name)?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::malformed(name)),
    }
}

/// A required measurement that may carry a unit or a bound, e.g. `-98dBm`,
/// `40.9 dB` or `>=-51dBm`.
fn measure(value: Option<&str>, name: &str) -> Result<f64, ParseError> {
    let raw = required(value, name)?;
    parse_measure(raw).ok_or_else(|| ParseError::malformed(name))
}

/// Extract the leading numeric part of a measurement string.
pub fn parse_measure(raw: &str) -> Option<f64> {
    let trimmed = raw
        .trim()
        .trim_start_matches(['>', '<', '='])
        .trim_start();

    let end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());

    trimmed[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}
