//! ZTE goform JSON status parsing.
//!
//! `goform_get_cmd_process` answers with one flat JSON object holding the
//! requested fields. Values are usually strings, occasionally bare numbers.

use serde_json::{Map, Value};

use super::{measure, number, required, section_text};
use crate::error::ParseError;
use crate::payload::RawPayload;
use crate::snapshot::{DeviceInfo, Sample, Stat, StatSnapshot};

/// `/goform/goform_get_cmd_process`
pub const STATUS: &str = "status";

/// Fields requested from the router in one `multi_data` call.
pub const FIELDS: &[&str] = &[
    "loginfo",
    "hardware_version",
    "wa_inner_version",
    "realtime_tx_thrpt",
    "realtime_rx_thrpt",
    "realtime_tx_bytes",
    "realtime_rx_bytes",
    "realtime_time",
    "monthly_tx_bytes",
    "monthly_rx_bytes",
    "lte_snr",
    "lte_rsrp",
    "lte_rsrq",
    "lte_rssi",
];

pub(crate) fn parse(payload: &RawPayload) -> Result<StatSnapshot, ParseError> {
    let body = section_text(payload, STATUS)?;
    let map = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => return Err(ParseError::UnexpectedFormat),
    };

    let device = DeviceInfo {
        model: text(&map, "hardware_version")?,
        firmware: text(&map, "wa_inner_version")?,
    };

    let samples = vec![
        Sample::new(Stat::UplinkRate, count(&map, "realtime_tx_thrpt")?),
        Sample::new(Stat::DownlinkRate, count(&map, "realtime_rx_thrpt")?),
        transferred("session", "upload", count(&map, "realtime_tx_bytes")?),
        transferred("session", "download", count(&map, "realtime_rx_bytes")?),
        transferred("month", "upload", count(&map, "monthly_tx_bytes")?),
        transferred("month", "download", count(&map, "monthly_rx_bytes")?),
        Sample::new(Stat::ConnectionUptime, count(&map, "realtime_time")?),
        Sample::new(Stat::Snr, signal(&map, "lte_snr")?),
        Sample::new(Stat::Rsrp, signal(&map, "lte_rsrp")?),
        Sample::new(Stat::Rsrq, signal(&map, "lte_rsrq")?),
        Sample::new(Stat::Rssi, signal(&map, "lte_rssi")?),
    ];

    Ok(StatSnapshot::new(
        payload.family(),
        payload.captured_at(),
        device,
        samples,
    ))
}

fn transferred(period: &str, direction: &str, bytes: f64) -> Sample {
    Sample::new(Stat::TransferredBytes, bytes)
        .with_label("period", period)
        .with_label("direction", direction)
}

/// Raw text of a field. Numbers are rendered back to text; any other JSON
/// type cannot hold a statistic.
fn field<'a>(
    map: &'a Map<String, Value>,
    name: &str,
) -> Result<Option<std::borrow::Cow<'a, str>>, ParseError> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str().into())),
        Some(Value::Number(n)) => Ok(Some(n.to_string().into())),
        Some(_) => Err(ParseError::malformed(name)),
    }
}

fn text(map: &Map<String, Value>, name: &str) -> Result<String, ParseError> {
    Ok(required(field(map, name)?.as_deref(), name)?.to_string())
}

fn count(map: &Map<String, Value>, name: &str) -> Result<f64, ParseError> {
    number(field(map, name)?.as_deref(), name)
}

fn signal(map: &Map<String, Value>, name: &str) -> Result<f64, ParseError> {
    measure(field(map, name)?.as_deref(), name)
}
