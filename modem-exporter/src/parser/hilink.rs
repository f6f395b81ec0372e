//! Huawei HiLink XML status parsing.
//!
//! Every endpoint answers with `<response>...</response>` on success. The
//! three sections fetched per poll map to the structs below; only the fields
//! named there are read.

use serde::Deserialize;

use super::{measure, number, required, section_text};
use crate::error::ParseError;
use crate::payload::RawPayload;
use crate::snapshot::{DeviceInfo, Sample, Stat, StatSnapshot};

/// `/api/device/information`
pub const DEVICE_INFORMATION: &str = "device_information";
/// `/api/device/signal`
pub const SIGNAL: &str = "signal";
/// `/api/monitoring/traffic-statistics`
pub const TRAFFIC_STATISTICS: &str = "traffic_statistics";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceInformation {
    device_name: Option<String>,
    software_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Signal {
    rsrp: Option<String>,
    rsrq: Option<String>,
    rssi: Option<String>,
    sinr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrafficStatistics {
    current_connect_time: Option<String>,
    current_upload: Option<String>,
    current_download: Option<String>,
    current_upload_rate: Option<String>,
    current_download_rate: Option<String>,
    total_upload: Option<String>,
    total_download: Option<String>,
    total_connect_time: Option<String>,
}

pub(crate) fn parse(payload: &RawPayload) -> Result<StatSnapshot, ParseError> {
    let info: DeviceInformation = response(section_text(payload, DEVICE_INFORMATION)?)?;
    let signal: Signal = response(section_text(payload, SIGNAL)?)?;
    let traffic: TrafficStatistics = response(section_text(payload, TRAFFIC_STATISTICS)?)?;

    let device = DeviceInfo {
        model: required(info.device_name.as_deref(), "DeviceName")?.to_string(),
        firmware: required(info.software_version.as_deref(), "SoftwareVersion")?.to_string(),
    };

    let t = &traffic;
    let samples = vec![
        Sample::new(
            Stat::UplinkRate,
            number(t.current_upload_rate.as_deref(), "CurrentUploadRate")?,
        ),
        Sample::new(
            Stat::DownlinkRate,
            number(t.current_download_rate.as_deref(), "CurrentDownloadRate")?,
        ),
        transferred(
            "session",
            "upload",
            number(t.current_upload.as_deref(), "CurrentUpload")?,
        ),
        transferred(
            "session",
            "download",
            number(t.current_download.as_deref(), "CurrentDownload")?,
        ),
        transferred(
            "total",
            "upload",
            number(t.total_upload.as_deref(), "TotalUpload")?,
        ),
        transferred(
            "total",
            "download",
            number(t.total_download.as_deref(), "TotalDownload")?,
        ),
        Sample::new(
            Stat::ConnectionUptime,
            number(t.current_connect_time.as_deref(), "CurrentConnectTime")?,
        ),
        Sample::new(
            Stat::ConnectDuration,
            number(t.total_connect_time.as_deref(), "TotalConnectTime")?,
        )
        .with_label("period", "total"),
        Sample::new(Stat::Snr, measure(signal.sinr.as_deref(), "sinr")?),
        Sample::new(Stat::Rsrp, measure(signal.rsrp.as_deref(), "rsrp")?),
        Sample::new(Stat::Rsrq, measure(signal.rsrq.as_deref(), "rsrq")?),
        Sample::new(Stat::Rssi, measure(signal.rssi.as_deref(), "rssi")?),
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

/// Deserialize a `<response>` document.
fn response<T: for<'de> Deserialize<'de>>(xml: &str) -> Result<T, ParseError> {
    if root_element(xml) != Some("response") {
        return Err(ParseError::UnexpectedFormat);
    }
    quick_xml::de::from_str(xml).map_err(|_| ParseError::UnexpectedFormat)
}

/// Name of the document's root element, skipping the XML declaration and
/// comments.
pub(crate) fn root_element(xml: &str) -> Option<&str> {
    let mut rest = xml.trim_start_matches('\u{feff}').trim_start();

    loop {
        if let Some(after) = rest.strip_prefix("<?") {
            rest = after.split_once("?>")?.1.trim_start();
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.split_once("-->")?.1.trim_start();
        } else {
            break;
        }
    }

    let tag = rest.strip_prefix('<')?;
    let end = tag
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag.len());
    let name = &tag[..end];
    (!name.is_empty()).then_some(name)
}
