//! Arris SURFboard HTML status parsing.
//!
//! The status pages are static HTML tables. Rows are located by the table
//! heading and read cell by cell; the layout is stable across the SB8200
//! firmware line.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{measure, number, required, section_text};
use crate::error::ParseError;
use crate::payload::RawPayload;
use crate::snapshot::{DeviceInfo, Sample, Stat, StatSnapshot};

/// `/cmconnectionstatus.html`
pub const CONNECTION_STATUS: &str = "connection_status";
/// `/cmswinfo.html`
pub const SOFTWARE_INFO: &str = "software_info";

const DOWNSTREAM_HEADING: &str = "Downstream Bonded Channels";
const UPSTREAM_HEADING: &str = "Upstream Bonded Channels";

static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("valid regex"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)id=["']thisModelNumberIs["'][^>]*>\s*([^<]+?)\s*<"#).expect("valid regex")
});
static UPTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s*days?\s+(\d+)h:(\d+)m:(\d+)(?:\.\d+)?s").expect("valid regex")
});

pub(crate) fn parse(payload: &RawPayload) -> Result<StatSnapshot, ParseError> {
    let status = section_text(payload, CONNECTION_STATUS)?;
    let info = section_text(payload, SOFTWARE_INFO)?;

    let downstream =
        table_after(status, DOWNSTREAM_HEADING).ok_or(ParseError::UnexpectedFormat)?;
    let upstream = table_after(status, UPSTREAM_HEADING).ok_or(ParseError::UnexpectedFormat)?;

    let mut samples = Vec::new();

    // Channel ID, Lock Status, Modulation, Frequency, Power, SNR/MER,
    // Corrected, Uncorrectables
    for cells in rows(downstream) {
        if cells.len() < 8 || !is_locked(&cells[1]) {
            continue;
        }
        let channel = cells[0].as_str();
        let field = |name: &str| format!("downstream channel {} {}", channel, name);

        samples.push(
            Sample::new(Stat::Snr, measure(Some(cells[5].as_str()), &field("snr"))?)
                .with_label("channel", channel),
        );
        samples.push(
            Sample::new(
                Stat::ChannelPower,
                measure(Some(cells[4].as_str()), &field("power"))?,
            )
            .with_label("direction", "downstream")
            .with_label("channel", channel),
        );
        samples.push(
            Sample::new(
                Stat::CorrectedCodewords,
                number(Some(cells[6].as_str()), &field("corrected"))?,
            )
            .with_label("channel", channel),
        );
        samples.push(
            Sample::new(
                Stat::UncorrectableCodewords,
                number(Some(cells[7].as_str()), &field("uncorrectables"))?,
            )
            .with_label("channel", channel),
        );
    }

    if samples.is_empty() {
        return Err(ParseError::missing("locked downstream channel"));
    }

    // Channel, Channel ID, Lock Status, US Channel Type, Frequency, Width,
    // Power
    for cells in rows(upstream) {
        if cells.len() < 7 || !is_locked(&cells[2]) {
            continue;
        }
        let channel = cells[1].as_str();
        let name = format!("upstream channel {} power", channel);

        samples.push(
            Sample::new(Stat::ChannelPower, measure(Some(cells[6].as_str()), &name)?)
                .with_label("direction", "upstream")
                .with_label("channel", channel),
        );
    }

    let properties = properties(info);
    let uptime = required(properties.get("Up Time").map(String::as_str), "Up Time")?;
    samples.push(Sample::new(
        Stat::ConnectionUptime,
        parse_uptime(uptime).ok_or_else(|| ParseError::malformed("Up Time"))?,
    ));

    let model = MODEL
        .captures(info)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    let device = DeviceInfo {
        model: required(model, "thisModelNumberIs")?.to_string(),
        firmware: required(
            properties.get("Software Version").map(String::as_str),
            "Software Version",
        )?
        .to_string(),
    };

    Ok(StatSnapshot::new(
        payload.family(),
        payload.captured_at(),
        device,
        samples,
    ))
}

fn is_locked(cell: &str) -> bool {
    cell.eq_ignore_ascii_case("locked")
}

/// The HTML from a table heading to the end of its table.
fn table_after<'a>(html: &'a str, heading: &str) -> Option<&'a str> {
    let start = html.find(heading)?;
    let rest = &html[start..];
    let end = rest.find("</table>").unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Text content of every data cell, row by row. Rows whose first cell is not
/// a number are headings.
fn rows(table: &str) -> impl Iterator<Item = Vec<String>> + '_ {
    ROW.captures_iter(table)
        .map(|row| cells(row.get(1).map_or("", |m| m.as_str())))
        .filter(|cells| {
            cells
                .first()
                .is_some_and(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()))
        })
}

fn cells(row: &str) -> Vec<String> {
    CELL.captures_iter(row)
        .map(|c| {
            let inner = c.get(1).map_or("", |m| m.as_str());
            TAG.replace_all(inner, "")
                .replace("&nbsp;", " ")
                .trim()
                .to_string()
        })
        .collect()
}

/// Two-column label/value rows of the software information page.
fn properties(html: &str) -> HashMap<String, String> {
    ROW.captures_iter(html)
        .filter_map(|row| {
            let mut cells = cells(row.get(1).map_or("", |m| m.as_str())).into_iter();
            Some((cells.next()?, cells.next()?))
        })
        .collect()
}

/// `7 days 03h:12m:45s.00` to seconds.
pub fn parse_uptime(raw: &str) -> Option<f64> {
    let caps = UPTIME.captures(raw.trim())?;
    let part = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };
    let secs = part(1)?
        .checked_mul(86_400)?
        .checked_add(part(2)?.checked_mul(3_600)?)?
        .checked_add(part(3)?.checked_mul(60)?)?
        .checked_add(part(4)?)?;
    Some(secs as f64)
}
