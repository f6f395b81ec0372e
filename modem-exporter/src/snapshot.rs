//! Typed modem statistics.

use chrono::{DateTime, Utc};

use crate::payload::DeviceFamily;

/// Prometheus metric type of a statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Every statistic the exporter knows how to publish.
///
/// Declaration order is the order metric families appear in the exposition
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stat {
    UplinkRate,
    DownlinkRate,
    TransferredBytes,
    ConnectionUptime,
    ConnectDuration,
    Snr,
    Rsrp,
    Rsrq,
    Rssi,
    ChannelPower,
    CorrectedCodewords,
    UncorrectableCodewords,
}

impl Stat {
    pub const ALL: [Stat; 12] = [
        Stat::UplinkRate,
        Stat::DownlinkRate,
        Stat::TransferredBytes,
        Stat::ConnectionUptime,
        Stat::ConnectDuration,
        Stat::Snr,
        Stat::Rsrp,
        Stat::Rsrq,
        Stat::Rssi,
        Stat::ChannelPower,
        Stat::CorrectedCodewords,
        Stat::UncorrectableCodewords,
    ];

    /// Metric name without the configured prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Stat::UplinkRate => "uplink_rate_bytes_per_second",
            Stat::DownlinkRate => "downlink_rate_bytes_per_second",
            Stat::TransferredBytes => "transferred_bytes_total",
            Stat::ConnectionUptime => "connection_uptime_seconds",
            Stat::ConnectDuration => "connect_duration_seconds_total",
            Stat::Snr => "snr_db",
            Stat::Rsrp => "rsrp_dbm",
            Stat::Rsrq => "rsrq_db",
            Stat::Rssi => "rssi_dbm",
            Stat::ChannelPower => "channel_power_dbmv",
            Stat::CorrectedCodewords => "corrected_codewords_total",
            Stat::UncorrectableCodewords => "uncorrectable_codewords_total",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Stat::UplinkRate => "Current upload rate",
            Stat::DownlinkRate => "Current download rate",
            Stat::TransferredBytes => "Transferred bytes",
            Stat::ConnectionUptime => "Time since the current connection was established",
            Stat::ConnectDuration => "Accumulated connected duration",
            Stat::Snr => "Signal to noise ratio",
            Stat::Rsrp => "Reference signal received power",
            Stat::Rsrq => "Reference signal received quality",
            Stat::Rssi => "Received signal strength indicator",
            Stat::ChannelPower => "Channel power level",
            Stat::CorrectedCodewords => "Codewords with errors corrected by FEC",
            Stat::UncorrectableCodewords => "Codewords with errors FEC could not correct",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Stat::TransferredBytes
            | Stat::ConnectDuration
            | Stat::CorrectedCodewords
            | Stat::UncorrectableCodewords => MetricKind::Counter,
            _ => MetricKind::Gauge,
        }
    }
}

/// One labelled value of a statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub stat: Stat,
    /// Label pairs, sorted by name.
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Sample {
    pub fn new(stat: Stat, value: f64) -> Self {
        Self {
            stat,
            labels: Vec::new(),
            value,
        }
    }

    pub fn with_label(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((name, value.into()));
        self.labels.sort_by(|a, b| a.0.cmp(b.0));
        self
    }
}

/// Identification strings reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: String,
    pub firmware: String,
}

/// A complete, immutable capture of modem statistics.
///
/// Only parsers construct snapshots, and only after every field the family
/// requires has been read.
#[derive(Debug, Clone, PartialEq)]
pub struct StatSnapshot {
    family: DeviceFamily,
    captured_at: DateTime<Utc>,
    device: DeviceInfo,
    samples: Vec<Sample>,
}

impl StatSnapshot {
    pub fn new(
        family: DeviceFamily,
        captured_at: DateTime<Utc>,
        device: DeviceInfo,
        samples: Vec<Sample>,
    ) -> Self {
        Self {
            family,
            captured_at,
            device,
            samples,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Samples of one statistic, in capture order.
    pub fn samples_of(&self, stat: Stat) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(move |s| s.stat == stat)
    }

    /// Value of an unlabelled statistic, or of its first sample.
    pub fn value(&self, stat: Stat) -> Option<f64> {
        self.samples_of(stat).next().map(|s| s.value)
    }
}
