//! Prometheus text exposition of the registry.
//!
//! Rendering works on one [`RegistrySnapshot`](crate::registry::RegistrySnapshot) so every document is
//! internally consistent, whatever the poller does meanwhile.

use std::io::Write;

use crate::config::PrometheusConfig;
use crate::registry::{RegistryState, SharedRegistry};
use crate::snapshot::{Sample, Stat, StatSnapshot};

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// A rendered scrape response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpositionDocument(String);

impl ExpositionDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether any line carries the given metric name.
    pub fn contains_metric(&self, name: &str) -> bool {
        self.0.lines().filter(|l| !l.starts_with('#')).any(|l| {
            l.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
    }
}

/// Naming options applied while rendering.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    prefix: String,
    /// Sanitized, sorted by name.
    default_labels: Vec<(String, String)>,
}

impl RenderOptions {
    pub fn new(prefix: &str, default_labels: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut default_labels: Vec<_> = default_labels
            .into_iter()
            .map(|(k, v)| (sanitize_label_name(&k), v))
            .collect();
        default_labels.sort();
        default_labels.dedup_by(|a, b| a.0 == b.0);

        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            sanitize_metric_name(prefix)
        };

        Self {
            prefix,
            default_labels,
        }
    }

    pub fn from_config(config: &PrometheusConfig) -> Self {
        Self::new(
            &config.prefix,
            config
                .default_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }

    /// Full name of a device metric.
    pub fn metric_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new("modem", std::iter::empty())
    }
}

/// Scrape handler state. Never talks to the modem.
#[derive(Clone)]
pub struct Exposition {
    registry: SharedRegistry,
    options: RenderOptions,
}

impl Exposition {
    pub fn new(registry: SharedRegistry, options: RenderOptions) -> Self {
        Self { registry, options }
    }

    /// Render the current registry contents.
    pub fn handle_scrape(&self) -> ExpositionDocument {
        render(&self.registry.read(), &self.options)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }
}

/// Render one registry state in Prometheus exposition format.
pub fn render(state: &RegistryState, options: &RenderOptions) -> ExpositionDocument {
    let mut output = Vec::with_capacity(4096);

    if let Some(snapshot) = state.latest() {
        render_device(&mut output, snapshot, options);
    }
    render_health(&mut output, state, options);

    ExpositionDocument(String::from_utf8(output).unwrap_or_default())
}

fn render_device(output: &mut Vec<u8>, snapshot: &StatSnapshot, options: &RenderOptions) {
    let device = snapshot.device();
    let info = options.metric_name("device_info");
    header(output, &info, "Modem identification", "gauge");
    sample_line(
        output,
        &info,
        &[
            ("family", snapshot.family().as_str()),
            ("firmware", device.firmware.as_str()),
            ("model", device.model.as_str()),
        ],
        1.0,
        options,
    );

    let captured = options.metric_name("snapshot_timestamp_seconds");
    header(
        output,
        &captured,
        "Time the published snapshot was captured",
        "gauge",
    );
    sample_line(
        output,
        &captured,
        &[],
        unix_seconds(snapshot.captured_at()),
        options,
    );

    for stat in Stat::ALL {
        let mut samples = snapshot.samples_of(stat).peekable();
        if samples.peek().is_none() {
            continue;
        }

        let name = options.metric_name(stat.name());
        header(output, &name, stat.help(), stat.kind().as_str());
        for sample in samples {
            sample_line(output, &name, &sample_labels(sample), sample.value, options);
        }
    }
}

fn render_health(output: &mut Vec<u8>, state: &RegistryState, options: &RenderOptions) {
    let health = state.health();

    header(
        output,
        "exporter_up",
        "Whether the last poll of the modem succeeded",
        "gauge",
    );
    sample_line(
        output,
        "exporter_up",
        &[],
        if state.is_up() { 1.0 } else { 0.0 },
        options,
    );

    header(
        output,
        "exporter_consecutive_failures",
        "Failed polls since the last success",
        "gauge",
    );
    sample_line(
        output,
        "exporter_consecutive_failures",
        &[],
        f64::from(health.consecutive_failures),
        options,
    );

    header(
        output,
        "exporter_last_success_timestamp_seconds",
        "Capture time of the last successful poll, 0 if none",
        "gauge",
    );
    sample_line(
        output,
        "exporter_last_success_timestamp_seconds",
        &[],
        health.last_success.map_or(0.0, unix_seconds),
        options,
    );

    header(
        output,
        "exporter_polls_total",
        "Poll cycles by outcome",
        "counter",
    );
    sample_line(
        output,
        "exporter_polls_total",
        &[("result", "success")],
        health.successes_total as f64,
        options,
    );
    sample_line(
        output,
        "exporter_polls_total",
        &[("result", "failure")],
        health.failures_total as f64,
        options,
    );

    if let Some(duration) = health.last_poll_duration {
        header(
            output,
            "exporter_last_poll_duration_seconds",
            "Wall time of the last poll cycle",
            "gauge",
        );
        sample_line(
            output,
            "exporter_last_poll_duration_seconds",
            &[],
            duration.as_secs_f64(),
            options,
        );
    }

    if let Some(error) = &health.last_error {
        header(
            output,
            "exporter_last_error_info",
            "Kind of the most recent poll failure",
            "gauge",
        );
        sample_line(
            output,
            "exporter_last_error_info",
            &[("error", error.kind)],
            1.0,
            options,
        );
    }
}

fn header(output: &mut Vec<u8>, name: &str, help: &str, kind: &str) {
    writeln!(output, "# HELP {} {}", name, escape_help(help)).ok();
    writeln!(output, "# TYPE {} {}", name, kind).ok();
}

fn sample_line(
    output: &mut Vec<u8>,
    name: &str,
    labels: &[(&str, &str)],
    value: f64,
    options: &RenderOptions,
) {
    let mut merged: Vec<(&str, &str)> = labels.to_vec();
    for (k, v) in &options.default_labels {
        if !merged.iter().any(|(existing, _)| *existing == k.as_str()) {
            merged.push((k.as_str(), v.as_str()));
        }
    }
    merged.sort_by(|a, b| a.0.cmp(b.0));

    writeln!(
        output,
        "{}{} {}",
        name,
        format_labels(&merged),
        format_value(value)
    )
    .ok();
}

fn sample_labels(sample: &Sample) -> Vec<(&str, &str)> {
    sample
        .labels
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .collect()
}

fn unix_seconds(at: chrono::DateTime<chrono::Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid
/// characters become underscores, runs of underscores collapse, and a leading
/// digit gets an underscore in front.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`; names starting with `__`
/// are reserved.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
