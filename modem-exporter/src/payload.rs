//! Raw status payloads as fetched from the modem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported modem families.
///
/// The family is configured, never detected. It decides the login flow, the
/// status endpoints and the parser applied to what they return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Huawei HiLink LTE sticks and routers (XML API).
    #[default]
    HuaweiHilink,
    /// ZTE MF-series LTE routers (goform JSON API).
    ZteGoform,
    /// Arris SURFboard DOCSIS cable modems (HTML status pages).
    ArrisSurfboard,
}

impl DeviceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::HuaweiHilink => "huawei_hilink",
            DeviceFamily::ZteGoform => "zte_goform",
            DeviceFamily::ArrisSurfboard => "arris_surfboard",
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One response body, keyed by the section name the parser looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: &'static str,
    pub body: Vec<u8>,
}

/// Unparsed status data for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    family: DeviceFamily,
    captured_at: DateTime<Utc>,
    sections: Vec<Section>,
}

impl RawPayload {
    pub fn new(family: DeviceFamily, captured_at: DateTime<Utc>) -> Self {
        Self {
            family,
            captured_at,
            sections: Vec::new(),
        }
    }

    /// Add a section body.
    pub fn with_section(mut self, name: &'static str, body: impl Into<Vec<u8>>) -> Self {
        self.push_section(name, body);
        self
    }

    pub fn push_section(&mut self, name: &'static str, body: impl Into<Vec<u8>>) {
        self.sections.push(Section {
            name,
            body: body.into(),
        });
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Body of the named section, if it was fetched.
    pub fn section(&self, name: &str) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.body.as_slice())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}
