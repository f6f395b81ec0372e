//! Prometheus exporter for consumer modem statistics.
//!
//! A background poller logs in to the modem's local management interface,
//! fetches its status pages and parses them into a typed snapshot. Scrapes
//! render the latest snapshot from memory and never wait on the modem.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────┐    ┌──────────────┐    ┌─────────────┐
//! │ ModemClient  │───>│  parser  │───>│MetricRegistry│───>│ HTTP server │
//! │ (session)    │    │  (pure)  │    │  (ArcSwap)   │    │ (/metrics)  │
//! └──────────────┘    └──────────┘    └──────────────┘    └─────────────┘
//!        ^                                   ^
//!        └────────────── Poller ─────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! modem-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod config;
pub mod error;
pub mod exposition;
pub mod http;
pub mod parser;
pub mod payload;
pub mod poller;
pub mod registry;
pub mod snapshot;

pub use client::{ModemClient, StatusSource};
pub use config::ExporterConfig;
pub use error::{ClientError, ParseError, PollError, StartupError};
pub use exposition::{Exposition, ExpositionDocument, RenderOptions};
pub use http::{BoundHttpServer, HttpServer};
pub use payload::{DeviceFamily, RawPayload};
pub use poller::{Backoff, PollState, Poller};
pub use registry::{MetricRegistry, SharedRegistry};
pub use snapshot::{Stat, StatSnapshot};
