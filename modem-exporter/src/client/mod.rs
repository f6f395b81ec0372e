//! HTTP client for the modem's management interface.
//!
//! [`ModemClient`] owns the session and hides the login flow, network
//! retries and re-authentication from the poller. Each device family has its
//! own module with a `login` and a `fetch` step; the client dispatches on
//! [`DeviceFamily`].
//!
//! ## Failure policy
//!
//! - Network errors (timeout, refused, reset) are retried `retry_attempts`
//!   times, `retry_delay` apart, then reported as `Unreachable`.
//! - HTTP 401/403 or the family's "not logged in" marker drop the session;
//!   the whole login and fetch sequence is retried once before `AuthFailed`.
//! - Any other non-2xx status is `UpstreamError` and is not retried.

mod hilink;
mod surfboard;
mod zte;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{ConfigError, Credentials, ModemConfig, PollConfig};
use crate::error::ClientError;
use crate::payload::{DeviceFamily, RawPayload};

/// Anything that can produce raw status payloads for the poller.
#[async_trait]
pub trait StatusSource: Send {
    async fn fetch_status(&mut self) -> Result<RawPayload, ClientError>;
}

/// Authentication material for one login.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    /// Value for the `Cookie` header.
    pub cookie: Option<String>,
    /// Anti-CSRF token sent as a header.
    pub token: Option<String>,
    /// Token appended to request URLs.
    pub query_token: Option<String>,
    /// User the session was obtained for; `None` for anonymous sessions.
    pub username: Option<String>,
    acquired_at: Instant,
}

impl Session {
    pub fn new(credentials: Option<&Credentials>) -> Self {
        Self {
            cookie: None,
            token: None,
            query_token: None,
            username: credentials.map(|c| c.username.clone()),
            acquired_at: Instant::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.acquired_at.elapsed() >= ttl
    }
}

/// A fully read HTTP response with a 2xx status.
pub(crate) struct Reply {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// `name=value` pairs of all `Set-Cookie` headers, ready for a `Cookie`
    /// header.
    pub fn cookies(&self) -> Option<String> {
        let pairs: Vec<&str> = self
            .headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .filter(|pair| pair.contains('='))
            .collect();

        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

/// HTTP plumbing shared by all families.
pub(crate) struct Transport {
    http: Client,
    base_url: String,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl Transport {
    fn new(base_url: &str, poll: &PollConfig) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .timeout(poll.request_timeout())
            .user_agent(concat!("modem-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Validation(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            retry_attempts: poll.retry_attempts,
            retry_delay: poll.retry_delay(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path))
    }

    /// Send a request built by `make`, retrying network-level failures.
    ///
    /// `make` is called once per attempt.
    pub async fn send(&self, make: impl Fn() -> RequestBuilder) -> Result<Reply, ClientError> {
        let mut attempt = 0;

        loop {
            match Self::exchange(make()).await {
                Ok((status, reply)) => return classify(status, reply),
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    debug!(
                        error = %e,
                        attempt,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(ClientError::Unreachable(describe(&e))),
            }
        }
    }

    async fn exchange(request: RequestBuilder) -> Result<(StatusCode, Reply), reqwest::Error> {
        let response = request.send().await.map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?
            .to_vec();

        Ok((status, Reply { headers, body }))
    }
}

fn classify(status: StatusCode, reply: Reply) -> Result<Reply, ClientError> {
    if status.is_success() {
        Ok(reply)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(ClientError::AuthFailed(format!("HTTP {}", status.as_u16())))
    } else {
        Err(ClientError::UpstreamError(status.as_u16()))
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

/// Session-keeping client for one modem.
pub struct ModemClient {
    family: DeviceFamily,
    transport: Transport,
    credentials: Option<Credentials>,
    session: Option<Session>,
    session_ttl: Duration,
}

impl ModemClient {
    /// Build a client. Reads the password file, if one is configured.
    pub fn new(modem: &ModemConfig, poll: &PollConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            family: modem.family,
            transport: Transport::new(&modem.base_url, poll)?,
            credentials: modem.credentials()?,
            session: None,
            session_ttl: poll.session_ttl(),
        })
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Whether a session is currently held.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Drop the current session; the next fetch logs in again.
    pub fn invalidate_session(&mut self) {
        self.session = None;
    }

    async fn login(&self) -> Result<Session, ClientError> {
        let credentials = self.credentials.as_ref();
        debug!(
            family = %self.family,
            authenticated = credentials.is_some(),
            "Establishing session"
        );

        match self.family {
            DeviceFamily::HuaweiHilink => hilink::login(&self.transport, credentials).await,
            DeviceFamily::ZteGoform => zte::login(&self.transport, credentials).await,
            DeviceFamily::ArrisSurfboard => surfboard::login(&self.transport, credentials).await,
        }
    }

    async fn fetch(&self, session: &Session) -> Result<RawPayload, ClientError> {
        match self.family {
            DeviceFamily::HuaweiHilink => hilink::fetch(&self.transport, session).await,
            DeviceFamily::ZteGoform => zte::fetch(&self.transport, session).await,
            DeviceFamily::ArrisSurfboard => surfboard::fetch(&self.transport, session).await,
        }
    }

    /// One login-if-needed plus fetch. The session is kept unless it was
    /// rejected.
    async fn fetch_with_session(&mut self) -> Result<RawPayload, ClientError> {
        let session = match self.session.take() {
            Some(session) if !session.is_expired(self.session_ttl) => session,
            Some(_) => {
                debug!("Session expired");
                self.login().await?
            }
            None => self.login().await?,
        };

        let result = self.fetch(&session).await;
        if !matches!(result, Err(ClientError::AuthFailed(_))) {
            self.session = Some(session);
        }
        result
    }
}

#[async_trait]
impl StatusSource for ModemClient {
    async fn fetch_status(&mut self) -> Result<RawPayload, ClientError> {
        match self.fetch_with_session().await {
            Err(ClientError::AuthFailed(reason)) => {
                info!(reason = %reason, "Session rejected, logging in again");
                self.fetch_with_session().await
            }
            result => result,
        }
    }
}
