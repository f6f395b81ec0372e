//! Huawei HiLink login and status endpoints.
//!
//! Every session starts at `SesTokInfo`, which hands out a session cookie
//! and a verification token. Devices with a password then need a login
//! whose response replaces both.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Reply, Session, Transport};
use crate::config::Credentials;
use crate::error::ClientError;
use crate::parser::hilink::{DEVICE_INFORMATION, SIGNAL, TRAFFIC_STATISTICS, root_element};
use crate::payload::{DeviceFamily, RawPayload};

const SES_TOK_INFO: &str = "/api/webserver/SesTokInfo";
const LOGIN: &str = "/api/user/login";

const TOKEN_HEADER: &str = "__RequestVerificationToken";

const SECTIONS: &[(&str, &str)] = &[
    (DEVICE_INFORMATION, "/api/device/information"),
    (SIGNAL, "/api/device/signal"),
    (TRAFFIC_STATISTICS, "/api/monitoring/traffic-statistics"),
];

/// Error codes meaning the session or token is no longer accepted.
const SESSION_REJECTED: &[i64] = &[100003, 125001, 125002, 125003];
/// Login error codes for a wrong user name or password.
const BAD_CREDENTIALS: &[i64] = &[108006, 108007];

#[derive(Debug, Deserialize)]
struct SesTokInfo {
    #[serde(rename = "SesInfo")]
    ses_info: Option<String>,
    #[serde(rename = "TokInfo")]
    tok_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: Option<String>,
    message: Option<String>,
}

pub(crate) async fn login(
    transport: &Transport,
    credentials: Option<&Credentials>,
) -> Result<Session, ClientError> {
    let reply = transport.send(|| transport.get(SES_TOK_INFO)).await?;
    let body = reply.text();
    check_envelope(&body)?;

    let info: SesTokInfo = quick_xml::de::from_str(&body)
        .map_err(|_| ClientError::AuthFailed("unreadable SesTokInfo response".to_string()))?;

    let mut session = Session::new(credentials);
    session.cookie = info.ses_info.filter(|s| !s.is_empty());
    session.token = info.tok_info.filter(|s| !s.is_empty());

    let Some(credentials) = credentials else {
        return Ok(session);
    };

    let token = session.token.clone().ok_or_else(|| {
        ClientError::AuthFailed("no verification token for login".to_string())
    })?;
    let request = login_request(credentials, &token);

    let reply = transport
        .send(|| {
            with_session(transport.post(LOGIN), &session)
                .header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8")
                .body(request.clone())
        })
        .await?;

    match envelope_code(&reply.text()) {
        Some((code, _)) if BAD_CREDENTIALS.contains(&code) => {
            return Err(ClientError::AuthFailed(format!(
                "login rejected for user {} (code {})",
                credentials.username, code
            )));
        }
        Some((code, message)) => {
            return Err(login_error(code, message));
        }
        None => {}
    }

    if let Some(cookie) = reply.cookies() {
        session.cookie = Some(cookie);
    }
    if let Some(token) = response_token(&reply) {
        session.token = Some(token);
    }

    debug!(username = %credentials.username, "Logged in");
    Ok(session)
}

pub(crate) async fn fetch(
    transport: &Transport,
    session: &Session,
) -> Result<RawPayload, ClientError> {
    let mut bodies = Vec::with_capacity(SECTIONS.len());

    for &(name, path) in SECTIONS {
        let reply = transport
            .send(|| with_session(transport.get(path), session))
            .await?;
        check_envelope(&reply.text())?;
        bodies.push((name, reply.body));
    }

    let mut payload = RawPayload::new(DeviceFamily::HuaweiHilink, Utc::now());
    for (name, body) in bodies {
        payload.push_section(name, body);
    }
    Ok(payload)
}

fn with_session(request: reqwest::RequestBuilder, session: &Session) -> reqwest::RequestBuilder {
    let mut request = request;
    if let Some(cookie) = &session.cookie {
        request = request.header(reqwest::header::COOKIE, cookie);
    }
    if let Some(token) = &session.token {
        request = request.header(TOKEN_HEADER, token);
    }
    request
}

/// Map an `<error>` document to a client error.
fn check_envelope(body: &str) -> Result<(), ClientError> {
    match envelope_code(body) {
        Some((code, _)) if SESSION_REJECTED.contains(&code) => Err(ClientError::AuthFailed(
            format!("session rejected (code {})", code),
        )),
        Some((code, message)) => Err(ClientError::Device { code, message }),
        None => Ok(()),
    }
}

fn login_error(code: i64, message: String) -> ClientError {
    if SESSION_REJECTED.contains(&code) {
        ClientError::AuthFailed(format!("session rejected at login (code {})", code))
    } else {
        ClientError::Device { code, message }
    }
}

/// Code and message of an `<error>` document, if the body is one.
fn envelope_code(body: &str) -> Option<(i64, String)> {
    if root_element(body) != Some("error") {
        return None;
    }

    let envelope: ErrorEnvelope = quick_xml::de::from_str(body).ok()?;
    let code = envelope.code?.trim().parse().ok()?;
    Some((code, envelope.message.unwrap_or_default()))
}

/// The token for the next request, sent back in one of the
/// `__RequestVerificationToken*` headers, possibly as a `#`-separated list.
fn response_token(reply: &Reply) -> Option<String> {
    let prefix = TOKEN_HEADER.to_ascii_lowercase();

    reply
        .headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with(&prefix))
        .filter_map(|(_, value)| value.to_str().ok())
        .filter_map(|value| value.split('#').next())
        .map(str::trim)
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

fn login_request(credentials: &Credentials, token: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><request><Username>{}</Username><Password>{}</Password><password_type>4</password_type></request>",
        quick_xml::escape::escape(credentials.username.as_str()),
        password_hash(&credentials.username, &credentials.password, token),
    )
}

/// Password type 4: `b64(sha256_hex(user + b64(sha256_hex(password)) + token))`.
pub(crate) fn password_hash(username: &str, password: &str, token: &str) -> String {
    let inner = STANDARD.encode(hex_sha256(password.as_bytes()));
    let outer = hex_sha256(format!("{}{}{}", username, inner, token).as_bytes());
    STANDARD.encode(outer)
}

fn hex_sha256(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
