//! ZTE goform login and status endpoints.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use reqwest::header::{COOKIE, REFERER};
use serde_json::Value;
use tracing::debug;

use super::{Session, Transport};
use crate::config::Credentials;
use crate::error::ClientError;
use crate::parser::zte::{FIELDS, STATUS};
use crate::payload::{DeviceFamily, RawPayload};

const SET_CMD: &str = "/goform/goform_set_cmd_process";
const GET_CMD: &str = "/goform/goform_get_cmd_process";

/// The web UI refuses goform calls without a same-origin referer.
fn referer(transport: &Transport) -> String {
    format!("{}/index.html", transport.base_url())
}

pub(crate) async fn login(
    transport: &Transport,
    credentials: Option<&Credentials>,
) -> Result<Session, ClientError> {
    let mut session = Session::new(credentials);
    let Some(credentials) = credentials else {
        return Ok(session);
    };

    let password = STANDARD.encode(credentials.password.as_bytes());
    let referer = referer(transport);

    let reply = transport
        .send(|| {
            transport
                .post(SET_CMD)
                .header(REFERER, &referer)
                .form(&[
                    ("isTest", "false"),
                    ("goformId", "LOGIN"),
                    ("password", password.as_str()),
                ])
        })
        .await?;

    let result = serde_json::from_slice::<Value>(&reply.body)
        .ok()
        .and_then(|v| v.get("result").map(json_text));

    match result.as_deref() {
        Some("0") => {}
        Some(code) => {
            return Err(ClientError::AuthFailed(format!(
                "login rejected (result {})",
                code
            )));
        }
        None => {
            return Err(ClientError::AuthFailed(
                "unreadable login response".to_string(),
            ));
        }
    }

    session.cookie = reply.cookies();
    debug!("Logged in");
    Ok(session)
}

pub(crate) async fn fetch(
    transport: &Transport,
    session: &Session,
) -> Result<RawPayload, ClientError> {
    let referer = referer(transport);
    let cmd = FIELDS.join(",");

    let reply = transport
        .send(|| {
            let mut request = transport
                .get(GET_CMD)
                .header(REFERER, &referer)
                .query(&[
                    ("isTest", "false"),
                    ("multi_data", "1"),
                    ("cmd", cmd.as_str()),
                ]);
            if let Some(cookie) = &session.cookie {
                request = request.header(COOKIE, cookie);
            }
            request
        })
        .await?;

    if session.is_authenticated() {
        check_logged_in(&reply.body)?;
    }

    Ok(RawPayload::new(DeviceFamily::ZteGoform, Utc::now()).with_section(STATUS, reply.body))
}

/// The router answers unauthenticated reads with `loginfo` other than `ok`
/// and blanks the remaining fields.
fn check_logged_in(body: &[u8]) -> Result<(), ClientError> {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        // Not JSON; left for the parser to reject
        return Ok(());
    };

    match value.get("loginfo").map(json_text).as_deref() {
        Some("ok") | None => Ok(()),
        Some(other) => Err(ClientError::AuthFailed(format!(
            "router reports loginfo={:?}",
            other
        ))),
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
