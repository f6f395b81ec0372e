//! Arris SURFboard status pages.
//!
//! Newer firmware protects the status pages. Logging in is a GET of the
//! status page with `login_<base64(user:password)>` as the query string; the
//! body is a token that later requests carry as `ct_<token>` and as the
//! `credential` cookie.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use reqwest::header::COOKIE;
use tracing::debug;

use super::{Session, Transport};
use crate::config::Credentials;
use crate::error::ClientError;
use crate::parser::surfboard::{CONNECTION_STATUS, SOFTWARE_INFO};
use crate::payload::{DeviceFamily, RawPayload};

const CONNECTION_STATUS_PAGE: &str = "/cmconnectionstatus.html";
const SOFTWARE_INFO_PAGE: &str = "/cmswinfo.html";

const SECTIONS: &[(&str, &str)] = &[
    (CONNECTION_STATUS, CONNECTION_STATUS_PAGE),
    (SOFTWARE_INFO, SOFTWARE_INFO_PAGE),
];

pub(crate) async fn login(
    transport: &Transport,
    credentials: Option<&Credentials>,
) -> Result<Session, ClientError> {
    let mut session = Session::new(credentials);
    let Some(credentials) = credentials else {
        return Ok(session);
    };

    let encoded = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    let path = format!("{}?login_{}", CONNECTION_STATUS_PAGE, encoded);

    let reply = transport
        .send(|| {
            transport
                .get(&path)
                .basic_auth(&credentials.username, Some(&credentials.password))
        })
        .await?;

    let token = reply.text().trim().to_string();
    // An HTML body means the credentials were not accepted
    if token.is_empty() || token.contains('<') {
        return Err(ClientError::AuthFailed(
            "no session token in login response".to_string(),
        ));
    }

    session.cookie = Some(format!("credential={}", token));
    session.query_token = Some(token);

    debug!(username = %credentials.username, "Logged in");
    Ok(session)
}

pub(crate) async fn fetch(
    transport: &Transport,
    session: &Session,
) -> Result<RawPayload, ClientError> {
    let mut bodies = Vec::with_capacity(SECTIONS.len());

    for &(name, page) in SECTIONS {
        let path = match &session.query_token {
            Some(token) => format!("{}?ct_{}", page, token),
            None => page.to_string(),
        };

        let reply = transport
            .send(|| {
                let request = transport.get(&path);
                match &session.cookie {
                    Some(cookie) => request.header(COOKIE, cookie),
                    None => request,
                }
            })
            .await?;

        if is_login_page(&reply.text()) {
            return Err(ClientError::AuthFailed(format!(
                "{} answered with the login form",
                page
            )));
        }

        bodies.push((name, reply.body));
    }

    let mut payload = RawPayload::new(DeviceFamily::ArrisSurfboard, Utc::now());
    for (name, body) in bodies {
        payload.push_section(name, body);
    }
    Ok(payload)
}

/// Whether a page is the login form rather than status content.
fn is_login_page(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("type=\"password\"") || lower.contains("type='password'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_login_page() {
        assert!(is_login_page(
            "<form><input type=\"text\" id=\"username\"><input TYPE=\"password\" id=\"password\"></form>"
        ));
        assert!(!is_login_page(
            "<table><tr><th>Downstream Bonded Channels</th></tr></table>"
        ));
    }
}
