use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::SandboxError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const ACCEPT_JSON: &str = "application/json";
pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";

const REQUEST_ID_SUFFIX_LEN: usize = 9;
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Build the header set shared by every outgoing request.
///
/// The bearer header is attached only when a non-empty token is supplied.
/// A fresh correlation id is generated per call.
pub fn build_headers(
    token: Option<&str>,
    accept: &str,
    user_agent: &str,
    extra_headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, SandboxError> {
    let mut headers = BTreeMap::new();

    headers.insert(HEADER_ACCEPT.to_owned(), accept.to_owned());
    headers.insert(HEADER_USER_AGENT.to_owned(), user_agent.trim().to_owned());

    for (key, value) in extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
        headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    }
    headers.insert(HEADER_REQUEST_ID.to_owned(), generate_request_id());

    to_header_map(headers)
}

fn to_header_map(headers: BTreeMap<String, String>) -> Result<HeaderMap, SandboxError> {
    let mut out = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| SandboxError::invalid_request(format!("invalid header key: {key}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| SandboxError::invalid_request(format!("invalid header value for {key}")))?;
        out.insert(name, value);
    }
    Ok(out)
}

/// Correlation id of the form `req_{base36 epoch millis}_{9 random base36 chars}`.
pub fn generate_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let millis = u64::try_from(millis).unwrap_or(u64::MAX);

    let mut rng = rand::thread_rng();
    let suffix: String = (0..REQUEST_ID_SUFFIX_LEN)
        .map(|_| char::from(BASE36_DIGITS[rng.gen_range(0..BASE36_DIGITS.len())]))
        .collect();

    format!("req_{}_{suffix}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
