use url::Url;

use crate::error::SandboxError;

/// Default base URL for a locally running sandbox API.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Parse and normalize a base URL.
///
/// Blank input falls back to [`DEFAULT_BASE_URL`]; trailing slashes are
/// dropped so endpoint segments always append to the configured prefix.
pub fn normalize_base_url(input: &str) -> Result<Url, SandboxError> {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let url = Url::parse(base.trim_end_matches('/'))
        .map_err(|error| SandboxError::invalid_request(format!("invalid base URL {base}: {error}")))?;
    if url.cannot_be_a_base() {
        return Err(SandboxError::invalid_request(format!(
            "invalid base URL {base}: cannot carry a path"
        )));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
pub fn endpoint_url<I, S>(base: &Url, segments: I) -> Result<Url, SandboxError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| SandboxError::invalid_request(format!("invalid base URL {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
