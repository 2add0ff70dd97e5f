//! Response classification
//!
//! Every non-success status becomes `TetherError::Upstream`; the domain error
//! decides from the status whether it is transient (429, 5xx) or permanent.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tether_domain::{Result, TetherError};
use tracing::debug;

/// Longest body excerpt kept in an error message
const MAX_BODY_EXCERPT: usize = 512;

/// Domain error for a non-success `status`
pub fn classify_status(status: StatusCode, retry_after_secs: Option<u64>) -> TetherError {
    let message = status.canonical_reason().unwrap_or("unknown status").to_string();
    TetherError::Upstream { status: status.as_u16(), message, retry_after_secs }
}

/// Seconds the server asked us to wait, from a `Retry-After` header
///
/// Accepts both delta-seconds and an HTTP date. Dates in the past yield 0.
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = (at - Utc::now()).num_seconds().max(0);
    u64::try_from(wait).ok()
}

/// Pass successful responses through; classify everything else
///
/// The body of a failed response is read (and truncated) into the error
/// message. `Retry-After` is only honoured on 429 and 503.
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            retry_after_secs(response.headers())
        }
        _ => None,
    };
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), retry_after_secs = ?retry_after, "upstream request failed");

    let mut err = classify_status(status, retry_after);
    if let TetherError::Upstream { message, .. } = &mut err {
        let excerpt = body.trim();
        if !excerpt.is_empty() {
            let end = excerpt
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .take_while(|&end| end <= MAX_BODY_EXCERPT)
                .last()
                .unwrap_or(0);
            message.push_str(": ");
            message.push_str(&excerpt[..end]);
        }
    }
    Err(err)
}
