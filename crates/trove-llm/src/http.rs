//! Shared HTTP client construction for embedding backends.

use std::time::Duration;

use crate::error::EmbedError;

/// Build the HTTP client used by [`crate::HttpEmbeddingProvider`].
///
/// Rustls TLS, `trove/{version}` user-agent, redirect limit 10.
///
/// # Errors
///
/// Returns [`EmbedError::InvalidInput`] if the TLS backend cannot be initialized.
pub fn build_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<reqwest::Client, EmbedError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .user_agent(concat!("trove/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| EmbedError::InvalidInput(format!("http client: {e}")))
}

/// Parse a `Retry-After` header given in delta-seconds.
///
/// HTTP-date values and values no `Duration` can hold are ignored; the
/// caller falls back to its own backoff.
#[must_use]
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn build_client_succeeds() {
        assert!(build_client(Duration::from_secs(1), Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(&headers("3")), Some(Duration::from_secs(3)));
        assert_eq!(
            parse_retry_after(&headers("0.5")),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn retry_after_http_date_is_ignored() {
        assert_eq!(
            parse_retry_after(&headers("Wed, 21 Oct 2015 07:28:00 GMT")),
            None
        );
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_negative_is_ignored() {
        assert_eq!(parse_retry_after(&headers("-1")), None);
    }

    #[test]
    fn retry_after_out_of_range_is_ignored() {
        assert_eq!(parse_retry_after(&headers("1e30")), None);
        assert_eq!(parse_retry_after(&headers("NaN")), None);
        assert_eq!(parse_retry_after(&headers("inf")), None);
    }
}
