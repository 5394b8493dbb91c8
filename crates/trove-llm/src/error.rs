use std::time::Duration;

/// Failure of one embedding call.
///
/// The variants split into two families: [`EmbedError::Transient`] is worth
/// retrying, everything else fails the batch immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbedError {
    /// Timeout, rate limit, connection failure or 5xx response.
    #[error("transient embedding failure: {message}")]
    Transient {
        message: String,
        /// Delay requested by the provider (`Retry-After`), if any.
        retry_after: Option<Duration>,
    },

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl EmbedError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Every later call would fail the same way, whatever its input.
    #[must_use]
    pub fn affects_every_call(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map a non-success HTTP status to an error family.
    #[must_use]
    pub fn from_status(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let detail = format!("status {status}: {}", truncate(body, 200));
        match status.as_u16() {
            401 | 403 => Self::Authentication(detail),
            408 | 409 | 425 | 429 => Self::Transient {
                message: detail,
                retry_after,
            },
            s if s >= 500 => Self::Transient {
                message: detail,
                retry_after,
            },
            _ => Self::InvalidInput(detail),
        }
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status, &e.to_string(), None);
        }
        if e.is_decode() {
            return Self::MalformedResponse(e.to_string());
        }
        if e.is_builder() {
            return Self::InvalidInput(e.to_string());
        }
        // timeouts, refused connections, resets mid-body
        Self::transient(e.to_string())
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn auth_statuses_are_fatal() {
        for code in [401, 403] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = EmbedError::from_status(status, "nope", None);
            assert!(matches!(err, EmbedError::Authentication(_)));
            assert!(!err.is_transient());
            assert!(err.affects_every_call());
        }
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let err = EmbedError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            "",
            Some(Duration::from_secs(7)),
        );
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = EmbedError::from_status(StatusCode::BAD_GATEWAY, "upstream", None);
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn bad_request_is_invalid_input() {
        let err = EmbedError::from_status(StatusCode::BAD_REQUEST, "too long", None);
        assert!(matches!(err, EmbedError::InvalidInput(ref m) if m.contains("too long")));
        assert!(!err.affects_every_call());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
