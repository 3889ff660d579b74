use std::time::Duration;

/// How the retry layer should treat a [`GatewayError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// The request itself is wrong; sending it again cannot help.
    Permanent,
    /// The backend hiccuped and a later attempt may succeed.
    Transient,
    /// Raised locally by the client (deadline, breaker, cancellation).
    Local,
}

/// Failures talking to an inference backend.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("circuit open, retry in {0:?}")]
    CircuitOpen(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::MalformedResponse(_) => {
                FailureClass::Permanent
            }
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::ProviderOverloaded
            | Self::NetworkError(_)
            | Self::StreamInterrupted(_) => FailureClass::Transient,
            Self::Timeout(_) | Self::CircuitOpen(_) | Self::Cancelled => FailureClass::Local,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::Permanent
    }

    /// Backoff hint sent by the backend, if any.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable label used as a log field.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map a non-success HTTP status from the chat-completions endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            400 | 404 | 422 => Self::InvalidRequest(body),
            other => Self::InvalidRequest(format!("unexpected status {other}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_drive_retry_decisions() {
        let transient = [
            GatewayError::RateLimited { retry_after: None },
            GatewayError::ServerError { status: 502, body: "bad gateway".into() },
            GatewayError::ProviderOverloaded,
            GatewayError::StreamInterrupted("eof".into()),
        ];
        assert!(transient.iter().all(GatewayError::is_retryable));

        let key = GatewayError::AuthenticationFailed("bad key".into());
        assert_eq!(key.class(), FailureClass::Permanent);
        assert!(key.is_fatal() && !key.is_retryable());

        for local in [GatewayError::Cancelled, GatewayError::Timeout(Duration::from_secs(3))] {
            assert_eq!(local.class(), FailureClass::Local);
            assert!(!local.is_fatal() && !local.is_retryable());
        }
    }

    #[test]
    fn http_statuses_land_in_the_right_class() {
        assert_eq!(GatewayError::from_status(403, "forbidden".into()).class(), FailureClass::Permanent);
        assert_eq!(GatewayError::from_status(422, "bad schema".into()).class(), FailureClass::Permanent);
        assert_eq!(GatewayError::from_status(429, "slow down".into()).class(), FailureClass::Transient);
        assert!(matches!(
            GatewayError::from_status(529, "busy".into()),
            GatewayError::ProviderOverloaded
        ));
        assert!(matches!(
            GatewayError::from_status(418, "teapot".into()),
            GatewayError::InvalidRequest(msg) if msg.contains("418")
        ));
    }

    #[test]
    fn only_rate_limits_carry_a_backoff_hint() {
        let limited = GatewayError::RateLimited { retry_after: Some(Duration::from_secs(5)) };
        assert_eq!(limited.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(limited.error_kind(), "rate_limited");
        assert_eq!(GatewayError::NetworkError("reset".into()).suggested_delay(), None);
    }
}
