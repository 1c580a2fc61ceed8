use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// All failure kinds the broker distinguishes.
///
/// The split between [`Error::UpstreamRejected`] and
/// [`Error::UpstreamUnavailable`] is load-bearing: a rejection means the
/// provider looked at the request and said no (expired refresh token, bad
/// code), while unavailability is a transport failure that leaves session
/// state intact for a later retry.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// PKCE state is unknown, expired, or already consumed.
    #[error("invalid or expired state parameter")]
    InvalidState,

    /// The provider answered with a non-2xx status.
    #[error("{operation} rejected by identity provider (status {status}): {detail}")]
    UpstreamRejected {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    /// The provider could not be reached within the timeout.
    #[error("identity provider unreachable during {operation}")]
    UpstreamUnavailable { operation: &'static str },

    /// No session cookie, or the identifier resolves to nothing.
    #[error("no session")]
    NoSession,

    /// The session existed but could not be kept alive.
    #[error("session expired")]
    SessionExpired,

    /// The backing store is unreachable. Never conflated with a missing key.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored token ciphertext failed authentication (tamper or key mismatch).
    #[error("token ciphertext invalid")]
    InvalidCiphertext,

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violation that should not happen in practice.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::InvalidState => (StatusCode::BAD_REQUEST, "Invalid or expired state"),
            Self::UpstreamRejected { .. } => {
                tracing::warn!(error = %self, "identity provider rejected the request");
                (
                    StatusCode::UNAUTHORIZED,
                    "Authentication rejected by identity provider",
                )
            }
            Self::UpstreamUnavailable { .. } => {
                tracing::warn!(error = %self, "identity provider unreachable");
                (StatusCode::BAD_GATEWAY, "Identity provider unavailable")
            }
            Self::NoSession => (StatusCode::UNAUTHORIZED, "No session"),
            Self::SessionExpired => (StatusCode::UNAUTHORIZED, "Session expired"),
            Self::InvalidCiphertext => (StatusCode::UNAUTHORIZED, "Session invalid"),
            Self::StoreUnavailable(_) => {
                tracing::error!(error = %self, "session store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
            Self::Config(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        };
        (status, body).into_response()
    }
}
