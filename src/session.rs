use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Opaque session identifier carried in the browser cookie.
///
/// 32 random bytes (256 bits of entropy) encoded base64url, so the cookie
/// value is unguessable and carries no token material.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One server-side session, as persisted in the store.
///
/// Token fields hold vault ciphertext, never raw tokens. The session's state
/// machine is implicit: a record with `now < access_token_expires_at` is
/// active, one past the deadline needs a refresh, and a missing record is an
/// absent/expired/revoked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Encrypted access token.
    pub access_token: String,
    /// Encrypted refresh token.
    pub refresh_token: String,
    /// Absolute deadline after which the access token must be refreshed.
    #[serde(with = "time::serde::timestamp")]
    pub access_token_expires_at: OffsetDateTime,
    /// When the session was created; rotation preserves this.
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    /// Cached user info, populated lazily.
    #[serde(default)]
    pub user_info: Option<serde_json::Value>,
}

impl SessionRecord {
    /// Whether the access token is past its deadline.
    ///
    /// Strictly reactive: the boundary is `now >= expires_at`, with no early
    /// safety margin.
    #[must_use]
    pub fn needs_refresh(&self, now: OffsetDateTime) -> bool {
        now >= self.access_token_expires_at
    }
}
