use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::error::Error;
use crate::pkce;
use crate::provider::{ProviderClient, TokenGrant};
use crate::session::{SessionId, SessionRecord};
use crate::store::SessionStore;
use crate::vault::TokenVault;

/// Extra refresh attempts after the first call fails with
/// `UpstreamUnavailable`. Exhausting the budget fails the request but never
/// deletes the session — only an explicit provider rejection does that.
const REFRESH_RETRIES: u32 = 1;

fn session_key(id: &SessionId) -> String {
    format!("session:{id}")
}

fn pkce_key(state: &str) -> String {
    format!("pkce:{state}")
}

/// Non-token session status returned to the browser.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionStatus {
    pub authenticated: bool,
    pub session_valid_until: OffsetDateTime,
}

/// The session lifecycle manager.
///
/// Orchestrates login, callback, refresh-at-expiry, rotation, validation,
/// and logout over the store, vault, and provider client. The store is the
/// sole source of truth: nothing here caches session or token state across
/// requests, so refresh and rotation are immediately visible to every holder
/// of the cookie.
pub struct SessionBroker {
    store: Arc<dyn SessionStore>,
    provider: ProviderClient,
    vault: TokenVault,
    session_ttl: StdDuration,
    pkce_ttl: StdDuration,
    default_access_token_ttl: time::Duration,
    /// Per-session locks serializing the refresh section. Entries are removed
    /// as the last holder releases, so the map stays bounded by in-flight
    /// refreshes.
    refresh_locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionBroker {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: ProviderClient,
        vault: TokenVault,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            provider,
            vault,
            session_ttl: settings.session_ttl,
            pkce_ttl: settings.pkce_ttl,
            default_access_token_ttl: time::Duration::seconds(
                settings.default_access_token_ttl.as_secs() as i64,
            ),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a login: bind a fresh PKCE triple and return the provider
    /// authorization URL to redirect the browser to.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] if the binding cannot be stored.
    pub async fn begin_login(&self) -> Result<String, Error> {
        let triple = pkce::generate();
        self.store
            .put(&pkce_key(&triple.state), &triple.verifier, self.pkce_ttl)
            .await?;
        tracing::debug!("PKCE binding stored for new login attempt");
        Ok(self.provider.authorize_url(&triple.challenge, &triple.state))
    }

    /// Complete a login from the provider callback.
    ///
    /// Consumes the one-time PKCE binding (so a replayed `state` fails),
    /// exchanges the code, encrypts both tokens, and creates the session.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the state is unknown, expired, or already
    /// consumed; [`Error::UpstreamRejected`]/[`Error::UpstreamUnavailable`]
    /// from the exchange — in every failure case no session is created.
    pub async fn complete_login(&self, code: &str, state: &str) -> Result<SessionId, Error> {
        let verifier = self
            .store
            .take(&pkce_key(state))
            .await?
            .ok_or(Error::InvalidState)?;

        let grant = self.provider.exchange_code(code, &verifier).await?;
        let refresh_token = grant.refresh_token.clone().ok_or(Error::UpstreamRejected {
            operation: "code exchange",
            status: 200,
            detail: "response missing refresh_token".into(),
        })?;

        let now = OffsetDateTime::now_utc();
        let record = SessionRecord {
            access_token: self.vault.encrypt(&grant.access_token)?,
            refresh_token: self.vault.encrypt(&refresh_token)?,
            access_token_expires_at: now + self.access_token_lifetime(&grant),
            created_at: now,
            user_info: None,
        };

        let id = SessionId::generate();
        self.persist(&id, &record).await?;
        tracing::info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Return the session's record with a non-expired access token,
    /// refreshing it first if the deadline has passed.
    ///
    /// Strictly reactive: while `now < expires_at` this makes zero upstream
    /// calls. Past the deadline, the refresh section is serialized per
    /// session identifier; the re-read under the lock lets the losers of a
    /// concurrent race observe the winner's refreshed record instead of
    /// re-spending a single-use refresh token.
    ///
    /// # Errors
    ///
    /// [`Error::NoSession`] when the identifier resolves to nothing,
    /// [`Error::SessionExpired`] when the provider rejected the refresh
    /// token (the session is deleted), [`Error::UpstreamUnavailable`] when
    /// the provider stayed unreachable (the session is left intact).
    pub async fn ensure_fresh(&self, id: &SessionId) -> Result<SessionRecord, Error> {
        let record = self.load(id).await?.ok_or(Error::NoSession)?;
        if !record.needs_refresh(OffsetDateTime::now_utc()) {
            return Ok(record);
        }

        let lock = self.refresh_lock(id).await;
        let result = {
            let _guard = lock.lock().await;
            self.refresh_session(id).await
        };
        self.release_refresh_lock(id, lock).await;
        result
    }

    /// Rotate the session identifier and report non-token status.
    ///
    /// The old identifier stops resolving; the caller must set the returned
    /// identifier as the new cookie.
    ///
    /// # Errors
    ///
    /// As [`ensure_fresh`](Self::ensure_fresh), plus
    /// [`Error::StoreUnavailable`] from the rotation writes.
    pub async fn session_info(&self, id: &SessionId) -> Result<(SessionId, SessionStatus), Error> {
        let record = self.ensure_fresh(id).await?;

        let new_id = SessionId::generate();
        self.persist(&new_id, &record).await?;
        self.store.delete(&session_key(id)).await?;
        tracing::debug!(session_id = %new_id, "session identifier rotated");

        let valid_until =
            record.created_at + time::Duration::seconds(self.session_ttl.as_secs() as i64);
        Ok((
            new_id,
            SessionStatus {
                authenticated: true,
                session_valid_until: valid_until,
            },
        ))
    }

    /// Return the decrypted raw access token, refreshing first if needed.
    ///
    /// The only operation that returns token material, and only for trusted
    /// internal callers: the endpoint exposing this must be reachable solely
    /// from the internal network. Never rotates the identifier.
    ///
    /// # Errors
    ///
    /// As [`ensure_fresh`](Self::ensure_fresh).
    pub async fn validate(&self, id: &SessionId) -> Result<String, Error> {
        let record = self.ensure_fresh(id).await?;
        match self.vault.decrypt(&record.access_token) {
            Ok(token) => Ok(token),
            Err(Error::InvalidCiphertext) => {
                tracing::warn!(session_id = %id, "stored access token undecryptable; discarding session");
                self.discard(id).await;
                Err(Error::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Log out: best-effort revoke at the provider, unconditional local
    /// deletion. Never fails — a dead provider must not keep a session alive.
    pub async fn logout(&self, id: &SessionId) {
        if let Ok(Some(record)) = self.load(id).await {
            if let Ok(refresh_token) = self.vault.decrypt(&record.refresh_token) {
                // Result deliberately discarded: local logout is unconditional.
                if let Err(e) = self.provider.revoke(&refresh_token).await {
                    tracing::debug!(session_id = %id, error = %e, "provider revoke failed during logout");
                }
            }
        }
        self.discard(id).await;
        tracing::info!(session_id = %id, "session deleted");
    }

    async fn refresh_session(&self, id: &SessionId) -> Result<SessionRecord, Error> {
        let mut record = self.load(id).await?.ok_or(Error::NoSession)?;
        let now = OffsetDateTime::now_utc();
        if !record.needs_refresh(now) {
            // A concurrent caller refreshed while we waited for the lock.
            return Ok(record);
        }

        let refresh_token = match self.vault.decrypt(&record.refresh_token) {
            Ok(token) => token,
            Err(Error::InvalidCiphertext) => {
                tracing::warn!(session_id = %id, "stored refresh token undecryptable; discarding session");
                self.discard(id).await;
                return Err(Error::SessionExpired);
            }
            Err(e) => return Err(e),
        };

        let grant = match self.refresh_with_retry(&refresh_token).await {
            Ok(grant) => grant,
            Err(Error::UpstreamRejected { status, detail, .. }) => {
                tracing::info!(session_id = %id, status, detail = %detail, "provider rejected refresh; session expired");
                self.discard(id).await;
                return Err(Error::SessionExpired);
            }
            // Unavailability leaves the record in place for a later retry.
            Err(e) => return Err(e),
        };

        // Providers that do not rotate refresh tokens omit the field; the
        // stored token stays valid in that case.
        let next_refresh = grant.refresh_token.clone().unwrap_or(refresh_token);
        record.access_token = self.vault.encrypt(&grant.access_token)?;
        record.refresh_token = self.vault.encrypt(&next_refresh)?;
        record.access_token_expires_at = now + self.access_token_lifetime(&grant);
        self.persist(id, &record).await?;
        tracing::debug!(session_id = %id, "access token refreshed");
        Ok(record)
    }

    async fn refresh_with_retry(&self, refresh_token: &str) -> Result<TokenGrant, Error> {
        let mut attempts = 0;
        loop {
            match self.provider.refresh(refresh_token).await {
                Err(Error::UpstreamUnavailable { operation }) if attempts < REFRESH_RETRIES => {
                    attempts += 1;
                    tracing::debug!(operation, attempts, "provider unreachable, retrying refresh");
                }
                other => return other,
            }
        }
    }

    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, Error> {
        let Some(raw) = self.store.get(&session_key(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "corrupted session record; discarding");
                self.discard(id).await;
                Ok(None)
            }
        }
    }

    async fn persist(&self, id: &SessionId, record: &SessionRecord) -> Result<(), Error> {
        let raw = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("session serialization failed: {e}")))?;
        self.store
            .put(&session_key(id), &raw, self.session_ttl)
            .await
    }

    async fn discard(&self, id: &SessionId) {
        if let Err(e) = self.store.delete(&session_key(id)).await {
            tracing::warn!(session_id = %id, error = %e, "failed to delete session");
        }
    }

    async fn refresh_lock(&self, id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    async fn release_refresh_lock(&self, id: &SessionId, held: Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().await;
        // Map entry + our clone are the only handles left: nobody is waiting.
        if Arc::strong_count(&held) <= 2 {
            locks.remove(id);
        }
    }

    fn access_token_lifetime(&self, grant: &TokenGrant) -> time::Duration {
        grant.expires_in.map_or(self.default_access_token_ttl, |secs| {
            time::Duration::seconds(secs as i64)
        })
    }
}
