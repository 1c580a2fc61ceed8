use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::provider::ProviderConfig;

/// Broker settings.
///
/// Constructed once at startup and handed to every component explicitly — no
/// ambient singletons, so tests substitute stores and providers freely.
///
/// Use [`from_env()`](Settings::from_env) for convention-based setup, or
/// [`new()`](Settings::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: ProviderConfig,
    /// Base64-encoded 32-byte AES-256-GCM key for the token vault.
    pub encryption_key: String,
    pub redis_url: String,
    pub cookie_name: String,
    pub secure_cookies: bool,
    /// Session lifetime: store TTL and cookie `Max-Age`.
    pub session_ttl: Duration,
    /// Lifetime of a PKCE state→verifier binding.
    pub pkce_ttl: Duration,
    /// Access-token lifetime assumed when the provider omits `expires_in`.
    pub default_access_token_ttl: Duration,
    pub frontend_url: Url,
    pub bind_addr: SocketAddr,
}

impl Settings {
    /// Create settings with the required provider configuration and vault key.
    ///
    /// All optional fields use production defaults. Override with `with_*`
    /// methods.
    #[must_use]
    pub fn new(provider: ProviderConfig, encryption_key: impl Into<String>) -> Self {
        Self {
            provider,
            encryption_key: encryption_key.into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            cookie_name: "authgate_session".into(),
            secure_cookies: true,
            session_ttl: Duration::from_secs(3600),
            pkce_ttl: Duration::from_secs(300),
            default_access_token_ttl: Duration::from_secs(120),
            frontend_url: Url::parse("http://localhost:3000").expect("valid default URL"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
        }
    }

    /// Create settings from environment variables.
    ///
    /// # Required env vars
    /// - `PROVIDER_REALM`: identity provider realm
    /// - `PROVIDER_CLIENT_ID`: OAuth2 client ID
    /// - `OAUTH_REDIRECT_URI`: callback URI registered at the provider
    /// - `TOKEN_ENCRYPTION_KEY`: base64-encoded 32-byte vault key
    ///
    /// # Optional env vars
    /// - `PROVIDER_URL` / `PROVIDER_PUBLIC_URL`: server-to-server and
    ///   browser-facing base URLs
    /// - `PROVIDER_CLIENT_SECRET`, `PROVIDER_TIMEOUT_SECS`
    /// - `REDIS_URL`, `SESSION_COOKIE_NAME`, `SESSION_TTL_SECS`,
    ///   `PKCE_TTL_SECS`, `ACCESS_TOKEN_TTL_SECS`
    /// - `FRONTEND_URL`, `BIND_ADDR`
    /// - `DEV_MODE`: `"1"`/`"true"` drops the `Secure` cookie attribute for
    ///   plain-HTTP development
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required vars are missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, Error> {
        let realm = required("PROVIDER_REALM")?;
        let client_id = required("PROVIDER_CLIENT_ID")?;
        let redirect_uri = parse_url("OAUTH_REDIRECT_URI", &required("OAUTH_REDIRECT_URI")?)?;
        let encryption_key = required("TOKEN_ENCRYPTION_KEY")?;

        let base_url = parse_url(
            "PROVIDER_URL",
            &env_or("PROVIDER_URL", "http://keycloak:8080"),
        )?;
        let public_base_url = parse_url(
            "PROVIDER_PUBLIC_URL",
            &env_or("PROVIDER_PUBLIC_URL", "http://localhost:8080"),
        )?;

        let mut provider = ProviderConfig::new(base_url, realm, client_id, redirect_uri)
            .with_public_base_url(public_base_url);
        if let Ok(secret) = std::env::var("PROVIDER_CLIENT_SECRET") {
            if !secret.is_empty() {
                provider = provider.with_client_secret(secret);
            }
        }
        if let Some(secs) = parse_secs("PROVIDER_TIMEOUT_SECS")? {
            provider = provider.with_timeout(Duration::from_secs(secs));
        }

        let dev_mode = matches!(std::env::var("DEV_MODE").as_deref(), Ok("1") | Ok("true"));

        let mut settings = Self::new(provider, encryption_key)
            .with_redis_url(env_or("REDIS_URL", "redis://127.0.0.1:6379"))
            .with_cookie_name(env_or("SESSION_COOKIE_NAME", "authgate_session"))
            .with_secure_cookies(!dev_mode)
            .with_frontend_url(parse_url(
                "FRONTEND_URL",
                &env_or("FRONTEND_URL", "http://localhost:3000"),
            )?);

        if let Some(secs) = parse_secs("SESSION_TTL_SECS")? {
            settings = settings.with_session_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_secs("PKCE_TTL_SECS")? {
            settings = settings.with_pkce_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_secs("ACCESS_TOKEN_TTL_SECS")? {
            settings = settings.with_default_access_token_ttl(Duration::from_secs(secs));
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            let addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("BIND_ADDR: {e}")))?;
            settings = settings.with_bind_addr(addr);
        }

        Ok(settings)
    }

    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_pkce_ttl(mut self, ttl: Duration) -> Self {
        self.pkce_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_default_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.default_access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_frontend_url(mut self, url: Url) -> Self {
        self.frontend_url = url;
        self
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

fn required(name: &'static str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, Error> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{name}: {e}")))
}

fn parse_secs(name: &'static str) -> Result<Option<u64>, Error> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}
