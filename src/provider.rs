use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;

/// Identity provider configuration (realm-style OIDC endpoints).
///
/// Required fields are constructor parameters — no runtime "missing field"
/// errors.
///
/// The provider is addressed through two base URLs: `base_url` for
/// server-to-server calls (token, logout, introspection) and
/// `public_base_url` for the browser-facing authorization redirect. In
/// containerized deployments these usually differ.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) base_url: Url,
    pub(crate) public_base_url: Url,
    pub(crate) realm: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) timeout: Duration,
}

impl ProviderConfig {
    /// Create a provider configuration.
    #[must_use]
    pub fn new(
        base_url: Url,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            public_base_url: base_url.clone(),
            base_url,
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri,
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the browser-facing base URL used in the authorize redirect.
    #[must_use]
    pub fn with_public_base_url(mut self, url: Url) -> Self {
        self.public_base_url = url;
        self
    }

    /// Set a confidential-client secret, appended to all token-endpoint calls.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Override the requested OAuth2 scopes (default: `openid profile email`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Override the per-request timeout (default: 10 s).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(base: &Url, realm: &str, leaf: &str) -> Result<Url, Error> {
        format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            base.as_str().trim_end_matches('/'),
            realm,
            leaf
        )
        .parse()
        .map_err(|e| Error::Config(format!("invalid provider endpoint for realm {realm}: {e}")))
    }
}

/// Token response from the provider's token endpoint.
///
/// `refresh_token` and `expires_in` are optional on the wire; the lifecycle
/// manager decides what their absence means per grant type.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: String,
}

/// HTTP client for the identity provider.
///
/// Every call is bounded by the configured timeout. Failures are split into
/// [`Error::UpstreamRejected`] (the provider answered non-2xx) and
/// [`Error::UpstreamUnavailable`] (transport/timeout) — callers handle the
/// two very differently.
pub struct ProviderClient {
    config: ProviderConfig,
    http: reqwest::Client,
    authorize_endpoint: Url,
    token_endpoint: Url,
    logout_endpoint: Url,
    introspect_endpoint: Url,
}

impl ProviderClient {
    /// Build a client, resolving all realm endpoints up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoints cannot be formed or the
    /// HTTP client cannot be constructed.
    pub fn new(config: ProviderConfig) -> Result<Self, Error> {
        let authorize_endpoint =
            ProviderConfig::endpoint(&config.public_base_url, &config.realm, "auth")?;
        let token_endpoint = ProviderConfig::endpoint(&config.base_url, &config.realm, "token")?;
        let logout_endpoint = ProviderConfig::endpoint(&config.base_url, &config.realm, "logout")?;
        let introspect_endpoint =
            ProviderConfig::endpoint(&config.base_url, &config.realm, "token/introspect")?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            authorize_endpoint,
            token_endpoint,
            logout_endpoint,
            introspect_endpoint,
        })
    }

    /// The browser-facing authorization URL for one login attempt.
    #[must_use]
    pub fn authorize_url(&self, code_challenge: &str, state: &str) -> String {
        let scope = self.config.scopes.join(" ");
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url.into()
    }

    /// Exchange an authorization code for tokens using PKCE.
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamRejected`] on a non-2xx response,
    /// [`Error::UpstreamUnavailable`] on transport failure.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenGrant, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.token_request("code exchange", &params).await
    }

    /// Obtain a fresh token pair from a refresh token.
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamRejected`] when the provider refuses the refresh
    /// token (revoked, expired, already used),
    /// [`Error::UpstreamUnavailable`] on transport failure.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.token_request("token refresh", &params).await
    }

    /// Invalidate a refresh token at the provider.
    ///
    /// Logout swallows this result on purpose; the signature keeps the
    /// failure visible at the call site.
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamRejected`] / [`Error::UpstreamUnavailable`] as above.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), Error> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .post_form("token revocation", &self.logout_endpoint, &params)
            .await?;
        Self::ensure_success("token revocation", response).await?;
        Ok(())
    }

    /// Ask the provider about a token's validity and claims.
    ///
    /// Diagnostic only — nothing in the session lifecycle depends on it.
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamRejected`] / [`Error::UpstreamUnavailable`] as above.
    pub async fn introspect(&self, token: &str) -> Result<serde_json::Value, Error> {
        let operation = "token introspection";
        let params = [
            ("token", token),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .post_form(operation, &self.introspect_endpoint, &params)
            .await?;
        let response = Self::ensure_success(operation, response).await?;
        response
            .json()
            .await
            .map_err(|e| malformed_response(operation, &e))
    }

    async fn token_request(
        &self,
        operation: &'static str,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, Error> {
        let response = self.post_form(operation, &self.token_endpoint, params).await?;
        let response = Self::ensure_success(operation, response).await?;
        response
            .json()
            .await
            .map_err(|e| malformed_response(operation, &e))
    }

    async fn post_form(
        &self,
        operation: &'static str,
        url: &Url,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response, Error> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        self.http
            .post(url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, operation, "provider request failed");
                Error::UpstreamUnavailable { operation }
            })
    }

    /// Checks the response status; non-2xx becomes `UpstreamRejected` with
    /// the provider's body as detail.
    async fn ensure_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(Error::UpstreamRejected {
            operation,
            status,
            detail,
        })
    }
}

fn malformed_response(operation: &'static str, e: &reqwest::Error) -> Error {
    Error::UpstreamRejected {
        operation,
        status: 200,
        detail: format!("malformed response body: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str) -> ProviderConfig {
        ProviderConfig::new(
            base.parse().unwrap(),
            "test-realm",
            "test-client",
            "http://broker.local/auth/callback".parse().unwrap(),
        )
    }

    fn token_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 300,
            "token_type": "Bearer"
        })
    }

    #[test]
    fn authorize_url_carries_pkce_parameters() {
        let client = ProviderClient::new(config("http://idp.internal:8080")).unwrap();
        let url = client.authorize_url("challenge-abc", "state-xyz");

        assert!(url.starts_with(
            "http://idp.internal:8080/realms/test-realm/protocol/openid-connect/auth?"
        ));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("code_challenge=challenge-abc"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-xyz"));
        assert!(url.contains("scope=openid+profile+email"));
    }

    #[test]
    fn authorize_url_uses_public_base() {
        let cfg = config("http://idp.internal:8080")
            .with_public_base_url("http://localhost:8080".parse().unwrap());
        let client = ProviderClient::new(cfg).unwrap();
        assert!(
            client
                .authorize_url("c", "s")
                .starts_with("http://localhost:8080/realms/test-realm/")
        );
    }

    #[tokio::test]
    async fn exchange_code_parses_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/test-realm/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=ver"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new(config(&server.uri())).unwrap();
        let grant = client.exchange_code("abc", "ver").await.unwrap();
        assert_eq!(grant.access_token, "at-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(grant.expires_in, Some(300));
    }

    #[tokio::test]
    async fn client_secret_is_appended_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/test-realm/protocol/openid-connect/token"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ProviderClient::new(config(&server.uri()).with_client_secret("s3cret")).unwrap();
        client.refresh("rt-0").await.unwrap();
    }

    #[tokio::test]
    async fn non_2xx_is_upstream_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/test-realm/protocol/openid-connect/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let client = ProviderClient::new(config(&server.uri())).unwrap();
        match client.refresh("rt-dead").await {
            Err(Error::UpstreamRejected { status, detail, .. }) => {
                assert_eq!(status, 400);
                assert!(detail.contains("invalid_grant"));
            }
            other => panic!("expected UpstreamRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/test-realm/protocol/openid-connect/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let cfg = config(&server.uri()).with_timeout(Duration::from_millis(50));
        let client = ProviderClient::new(cfg).unwrap();
        assert!(matches!(
            client.refresh("rt-1").await,
            Err(Error::UpstreamUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn connection_failure_is_upstream_unavailable() {
        // Nothing listens here.
        let cfg = config("http://127.0.0.1:9").with_timeout(Duration::from_millis(200));
        let client = ProviderClient::new(cfg).unwrap();
        assert!(matches!(
            client.exchange_code("abc", "ver").await,
            Err(Error::UpstreamUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn revoke_maps_non_2xx_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/test-realm/protocol/openid-connect/logout"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = ProviderClient::new(config(&server.uri())).unwrap();
        assert!(matches!(
            client.revoke("rt-1").await,
            Err(Error::UpstreamRejected { .. })
        ));
    }

    #[tokio::test]
    async fn introspect_returns_claims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/realms/test-realm/protocol/openid-connect/token/introspect",
            ))
            .and(body_string_contains("token=at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "active": true,
                "sub": "user-1"
            })))
            .mount(&server)
            .await;

        let client = ProviderClient::new(config(&server.uri())).unwrap();
        let claims = client.introspect("at-1").await.unwrap();
        assert_eq!(claims["active"], serde_json::json!(true));
        assert_eq!(claims["sub"], serde_json::json!("user-1"));
    }

    #[tokio::test]
    async fn malformed_token_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/test-realm/protocol/openid-connect/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let client = ProviderClient::new(config(&server.uri())).unwrap();
        assert!(matches!(
            client.refresh("rt-1").await,
            Err(Error::UpstreamRejected { .. })
        ));
    }
}
