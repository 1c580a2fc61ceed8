use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::broker::SessionBroker;
use crate::config::Settings;

/// Shared state for the HTTP handlers.
///
/// Built once at startup from [`Settings`] and injected into the router;
/// handlers never reach for ambient globals, so tests can assemble a state
/// around an in-memory store and a mock provider.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<SessionBroker>,
    pub cookie_name: String,
    pub secure_cookies: bool,
    pub session_ttl: Duration,
    pub frontend_url: Url,
}

impl AppState {
    #[must_use]
    pub fn new(broker: Arc<SessionBroker>, settings: &Settings) -> Self {
        Self {
            broker,
            cookie_name: settings.cookie_name.clone(),
            secure_cookies: settings.secure_cookies,
            session_ttl: settings.session_ttl,
            frontend_url: settings.frontend_url.clone(),
        }
    }
}
