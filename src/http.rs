use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Json, Router};
use axum::routing::get;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::cookies;
use crate::error::Error;
use crate::session::SessionId;
use crate::state::AppState;

/// Build the broker router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", get(logout).post(logout))
        .route("/auth/session", get(session_info))
        .route("/auth/validate", get(validate))
        .route("/health", get(health))
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

async fn login(State(state): State<AppState>) -> Result<Redirect, Error> {
    let authorize_url = state.broker.begin_login().await?;
    Ok(Redirect::to(&authorize_url))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), Response> {
    if let Some(error) = &params.error {
        let desc = params
            .error_description
            .as_deref()
            .unwrap_or("unknown error");
        tracing::warn!(error = %error, description = %desc, "authorization denied by provider");
        return Err(error_redirect(&state, error));
    }

    let code = params
        .code
        .ok_or_else(|| Error::InvalidState.into_response())?;
    let received_state = params
        .state
        .ok_or_else(|| Error::InvalidState.into_response())?;

    let session_id = state
        .broker
        .complete_login(&code, &received_state)
        .await
        .map_err(IntoResponse::into_response)?;

    let cookie = cookies::session_cookie(
        &state.cookie_name,
        session_id.as_str(),
        state.session_ttl,
        state.secure_cookies,
    );
    Ok((jar.add(cookie), Redirect::to(state.frontend_url.as_str())))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(&state.cookie_name) {
        let session_id = SessionId::from(cookie.value().to_string());
        state.broker.logout(&session_id).await;
    }
    (
        jar.remove(cookies::clear_session_cookie(&state.cookie_name)),
        Redirect::to(state.frontend_url.as_str()),
    )
}

// ── Session info ───────────────────────────────────────────────────

#[derive(Serialize)]
struct SessionInfoBody {
    authenticated: bool,
    session_valid_until: String,
}

async fn session_info(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionInfoBody>), Error> {
    let session_id = session_from_cookie(&state, &jar)?;
    let (new_id, status) = state.broker.session_info(&session_id).await?;

    let body = SessionInfoBody {
        authenticated: status.authenticated,
        session_valid_until: status
            .session_valid_until
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| Error::Internal(format!("timestamp formatting failed: {e}")))?,
    };
    let cookie = cookies::session_cookie(
        &state.cookie_name,
        new_id.as_str(),
        state.session_ttl,
        state.secure_cookies,
    );
    Ok((jar.add(cookie), Json(body)))
}

// ── Validate ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ValidateBody {
    access_token: String,
}

/// Returns the raw access token for downstream services.
///
/// Deployment precondition: this route must be reachable only from the
/// internal network — the response carries token material and nothing in the
/// token enforces the restriction.
async fn validate(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<ValidateBody>, Error> {
    let session_id = session_from_cookie(&state, &jar)?;
    let access_token = state.broker.validate(&session_id).await?;
    Ok(Json(ValidateBody { access_token }))
}

// ── Health ─────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ── Helpers ────────────────────────────────────────────────────────

fn session_from_cookie(state: &AppState, jar: &CookieJar) -> Result<SessionId, Error> {
    jar.get(&state.cookie_name)
        .map(|cookie| SessionId::from(cookie.value().to_string()))
        .ok_or(Error::NoSession)
}

fn error_redirect(state: &AppState, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{}?error={encoded}", state.frontend_url)).into_response()
}
