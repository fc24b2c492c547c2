//! Marketplace OAuth handlers.
//!
//! - `GET /oauth/authorize` starts the flow and pins the state in a cookie
//! - `POST /oauth/exchange` finishes it from the client's callback page

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use service_core::{
    axum::{
        extract::{rejection::JsonRejection, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Redirect, Response},
        Json,
    },
    error::AppError,
};
use validator::Validate;

use crate::{
    dtos::oauth::{ExchangeErrorResponse, ExchangeRequestBody, ExchangeResponse},
    services::{ClientHint, EntitlementError, ExchangeRequest},
    AppState,
};

pub const STATE_COOKIE: &str = "oauth_state";

/// Redirect to the marketplace consent screen
#[utoipa::path(
    get,
    path = "/oauth/authorize",
    responses(
        (status = 303, description = "Redirect to the marketplace authorize URL"),
        (status = 503, description = "Marketplace OAuth is not configured")
    ),
    tag = "OAuth"
)]
pub async fn authorize(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    if !state.oauth.is_configured() {
        return Err(EntitlementError::NotConfigured("marketplace OAuth").into());
    }

    let state_val = {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    };
    let authorize_url = state.oauth.authorize_url(&state_val);

    let jar = jar.add(
        Cookie::build((STATE_COOKIE, state_val))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::minutes(10))
            .build(),
    );

    Ok((jar, Redirect::to(&authorize_url)))
}

/// Exchange an authorization code for the member's profile and tier
#[utoipa::path(
    post,
    path = "/oauth/exchange",
    request_body = ExchangeRequestBody,
    responses(
        (status = 200, description = "Exchange completed", body = ExchangeResponse),
        (
            status = 400,
            description = "Bad request or state mismatch",
            body = ExchangeErrorResponse
        ),
        (
            status = 502,
            description = "Marketplace platform failed",
            body = ExchangeErrorResponse
        ),
        (
            status = 503,
            description = "Marketplace OAuth is not configured",
            body = ExchangeErrorResponse
        )
    ),
    tag = "OAuth"
)]
#[tracing::instrument(skip_all)]
pub async fn exchange(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    payload: Result<Json<ExchangeRequestBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(e) => return failure(StatusCode::BAD_REQUEST, "invalid_request", e.body_text()),
    };
    if let Err(e) = body.validate() {
        return failure(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let request = ExchangeRequest {
        code: body.code,
        provided_state: body.state,
        expected_state: jar.get(STATE_COOKIE).map(|c| c.value().to_string()),
        flow: body.flow,
        client: ClientHint::from_user_agent(user_agent),
    };

    match state.oauth.exchange(request).await {
        Ok(outcome) => {
            let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));
            (jar, Json(ExchangeResponse::from(outcome))).into_response()
        }
        Err(e) => {
            let reason = match &e {
                // Store details stay in the logs.
                EntitlementError::Persistence(_) => "could not record the member".to_string(),
                other => other.to_string(),
            };
            let code = e.code();
            failure(AppError::from(e).status_code(), code, reason)
        }
    }
}

fn failure(status: StatusCode, error: &str, reason: String) -> Response {
    (
        status,
        Json(ExchangeErrorResponse {
            success: false,
            error: error.to_string(),
            reason,
        }),
    )
        .into_response()
}
