//! Server-side session flows: sign-up, sign-in and sign-out.
//!
//! These endpoints drive the identity provider and the lifecycle handlers in
//! one request, so a browser client only deals with a session cookie.
//!
//! - `POST /auth/sign-up` creates the provider account, then the local
//!   record. A failed insert deletes the provider account again.
//! - `POST /auth/sign-in` checks credentials, rejects blocked accounts and
//!   records the login.
//! - `POST /auth/sign-out` ends the session and clears the cookie.

use axum::{
    Json, Router,
    extract::{Extension, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::gate::{Caller, SessionToken, find_local_record};
use super::routes::{AppState, RegisterResponse, register_user, touch_session};
use super::storage::{NewUser, UserStorage};
use crate::config::Config;
use crate::identity::IdentityProvider;

#[derive(Debug, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub success: bool,
    pub access_token: String,
    pub last_login: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignOutResponse {
    pub success: bool,
}

/// Create routes for the session flows.
pub fn session_routes<U, P>() -> Router<AppState<U, P>>
where
    U: UserStorage,
    P: IdentityProvider,
{
    Router::new()
        .route("/auth/sign-up", post(sign_up::<U, P>))
        .route("/auth/sign-in", post(sign_in::<U, P>))
        .route("/auth/sign-out", post(sign_out::<U, P>))
}

fn session_cookie(config: &Config, access_token: String) -> Cookie<'static> {
    Cookie::build((config.session_cookie().to_owned(), access_token))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax)
        .secure(!config.is_local())
        .build()
}

#[tracing::instrument(skip_all)]
async fn sign_up<U, P>(
    State(state): State<AppState<U, P>>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if payload.name.trim().is_empty()
        || payload.email.trim().is_empty()
        || payload.password.is_empty()
    {
        return Err(ApiError::BadRequest(
            "Name, email and password are required".to_owned(),
        ));
    }

    let identity = state
        .identity
        .sign_up(&payload.email, &payload.password)
        .await
        .map_err(|e| {
            tracing::warn!("Identity provider sign-up failed: {}", e);
            ApiError::from(e)
        })?;

    let new_user = NewUser::new(payload.name, payload.email)
        .with_auth_id(identity.id)
        .with_description(payload.description);

    match register_user(&state.user_storage, new_user).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "Signed up user");
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    success: true,
                    user: user.into(),
                }),
            ))
        }
        Err(err) => {
            // Don't leave a provider account without a local record.
            if let Err(e) = state.identity.admin_delete_user(identity.id).await {
                tracing::error!(
                    auth_id = %identity.id,
                    "Failed to roll back provider account after sign-up error: {}",
                    e
                );
            }
            Err(err)
        }
    }
}

#[tracing::instrument(skip_all)]
async fn sign_in<U, P>(
    State(state): State<AppState<U, P>>,
    Extension(config): Extension<Config>,
    jar: CookieJar,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email and password are required".to_owned(),
        ));
    }

    let session = state
        .identity
        .sign_in(&payload.email, &payload.password)
        .await
        .map_err(ApiError::from)?;

    let user = match find_local_record(&state.user_storage, &session.identity).await {
        Ok(Some(user)) if !user.status.is_blocked() => user,
        outcome => {
            end_rejected_session(&state.identity, &session.access_token).await;
            return Err(match outcome {
                Ok(Some(_)) => {
                    tracing::warn!(auth_id = %session.identity.id, "Blocked user tried to sign in");
                    ApiError::Forbidden(
                        "Your account has been deactivated. Please contact support.".to_owned(),
                    )
                }
                Ok(None) => ApiError::unauthenticated(),
                Err(e) => e.into(),
            });
        }
    };

    let caller = Caller {
        user,
        identity: session.identity,
        access_token: session.access_token,
    };
    let last_login = match touch_session(&state.user_storage, &caller).await {
        Ok(last_login) => last_login,
        Err(e) => {
            end_rejected_session(&state.identity, &caller.access_token).await;
            return Err(e);
        }
    };

    let jar = jar.add(session_cookie(&config, caller.access_token.clone()));
    Ok((
        jar,
        Json(SignInResponse {
            success: true,
            access_token: caller.access_token,
            last_login,
        }),
    ))
}

/// The provider session must not outlive a rejected sign-in.
async fn end_rejected_session<P: IdentityProvider>(identity: &P, access_token: &str) {
    if let Err(e) = identity.sign_out(access_token).await {
        tracing::warn!("Failed to end rejected session: {}", e);
    }
}

#[tracing::instrument(skip_all)]
async fn sign_out<U, P>(
    State(state): State<AppState<U, P>>,
    Extension(config): Extension<Config>,
    jar: CookieJar,
    SessionToken(access_token): SessionToken,
) -> Result<impl IntoResponse, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    state.identity.sign_out(&access_token).await.map_err(|e| {
        tracing::error!("Failed to sign out: {}", e);
        ApiError::from(e)
    })?;

    let jar = jar.remove(Cookie::build(config.session_cookie().to_owned()).path("/"));
    Ok((jar, Json(SignOutResponse { success: true })))
}
