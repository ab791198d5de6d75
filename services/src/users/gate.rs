//! Authorization gate for the user endpoints.
//!
//! The gate turns an inbound request into a [`Caller`]: it pulls the session
//! token from the request, asks the identity provider who it belongs to, and
//! loads the caller's local record once. Handlers receive the result through
//! one of the extractors below and never repeat the lookup.
//!
//! # Token sources
//!
//! 1. `Authorization: Bearer <token>`
//! 2. the session cookie named by `SESSION_COOKIE` (default `sb-access-token`)
//!
//! # Extractors
//!
//! | extractor | requires |
//! |---|---|
//! | [`SessionToken`] | a token, not checked against the provider |
//! | [`RequireSession`] | a token the provider resolves |
//! | [`RequireCaller`] | a resolved identity bound to a local record |
//! | [`RequireActiveCaller`] | as above, and the record is not blocked |
//!
//! The gate only ever inspects the caller; the status of the users a request
//! targets is irrelevant here.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use super::error::ApiError;
use super::routes::AppState;
use super::storage::{StoredUser, UserStorage, UserStorageError};
use crate::config::Config;
use crate::identity::{Identity, IdentityError, IdentityProvider};

/// Why the gate turned a request away.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("no valid session")]
    NoSession,

    #[error("session is not bound to a local user")]
    NoLocalRecord,

    #[error("caller is blocked")]
    Blocked,

    #[error(transparent)]
    Store(#[from] UserStorageError),

    #[error(transparent)]
    Provider(#[from] IdentityError),
}

/// How much the gate demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Resolved identity with a local record.
    Authenticated,
    /// Additionally, the local record must be `active`.
    Active,
}

/// The authenticated caller, resolved once per request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: StoredUser,
    pub identity: Identity,
    pub access_token: String,
}

/// Reads the session token from the request headers.
pub fn extract_session_token(parts: &Parts, cookie_name: &str) -> Option<String> {
    if let Some(Authorization(bearer)) = parts.headers.typed_get::<Authorization<Bearer>>() {
        let token = bearer.token().trim();
        if !token.is_empty() {
            return Some(token.to_owned());
        }
    }

    CookieJar::from_headers(&parts.headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().trim().to_owned())
        .filter(|token| !token.is_empty())
}

/// Resolves the identity behind `access_token`.
#[tracing::instrument(skip_all)]
pub async fn resolve_identity<P: IdentityProvider>(
    identity: &P,
    access_token: &str,
) -> Result<Identity, GateError> {
    match identity.get_user(access_token).await {
        Ok(Some(resolved)) => Ok(resolved),
        Ok(None) => Err(GateError::NoSession),
        Err(e) => {
            tracing::error!("Identity provider failed to resolve session: {}", e);
            Err(GateError::Provider(e))
        }
    }
}

/// Finds the local record bound to `identity`: by `auth_id`, then by email.
///
/// The email fallback only matches legacy records that carry no `auth_id`; a
/// record bound to another provider account is never handed out.
pub async fn find_local_record<U: UserStorage>(
    storage: &U,
    identity: &Identity,
) -> Result<Option<StoredUser>, GateError> {
    if let Some(user) = storage.get_user_by_auth_id(identity.id).await? {
        return Ok(Some(user));
    }
    let Some(email) = identity.email.as_deref() else {
        return Ok(None);
    };
    match storage.get_user_by_email(email).await? {
        Some(user) if user.auth_id.is_none() => Ok(Some(user)),
        Some(user) => {
            tracing::warn!(
                user_id = %user.id,
                auth_id = %identity.id,
                "Email matches a record bound to another account"
            );
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Runs the full gate for `access_token`.
#[tracing::instrument(skip_all, fields(mode = ?mode))]
pub async fn authorize<U, P>(
    state: &AppState<U, P>,
    access_token: &str,
    mode: GateMode,
) -> Result<Caller, GateError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let identity = resolve_identity(&state.identity, access_token).await?;

    let user = find_local_record(&state.user_storage, &identity)
        .await
        .inspect_err(|e| tracing::error!("Failed to load caller record: {}", e))?
        .ok_or(GateError::NoLocalRecord)?;

    if mode == GateMode::Active && user.status.is_blocked() {
        tracing::warn!(user_id = %user.id, "Blocked caller rejected");
        return Err(GateError::Blocked);
    }

    Ok(Caller {
        user,
        identity,
        access_token: access_token.to_owned(),
    })
}

fn session_token(parts: &Parts) -> Result<String, ApiError> {
    let config = parts.extensions.get::<Config>().ok_or_else(|| {
        tracing::error!("Config extension missing from request");
        ApiError::Internal("Server configuration error".to_owned())
    })?;

    extract_session_token(parts, config.session_cookie()).ok_or_else(ApiError::unauthenticated)
}

/// The raw session token, without asking the identity provider about it.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        session_token(parts).map(SessionToken)
    }
}

/// A session the identity provider recognises. No local record required.
#[derive(Debug, Clone)]
pub struct RequireSession {
    pub identity: Identity,
    pub access_token: String,
}

impl<U, P> FromRequestParts<AppState<U, P>> for RequireSession
where
    U: UserStorage,
    P: IdentityProvider,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<U, P>,
    ) -> Result<Self, Self::Rejection> {
        let access_token = session_token(parts)?;
        let identity = resolve_identity(&state.identity, &access_token).await?;
        Ok(RequireSession {
            identity,
            access_token,
        })
    }
}

/// An authenticated caller with a local record, whatever its status.
#[derive(Debug, Clone)]
pub struct RequireCaller(pub Caller);

impl<U, P> FromRequestParts<AppState<U, P>> for RequireCaller
where
    U: UserStorage,
    P: IdentityProvider,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<U, P>,
    ) -> Result<Self, Self::Rejection> {
        let access_token = session_token(parts)?;
        let caller = authorize(state, &access_token, GateMode::Authenticated).await?;
        Ok(RequireCaller(caller))
    }
}

/// An authenticated caller whose record is `active`.
#[derive(Debug, Clone)]
pub struct RequireActiveCaller(pub Caller);

impl<U, P> FromRequestParts<AppState<U, P>> for RequireActiveCaller
where
    U: UserStorage,
    P: IdentityProvider,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<U, P>,
    ) -> Result<Self, Self::Rejection> {
        let access_token = session_token(parts)?;
        let caller = authorize(state, &access_token, GateMode::Active).await?;
        Ok(RequireActiveCaller(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MockIdentityProvider;
    use crate::users::storage::{MockUserStorage, UserStatus};
    use axum::http::{Request, header::AUTHORIZATION, header::COOKIE};
    use uuid::Uuid;

    fn parts_with(headers: &[(axum::http::HeaderName, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/users");
        for (name, value) in headers {
            builder = builder.header(name.clone(), *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_extract_bearer_token() {
        let parts = parts_with(&[(AUTHORIZATION, "Bearer abc.def")]);
        assert_eq!(
            extract_session_token(&parts, "sb-access-token").as_deref(),
            Some("abc.def")
        );
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let parts = parts_with(&[(COOKIE, "theme=dark; sb-access-token=from-cookie")]);
        assert_eq!(
            extract_session_token(&parts, "sb-access-token").as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_bearer_wins_over_cookie() {
        let parts = parts_with(&[
            (AUTHORIZATION, "Bearer from-header"),
            (COOKIE, "sb-access-token=from-cookie"),
        ]);
        assert_eq!(
            extract_session_token(&parts, "sb-access-token").as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_extract_token_missing() {
        let parts = parts_with(&[(AUTHORIZATION, "Basic dXNlcjpwdw=="), (COOKIE, "other=1")]);
        assert_eq!(extract_session_token(&parts, "sb-access-token"), None);
    }

    fn state() -> AppState<MockUserStorage, MockIdentityProvider> {
        AppState::new(MockUserStorage::new(), MockIdentityProvider::new())
    }

    #[tokio::test]
    async fn test_authorize_unknown_token() {
        let state = state();
        let result = authorize(&state, "nope", GateMode::Authenticated).await;
        assert!(matches!(result, Err(GateError::NoSession)));
    }

    #[tokio::test]
    async fn test_authorize_without_local_record() {
        let state = state();
        let auth_id = state.identity.register_account("ghost@example.com", "pw");
        let token = state.identity.issue_session(auth_id);

        let result = authorize(&state, &token, GateMode::Authenticated).await;
        assert!(matches!(result, Err(GateError::NoLocalRecord)));
    }

    #[tokio::test]
    async fn test_authorize_falls_back_to_email() {
        let identity = MockIdentityProvider::new();
        let auth_id = identity.register_account("legacy@example.com", "pw");
        let token = identity.issue_session(auth_id);
        let legacy = StoredUser::new("Legacy", "legacy@example.com");
        let state = AppState::new(MockUserStorage::new().with_user(legacy.clone()), identity);

        let caller = authorize(&state, &token, GateMode::Authenticated)
            .await
            .unwrap();
        assert_eq!(caller.user.id, legacy.id);
        assert_eq!(caller.identity.id, auth_id);
    }

    #[tokio::test]
    async fn test_email_fallback_ignores_record_bound_elsewhere() {
        let identity = MockIdentityProvider::new();
        let auth_id = identity.register_account("alice@example.com", "pw");
        let token = identity.issue_session(auth_id);
        let stale = StoredUser::new("Alice", "alice@example.com").with_auth_id(Uuid::new_v4());
        let state = AppState::new(MockUserStorage::new().with_user(stale), identity);

        for mode in [GateMode::Authenticated, GateMode::Active] {
            let result = authorize(&state, &token, mode).await;
            assert!(matches!(result, Err(GateError::NoLocalRecord)), "{mode:?}");
        }
    }

    #[tokio::test]
    async fn test_blocked_caller_only_rejected_in_active_mode() {
        let identity = MockIdentityProvider::new();
        let auth_id = identity.register_account("bob@example.com", "pw");
        let token = identity.issue_session(auth_id);
        let bob = StoredUser::new("Bob", "bob@example.com")
            .with_auth_id(auth_id)
            .with_status(UserStatus::Blocked);
        let state = AppState::new(MockUserStorage::new().with_user(bob), identity);

        assert!(
            authorize(&state, &token, GateMode::Authenticated)
                .await
                .is_ok()
        );
        assert!(matches!(
            authorize(&state, &token, GateMode::Active).await,
            Err(GateError::Blocked)
        ));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let state = state();
        let auth_id = state.identity.register_account("alice@example.com", "pw");
        let token = state.identity.issue_session(auth_id);
        state.user_storage.set_unavailable(true);

        let result = authorize(&state, &token, GateMode::Authenticated).await;
        assert!(matches!(result, Err(GateError::Store(_))));
    }
}
