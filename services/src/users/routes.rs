//! HTTP routes for the user lifecycle.
//!
//! | Method | Path | Gate |
//! |---|---|---|
//! | POST | `/users/register` | none |
//! | POST | `/users/login` | authenticated caller |
//! | GET | `/users` | authenticated caller |
//! | DELETE | `/users?ids=a,b,c` | authenticated caller |
//! | GET | `/users/status` | resolved session |
//! | PATCH | `/users/status` | active caller |
//!
//! Bulk operations are not atomic across ids. Both the status change and the
//! delete report an outcome per requested id, so a partial failure is visible
//! to the client instead of being folded into one status code.

use std::collections::HashSet;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::gate::{Caller, RequireActiveCaller, RequireCaller, RequireSession, find_local_record};
use super::storage::{NewUser, StoredUser, UserStatus, UserStorage};
use crate::config::Config;
use crate::identity::IdentityProvider;

/// Shared state for the user routes.
#[derive(Clone)]
pub struct AppState<U, P> {
    pub user_storage: U,
    pub identity: P,
}

impl<U, P> AppState<U, P> {
    pub fn new(user_storage: U, identity: P) -> Self {
        Self {
            user_storage,
            identity,
        }
    }
}

/// Request body for `POST /users/register`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    /// Identity-provider account the record binds to.
    pub auth_id: Uuid,
    #[serde(default)]
    pub description: Option<String>,
}

/// The public subset of a user returned on registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub status: UserStatus,
}

impl From<StoredUser> for RegisteredUser {
    fn from(user: StoredUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            status: user.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub user: RegisteredUser,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub last_login: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Local user id.
    pub id: Uuid,
    pub status: UserStatus,
}

/// Request body for `PATCH /users/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub ids: Vec<Uuid>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOutcome {
    Updated,
    NotFound,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResult {
    pub id: Uuid,
    pub outcome: StatusOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusChangeResponse {
    pub success: bool,
    pub count: usize,
    pub results: Vec<StatusResult>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUsersQuery {
    pub ids: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Local record and provider account removed.
    Deleted,
    /// Local record removed; it had no provider account.
    LocalOnly,
    /// Local record removed; the provider refused or failed to delete the account.
    ProviderFailed,
    NotFound,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResult {
    pub id: Uuid,
    pub outcome: DeleteOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DeleteResult {
    fn new(id: Uuid, outcome: DeleteOutcome) -> Self {
        Self {
            id,
            outcome,
            detail: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteUsersResponse {
    pub message: String,
    pub status: u16,
    pub results: Vec<DeleteResult>,
}

/// Create routes for the user lifecycle.
pub fn user_routes<U, P>() -> Router<AppState<U, P>>
where
    U: UserStorage,
    P: IdentityProvider,
{
    Router::new()
        .route(
            "/users",
            get(list_users::<U, P>).delete(delete_users::<U, P>),
        )
        .route("/users/register", post(register::<U, P>))
        .route("/users/login", post(login::<U, P>))
        .route(
            "/users/status",
            get(user_status::<U, P>).patch(change_status::<U, P>),
        )
}

/// Next `last_login` value: the current time, truncated to the store's
/// microsecond precision, and always strictly after `previous`.
pub fn next_login_time(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    let floor = previous + Duration::microseconds(1);
    now.max(floor)
}

/// Inserts a new active user.
pub(crate) async fn register_user<U: UserStorage>(
    storage: &U,
    new_user: NewUser,
) -> Result<StoredUser, ApiError> {
    if new_user.name.trim().is_empty() || new_user.email.trim().is_empty() {
        return Err(ApiError::BadRequest("Name and email are required".to_owned()));
    }

    storage.create_user(new_user).await.map_err(|e| {
        tracing::error!("Failed to register user: {}", e);
        ApiError::from(e)
    })
}

/// Advances the caller's `last_login` and returns the stored value.
pub(crate) async fn touch_session<U: UserStorage>(
    storage: &U,
    caller: &Caller,
) -> Result<DateTime<Utc>, ApiError> {
    let at = next_login_time(caller.user.last_login, Utc::now());

    match storage.touch_last_login(caller.identity.id, at).await {
        Ok(Some(user)) => Ok(user.last_login),
        Ok(None) => {
            tracing::warn!(user_id = %caller.user.id, "Caller record has no matching authId");
            Err(ApiError::unauthenticated())
        }
        Err(e) => {
            tracing::error!("Failed to update last login: {}", e);
            Err(e.into())
        }
    }
}

/// Splits `a,b,c` into ids, dropping blanks and duplicates.
pub fn parse_id_list(raw: &str) -> Result<Vec<Uuid>, ApiError> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = Uuid::parse_str(part)
            .map_err(|_| ApiError::BadRequest(format!("Invalid user id: {part}")))?;
        if seen.insert(id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(ApiError::BadRequest("No valid user IDs provided".to_owned()));
    }
    Ok(ids)
}

fn dedup_ids(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Handler for registering the local record of an identity-provider account.
///
/// # Request
///
/// POST /users/register
///
/// ```json
/// { "name": "Alice", "email": "alice@example.com", "authId": "…", "description": null }
/// ```
#[tracing::instrument(skip_all)]
async fn register<U, P>(
    State(state): State<AppState<U, P>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let new_user = NewUser::new(payload.name, payload.email)
        .with_auth_id(payload.auth_id)
        .with_description(payload.description);
    let user = register_user(&state.user_storage, new_user).await?;

    tracing::info!(user_id = %user.id, "Registered user");
    Ok(Json(RegisterResponse {
        success: true,
        user: user.into(),
    }))
}

/// Handler for recording a successful authentication.
#[tracing::instrument(skip_all, fields(user_id = %caller.user.id))]
async fn login<U, P>(
    State(state): State<AppState<U, P>>,
    RequireCaller(caller): RequireCaller,
) -> Result<Json<LoginResponse>, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let last_login = touch_session(&state.user_storage, &caller).await?;
    Ok(Json(LoginResponse {
        success: true,
        last_login,
    }))
}

/// Handler for listing every user, ordered by email.
#[tracing::instrument(skip_all)]
async fn list_users<U, P>(
    State(state): State<AppState<U, P>>,
    RequireCaller(_caller): RequireCaller,
) -> Result<Json<Vec<StoredUser>>, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let users = state.user_storage.list_users().await.map_err(|e| {
        tracing::error!("Failed to list users: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(users))
}

/// Handler for the caller's own status.
#[tracing::instrument(skip_all)]
async fn user_status<U, P>(
    State(state): State<AppState<U, P>>,
    session: RequireSession,
) -> Result<Json<StatusResponse>, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let user = find_local_record(&state.user_storage, &session.identity)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_owned()))?;

    Ok(Json(StatusResponse {
        id: user.id,
        status: user.status,
    }))
}

/// Handler for blocking or unblocking a set of users.
///
/// # Request
///
/// PATCH /users/status
///
/// ```json
/// { "ids": ["…", "…"], "status": "blocked" }
/// ```
#[tracing::instrument(skip_all, fields(caller_id = %caller.user.id))]
async fn change_status<U, P>(
    State(state): State<AppState<U, P>>,
    axum::extract::Extension(config): axum::extract::Extension<Config>,
    RequireActiveCaller(caller): RequireActiveCaller,
    payload: Result<Json<StatusChangeRequest>, JsonRejection>,
) -> Result<Json<StatusChangeResponse>, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let status: UserStatus = payload
        .status
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid status: {}", payload.status)))?;

    let ids = dedup_ids(payload.ids);
    if ids.is_empty() {
        return Err(ApiError::BadRequest("No user IDs provided".to_owned()));
    }

    if status.is_blocked() && !config.allow_self_block() && ids.contains(&caller.user.id) {
        return Err(ApiError::SelfActionDenied(
            "You cannot block yourself".to_owned(),
        ));
    }

    let updated = state
        .user_storage
        .set_status(&ids, status)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update user status: {}", e);
            ApiError::from(e)
        })?;

    tracing::info!(requested = ids.len(), updated = updated.len(), %status, "Changed user status");

    let results = ids
        .iter()
        .map(|id| StatusResult {
            id: *id,
            outcome: if updated.contains(id) {
                StatusOutcome::Updated
            } else {
                StatusOutcome::NotFound
            },
        })
        .collect();

    Ok(Json(StatusChangeResponse {
        success: true,
        count: updated.len(),
        results,
    }))
}

/// One pending identity-provider deletion.
struct ProviderDeletion {
    user_id: Uuid,
    email: String,
    auth_id: Option<Uuid>,
}

/// Handler for deleting a set of users and their provider accounts.
///
/// Local rows go first; provider accounts are then removed one by one and a
/// provider failure never aborts the batch.
#[tracing::instrument(skip_all, fields(caller_id = %caller.user.id))]
async fn delete_users<U, P>(
    State(state): State<AppState<U, P>>,
    axum::extract::Extension(config): axum::extract::Extension<Config>,
    RequireCaller(caller): RequireCaller,
    query: Result<Query<DeleteUsersQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    U: UserStorage,
    P: IdentityProvider,
{
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let raw = query
        .ids
        .ok_or_else(|| ApiError::BadRequest("No user IDs provided".to_owned()))?;
    let ids = parse_id_list(&raw)?;

    if ids.contains(&caller.user.id) {
        if !config.allow_self_delete() {
            return Err(ApiError::SelfActionDenied(
                "You cannot delete your own account".to_owned(),
            ));
        }
        // The caller's session ends before any record is touched.
        if let Err(e) = state.identity.sign_out(&caller.access_token).await {
            tracing::warn!("Failed to sign out self-deleting caller: {}", e);
        }
    }

    tracing::info!(count = ids.len(), "Deleting users");

    let targets = state.user_storage.find_users(&ids).await.map_err(|e| {
        tracing::error!("Failed to look up users for deletion: {}", e);
        ApiError::from(e)
    })?;

    let deleted = state.user_storage.delete_users(&ids).await.map_err(|e| {
        tracing::error!("Failed to delete users: {}", e);
        ApiError::from(e)
    })?;

    let work: Vec<ProviderDeletion> = targets
        .into_iter()
        .filter(|user| deleted.contains(&user.id))
        .map(|user| ProviderDeletion {
            user_id: user.id,
            email: user.email,
            auth_id: user.auth_id,
        })
        .collect();

    let mut results: Vec<DeleteResult> = Vec::with_capacity(ids.len());
    for item in work {
        let Some(auth_id) = item.auth_id else {
            tracing::warn!("User {} has no authId, skipping auth deletion", item.email);
            results.push(DeleteResult::new(item.user_id, DeleteOutcome::LocalOnly));
            continue;
        };

        match state.identity.admin_delete_user(auth_id).await {
            Ok(()) => results.push(DeleteResult::new(item.user_id, DeleteOutcome::Deleted)),
            Err(e) => {
                tracing::error!("Error deleting user {} from auth: {}", item.user_id, e);
                results.push(DeleteResult {
                    id: item.user_id,
                    outcome: DeleteOutcome::ProviderFailed,
                    detail: Some(e.to_string()),
                });
            }
        }
    }

    for id in &ids {
        if !deleted.contains(id) {
            results.push(DeleteResult::new(*id, DeleteOutcome::NotFound));
        }
    }

    Ok((
        StatusCode::OK,
        Json(DeleteUsersResponse {
            message: "Successfully deleted users".to_owned(),
            status: StatusCode::OK.as_u16(),
            results,
        }),
    ))
}
