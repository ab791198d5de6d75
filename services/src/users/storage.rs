//! User record storage trait and implementations.
//!
//! This module provides a trait-based abstraction over the `users` table, the
//! only entity the service persists.
//!
//! # Architecture
//!
//! The module follows the repository pattern with trait-based abstraction:
//! - `UserStorage` trait: interface consumed by the gate and the lifecycle handlers
//! - `PgUserStorage`: PostgreSQL implementation on top of `PgStorage`
//! - `MockUserStorage`: In-memory implementation for testing
//!
//! Bulk operations (`set_status`, `delete_users`) are set-matching: ids that do
//! not exist are ignored and the ids actually touched are returned, so callers
//! can report a per-id outcome.
//!
//! ```rust,ignore
//! use roster_services::users::storage::{MockUserStorage, NewUser, UserStorage};
//!
//! async fn example<S: UserStorage>(storage: &S) {
//!     let user = storage
//!         .create_user(NewUser::new("Alice", "alice@example.com"))
//!         .await;
//!     // handle result...
//! }
//! ```

use crate::database::PgStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Account status. Only these two values are valid anywhere in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Blocked,
}

impl UserStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, UserStatus::Blocked)
    }
}

impl Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for UserStatus {
    type Err = UserStorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "blocked" => Ok(UserStatus::Blocked),
            other => Err(UserStorageError::InvalidInput(format!(
                "Unknown user status: {other}"
            ))),
        }
    }
}

/// A stored user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    /// The unique user ID.
    pub id: Uuid,
    /// The identity-provider account this record is bound to.
    ///
    /// Absent for legacy records created before accounts were linked.
    pub auth_id: Option<Uuid>,
    /// The unique email address.
    pub email: String,
    pub name: String,
    pub description: Option<String>,
    pub status: UserStatus,
    /// When the user last authenticated successfully.
    pub last_login: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredUser {
    /// Creates a new active `StoredUser` with a generated UUID and no `auth_id`.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            auth_id: None,
            email: email.into(),
            name: name.into(),
            description: None,
            status: UserStatus::Active,
            last_login: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Binds the record to an identity-provider account (builder pattern).
    pub fn with_auth_id(mut self, auth_id: Uuid) -> Self {
        self.auth_id = Some(auth_id);
        self
    }

    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_last_login(mut self, last_login: DateTime<Utc>) -> Self {
        self.last_login = last_login;
        self
    }
}

/// Input for creating a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub auth_id: Option<Uuid>,
    pub description: Option<String>,
}

impl NewUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            auth_id: None,
            description: None,
        }
    }

    pub fn with_auth_id(mut self, auth_id: Uuid) -> Self {
        self.auth_id = Some(auth_id);
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    fn validate(&self) -> Result<(), UserStorageError> {
        if self.name.trim().is_empty() {
            return Err(UserStorageError::InvalidInput(
                "Name cannot be empty".to_owned(),
            ));
        }
        if self.email.trim().is_empty() {
            return Err(UserStorageError::InvalidInput(
                "Email cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Error type for user storage operations.
#[derive(Debug, thiserror::Error)]
pub enum UserStorageError {
    /// A uniqueness constraint (`email` or `auth_id`) was violated.
    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    /// The user was not found.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The database could not be reached.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The database refused the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other database or storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<sqlx::Error> for UserStorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    Some("23505") => UserStorageError::UserAlreadyExists(
                        db_err
                            .constraint()
                            .unwrap_or("unique constraint")
                            .to_owned(),
                    ),
                    Some("42501") | Some("P0001") => {
                        UserStorageError::PermissionDenied(db_err.message().to_owned())
                    }
                    _ => UserStorageError::StorageError(err.to_string()),
                }
            }
            sqlx::Error::RowNotFound => UserStorageError::UserNotFound(err.to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => UserStorageError::ConnectionError(err.to_string()),
            _ => UserStorageError::StorageError(err.to_string()),
        }
    }
}

/// Trait for user record storage.
///
/// Implementations must keep `email` and `auth_id` unique and must only ever
/// hold the two `UserStatus` values.
pub trait UserStorage: Clone + Send + Sync + 'static {
    /// Returns `true` if the backing store is reachable.
    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    /// Inserts a new user with `status = active` and `last_login = now`.
    ///
    /// # Returns
    ///
    /// Returns the created `StoredUser` on success, or an error if:
    /// - `email` or `auth_id` already exists (`UserAlreadyExists`)
    /// - `name` or `email` is empty (`InvalidInput`)
    /// - A storage error occurs
    fn create_user(
        &self,
        new_user: NewUser,
    ) -> impl Future<Output = Result<StoredUser, UserStorageError>> + Send;

    /// Retrieves a user by id.
    fn get_user(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<StoredUser>, UserStorageError>> + Send;

    /// Retrieves a user by the identity-provider account id.
    fn get_user_by_auth_id(
        &self,
        auth_id: Uuid,
    ) -> impl Future<Output = Result<Option<StoredUser>, UserStorageError>> + Send;

    /// Retrieves a user by email address.
    fn get_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<StoredUser>, UserStorageError>> + Send;

    /// Lists all users ordered by `email` ascending.
    fn list_users(&self) -> impl Future<Output = Result<Vec<StoredUser>, UserStorageError>> + Send;

    /// Retrieves every user whose id is in `ids`. Unknown ids are ignored.
    fn find_users(
        &self,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<StoredUser>, UserStorageError>> + Send;

    /// Sets `last_login` on the record bound to `auth_id`.
    ///
    /// Returns `None` if no record is bound to that account.
    fn touch_last_login(
        &self,
        auth_id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<StoredUser>, UserStorageError>> + Send;

    /// Sets `status` on every record whose id is in `ids`.
    ///
    /// Returns the ids that were actually updated.
    fn set_status(
        &self,
        ids: &[Uuid],
        status: UserStatus,
    ) -> impl Future<Output = Result<Vec<Uuid>, UserStorageError>> + Send;

    /// Deletes every record whose id is in `ids`.
    ///
    /// Returns the ids that were actually deleted.
    fn delete_users(
        &self,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Uuid>, UserStorageError>> + Send;
}

/// In-memory mock implementation of `UserStorage` for testing.
///
/// Users are kept in a thread-safe `HashMap` keyed by id. Clones share the same
/// data. `set_unavailable(true)` makes every operation fail with a connection
/// error, which is how tests exercise the 500 paths. `fail_operation` fails a
/// single operation while the rest keep working.
///
/// # Example
///
/// ```
/// use roster_services::users::storage::{MockUserStorage, StoredUser};
///
/// let alice = StoredUser::new("Alice", "alice@example.com");
/// let storage = MockUserStorage::new().with_user(alice);
/// assert_eq!(storage.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockUserStorage {
    users: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<Uuid, StoredUser>>>,
    unavailable: std::sync::Arc<AtomicBool>,
    failing: std::sync::Arc<std::sync::RwLock<Vec<MockOperation>>>,
}

/// Storage operations that can be failed individually on `MockUserStorage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOperation {
    FindUsers,
    DeleteUsers,
    SetStatus,
    TouchLastLogin,
}

impl MockUserStorage {
    /// Creates a new empty `MockUserStorage`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user into the storage as-is (builder pattern).
    ///
    /// Useful for seeding blocked users, legacy users without `auth_id`, or
    /// specific `last_login` values.
    pub fn with_user(self, user: StoredUser) -> Self {
        self.users
            .write()
            .expect("lock poisoned")
            .insert(user.id, user);
        self
    }

    /// Returns the number of users in the storage.
    pub fn len(&self) -> usize {
        self.users.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all users from the storage.
    pub fn clear(&self) {
        self.users.write().expect("lock poisoned").clear();
    }

    /// Simulates the database going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `operation` fail with a connection error from now on.
    pub fn fail_operation(&self, operation: MockOperation) {
        self.failing
            .write()
            .expect("lock poisoned")
            .push(operation);
    }

    fn check_available(&self) -> Result<(), UserStorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(UserStorageError::ConnectionError(
                "mock storage unavailable".to_owned(),
            ));
        }
        Ok(())
    }

    fn check_operation(&self, operation: MockOperation) -> Result<(), UserStorageError> {
        self.check_available()?;
        if self.failing.read().expect("lock poisoned").contains(&operation) {
            return Err(UserStorageError::ConnectionError(format!(
                "mock {operation:?} failed"
            )));
        }
        Ok(())
    }
}

impl UserStorage for MockUserStorage {
    async fn is_connected(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<StoredUser, UserStorageError> {
        self.check_available()?;
        new_user.validate()?;

        let mut users = self.users.write().expect("lock poisoned");

        if users.values().any(|u| u.email == new_user.email) {
            return Err(UserStorageError::UserAlreadyExists(new_user.email));
        }
        if let Some(auth_id) = new_user.auth_id
            && users.values().any(|u| u.auth_id == Some(auth_id))
        {
            return Err(UserStorageError::UserAlreadyExists(auth_id.to_string()));
        }

        let mut user = StoredUser::new(new_user.name, new_user.email);
        user.auth_id = new_user.auth_id;
        user.description = new_user.description;
        users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<StoredUser>, UserStorageError> {
        self.check_available()?;
        let users = self.users.read().expect("lock poisoned");
        Ok(users.get(&id).cloned())
    }

    async fn get_user_by_auth_id(
        &self,
        auth_id: Uuid,
    ) -> Result<Option<StoredUser>, UserStorageError> {
        self.check_available()?;
        let users = self.users.read().expect("lock poisoned");
        Ok(users.values().find(|u| u.auth_id == Some(auth_id)).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, UserStorageError> {
        self.check_available()?;
        let users = self.users.read().expect("lock poisoned");
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<StoredUser>, UserStorageError> {
        self.check_available()?;
        let users = self.users.read().expect("lock poisoned");
        let mut listed: Vec<StoredUser> = users.values().cloned().collect();
        listed.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(listed)
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<StoredUser>, UserStorageError> {
        self.check_operation(MockOperation::FindUsers)?;
        let users = self.users.read().expect("lock poisoned");
        let mut found: Vec<StoredUser> = users
            .values()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(found)
    }

    async fn touch_last_login(
        &self,
        auth_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<StoredUser>, UserStorageError> {
        self.check_operation(MockOperation::TouchLastLogin)?;
        let mut users = self.users.write().expect("lock poisoned");
        Ok(users
            .values_mut()
            .find(|u| u.auth_id == Some(auth_id))
            .map(|user| {
                user.last_login = at;
                user.updated_at = Utc::now();
                user.clone()
            }))
    }

    async fn set_status(
        &self,
        ids: &[Uuid],
        status: UserStatus,
    ) -> Result<Vec<Uuid>, UserStorageError> {
        self.check_operation(MockOperation::SetStatus)?;
        let mut users = self.users.write().expect("lock poisoned");
        let now = Utc::now();
        let mut updated = Vec::new();
        for id in ids {
            if let Some(user) = users.get_mut(id) {
                user.status = status;
                user.updated_at = now;
                if !updated.contains(id) {
                    updated.push(*id);
                }
            }
        }
        Ok(updated)
    }

    async fn delete_users(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, UserStorageError> {
        self.check_operation(MockOperation::DeleteUsers)?;
        let mut users = self.users.write().expect("lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| users.remove(id).map(|u| u.id))
            .collect())
    }
}

/// PostgreSQL implementation of `UserStorage` for production use.
///
/// # Table Schema
///
/// See `migrations/20261001000000_create_users.sql`:
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     auth_id UUID UNIQUE,
///     email TEXT NOT NULL UNIQUE,
///     status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'blocked')),
///     -- ... other fields
/// );
/// ```
#[derive(Clone)]
pub struct PgUserStorage {
    storage: PgStorage,
}

/// Row type for user queries with all fields.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    auth_id: Option<Uuid>,
    email: String,
    name: String,
    description: Option<String>,
    status: String,
    last_login: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for StoredUser {
    type Error = UserStorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<UserStatus>().map_err(|_| {
            UserStorageError::StorageError(format!(
                "user {} has invalid status {:?}",
                row.id, row.status
            ))
        })?;
        Ok(StoredUser {
            id: row.id,
            auth_id: row.auth_id,
            email: row.email,
            name: row.name,
            description: row.description,
            status,
            last_login: row.last_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, auth_id, email, name, description, status, last_login, created_at, updated_at";

fn rows_into_users(rows: Vec<UserRow>) -> Result<Vec<StoredUser>, UserStorageError> {
    rows.into_iter().map(StoredUser::try_from).collect()
}

impl PgUserStorage {
    /// Creates a new `PgUserStorage` instance wrapping the given `PgStorage`.
    pub fn new(storage: PgStorage) -> Self {
        Self { storage }
    }

    /// Returns a reference to the underlying `PgStorage`.
    pub fn inner(&self) -> &PgStorage {
        &self.storage
    }
}

impl UserStorage for PgUserStorage {
    async fn is_connected(&self) -> bool {
        self.storage.is_connected().await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<StoredUser, UserStorageError> {
        new_user.validate()?;

        let sql = format!(
            r#"
            INSERT INTO users (name, email, auth_id, description, status, last_login)
            VALUES ($1, $2, $3, $4, 'active', now())
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&new_user.name)
            .bind(&new_user.email)
            .bind(new_user.auth_id)
            .bind(&new_user.description)
            .fetch_one(&self.storage.pool)
            .await
            .map_err(|e| match UserStorageError::from(e) {
                UserStorageError::UserAlreadyExists(_) => {
                    UserStorageError::UserAlreadyExists(new_user.email.clone())
                }
                other => other,
            })?;

        StoredUser::try_from(row)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<StoredUser>, UserStorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.storage.pool)
            .await?
            .map(StoredUser::try_from)
            .transpose()
    }

    async fn get_user_by_auth_id(
        &self,
        auth_id: Uuid,
    ) -> Result<Option<StoredUser>, UserStorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE auth_id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(auth_id)
            .fetch_optional(&self.storage.pool)
            .await?
            .map(StoredUser::try_from)
            .transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<StoredUser>, UserStorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.storage.pool)
            .await?
            .map(StoredUser::try_from)
            .transpose()
    }

    async fn list_users(&self) -> Result<Vec<StoredUser>, UserStorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY email ASC");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.storage.pool)
            .await?;
        rows_into_users(rows)
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<StoredUser>, UserStorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY email ASC");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(ids)
            .fetch_all(&self.storage.pool)
            .await?;
        rows_into_users(rows)
    }

    async fn touch_last_login(
        &self,
        auth_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<StoredUser>, UserStorageError> {
        let sql = format!(
            "UPDATE users SET last_login = $2 WHERE auth_id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(auth_id)
            .bind(at)
            .fetch_optional(&self.storage.pool)
            .await?
            .map(StoredUser::try_from)
            .transpose()
    }

    async fn set_status(
        &self,
        ids: &[Uuid],
        status: UserStatus,
    ) -> Result<Vec<Uuid>, UserStorageError> {
        let updated = sqlx::query_scalar::<_, Uuid>(
            "UPDATE users SET status = $2 WHERE id = ANY($1) RETURNING id",
        )
        .bind(ids)
        .bind(status.as_db_str())
        .fetch_all(&self.storage.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_users(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, UserStorageError> {
        let deleted =
            sqlx::query_scalar::<_, Uuid>("DELETE FROM users WHERE id = ANY($1) RETURNING id")
                .bind(ids)
                .fetch_all(&self.storage.pool)
                .await?;
        Ok(deleted)
    }
}
