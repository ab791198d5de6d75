//! User management module.
//!
//! This module provides:
//! - Storage abstraction for user records
//! - The authorization gate that resolves a request's caller
//! - Lifecycle endpoints (register, login, status, listing, bulk delete)
//! - Server-side session flows (sign-up, sign-in, sign-out)

pub mod error;
pub mod gate;
pub mod routes;
pub mod session;
pub mod storage;

pub use error::{ApiError, ErrorResponse, describe_storage_error};
pub use gate::{
    Caller, GateError, GateMode, RequireActiveCaller, RequireCaller, RequireSession, SessionToken,
};
pub use routes::{
    AppState, DeleteOutcome, DeleteResult, DeleteUsersResponse, LoginResponse, RegisterRequest,
    RegisterResponse, StatusChangeRequest, StatusChangeResponse, StatusOutcome, StatusResponse,
    user_routes,
};
pub use session::{SignInRequest, SignInResponse, SignUpRequest, session_routes};
pub use storage::{
    MockOperation, MockUserStorage, NewUser, PgUserStorage, StoredUser, UserStatus, UserStorage,
    UserStorageError,
};
