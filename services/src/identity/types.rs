//! Identity provider types.

use uuid::Uuid;

/// An account as seen by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Provider account id; stored locally as `auth_id`.
    pub id: Uuid,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: Uuid, email: Option<String>) -> Self {
        Self { id, email }
    }
}

/// A session opened by a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime of `access_token` in seconds, when the provider reports it.
    pub expires_in: Option<u64>,
    pub identity: Identity,
}

/// Error type for identity provider operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Account already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Identity provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Identity provider unreachable: {0}")]
    Transport(String),

    #[error("Unexpected identity provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IdentityError::InvalidResponse(err.to_string())
        } else {
            IdentityError::Transport(err.to_string())
        }
    }
}
