//! Mock identity provider for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::traits::IdentityProvider;
use super::types::{AuthSession, Identity, IdentityError};

/// A call received by [`MockIdentityProvider`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCall {
    SignUp { email: String },
    SignIn { email: String },
    SignOut { access_token: String },
    GetUser { access_token: String },
    AdminDeleteUser { auth_id: Uuid },
}

#[derive(Clone)]
struct MockAccount {
    email: String,
    password: String,
}

/// In-memory mock implementation of `IdentityProvider` for testing.
///
/// Accounts and sessions live in shared maps, so clones observe each other.
/// Every trait call is appended to a log that tests inspect with
/// [`calls`](Self::calls) to assert ordering, e.g. that a self sign-out
/// happens before any admin deletion.
#[derive(Clone, Default)]
pub struct MockIdentityProvider {
    accounts: Arc<RwLock<HashMap<Uuid, MockAccount>>>,
    sessions: Arc<RwLock<HashMap<String, Uuid>>>,
    calls: Arc<RwLock<Vec<IdentityCall>>>,
    failing_deletes: Arc<RwLock<HashSet<Uuid>>>,
    unavailable: Arc<AtomicBool>,
    next_token: Arc<AtomicU64>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account directly, bypassing the call log.
    pub fn register_account(&self, email: &str, password: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.accounts.write().expect("lock poisoned").insert(
            id,
            MockAccount {
                email: email.to_owned(),
                password: password.to_owned(),
            },
        );
        id
    }

    /// Opens a session for `auth_id` and returns its access token.
    ///
    /// The account does not need to exist, which lets tests model a valid
    /// session whose local record is missing.
    pub fn issue_session(&self, auth_id: Uuid) -> String {
        let n = self.next_token.fetch_add(1, Ordering::SeqCst);
        let token = format!("mock-token-{n}-{auth_id}");
        self.sessions
            .write()
            .expect("lock poisoned")
            .insert(token.clone(), auth_id);
        token
    }

    /// Makes `admin_delete_user` fail for this account.
    pub fn fail_delete_for(&self, auth_id: Uuid) {
        self.failing_deletes
            .write()
            .expect("lock poisoned")
            .insert(auth_id);
    }

    /// Makes every call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of the calls received so far.
    pub fn calls(&self) -> Vec<IdentityCall> {
        self.calls.read().expect("lock poisoned").clone()
    }

    pub fn has_session(&self, access_token: &str) -> bool {
        self.sessions
            .read()
            .expect("lock poisoned")
            .contains_key(access_token)
    }

    pub fn account_exists(&self, auth_id: Uuid) -> bool {
        self.accounts
            .read()
            .expect("lock poisoned")
            .contains_key(&auth_id)
    }

    fn record(&self, call: IdentityCall) -> Result<(), IdentityError> {
        self.calls.write().expect("lock poisoned").push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdentityError::Transport(
                "mock identity provider unavailable".to_owned(),
            ));
        }
        Ok(())
    }
}

impl IdentityProvider for MockIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        self.record(IdentityCall::SignUp {
            email: email.to_owned(),
        })?;

        let taken = self
            .accounts
            .read()
            .expect("lock poisoned")
            .values()
            .any(|a| a.email == email);
        if taken {
            return Err(IdentityError::AlreadyRegistered(email.to_owned()));
        }

        let id = self.register_account(email, password);
        Ok(Identity::new(id, Some(email.to_owned())))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        self.record(IdentityCall::SignIn {
            email: email.to_owned(),
        })?;

        let id = self
            .accounts
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|(_, a)| a.email == email && a.password == password)
            .map(|(id, _)| *id)
            .ok_or(IdentityError::InvalidCredentials)?;

        Ok(AuthSession {
            access_token: self.issue_session(id),
            refresh_token: None,
            expires_in: Some(3600),
            identity: Identity::new(id, Some(email.to_owned())),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        self.record(IdentityCall::SignOut {
            access_token: access_token.to_owned(),
        })?;
        self.sessions
            .write()
            .expect("lock poisoned")
            .remove(access_token);
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<Identity>, IdentityError> {
        self.record(IdentityCall::GetUser {
            access_token: access_token.to_owned(),
        })?;

        let Some(id) = self
            .sessions
            .read()
            .expect("lock poisoned")
            .get(access_token)
            .copied()
        else {
            return Ok(None);
        };

        let email = self
            .accounts
            .read()
            .expect("lock poisoned")
            .get(&id)
            .map(|a| a.email.clone());
        Ok(Some(Identity::new(id, email)))
    }

    async fn admin_delete_user(&self, auth_id: Uuid) -> Result<(), IdentityError> {
        self.record(IdentityCall::AdminDeleteUser { auth_id })?;

        if self
            .failing_deletes
            .read()
            .expect("lock poisoned")
            .contains(&auth_id)
        {
            return Err(IdentityError::Rejected {
                status: 500,
                message: "mock delete failure".to_owned(),
            });
        }

        let removed = self
            .accounts
            .write()
            .expect("lock poisoned")
            .remove(&auth_id)
            .is_some();
        if !removed {
            return Err(IdentityError::NotFound(auth_id.to_string()));
        }

        self.sessions
            .write()
            .expect("lock poisoned")
            .retain(|_, id| *id != auth_id);
        Ok(())
    }
}
