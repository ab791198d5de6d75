//! Shared test utilities for integration tests.
//!
//! `TestApp` wires the real router to `MockUserStorage` and
//! `MockIdentityProvider`, and keeps handles to both so tests can seed data
//! and inspect what the service did.

use axum_test::TestServer;
use roster_services::{
    config::Config,
    identity::{IdentityCall, MockIdentityProvider},
    routes,
    users::storage::{MockUserStorage, StoredUser, UserStatus},
};
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub server: TestServer,
    pub storage: MockUserStorage,
    pub identity: MockIdentityProvider,
}

/// A seeded user together with a live session token.
#[allow(dead_code)]
pub struct SeededUser {
    pub user: StoredUser,
    pub auth_id: Uuid,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::new_for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let storage = MockUserStorage::new();
        let identity = MockIdentityProvider::new();
        let app = routes(storage.clone(), identity.clone(), config);
        let server = TestServer::new(app).expect("Failed to start test server");
        Self {
            server,
            storage,
            identity,
        }
    }

    /// Creates a provider account, its local record and a session.
    pub fn seed_user(&self, name: &str, email: &str, status: UserStatus) -> SeededUser {
        let auth_id = self.identity.register_account(email, TEST_PASSWORD);
        let user = StoredUser::new(name, email)
            .with_auth_id(auth_id)
            .with_status(status);
        let _ = self.storage.clone().with_user(user.clone());
        let token = self.identity.issue_session(auth_id);
        SeededUser {
            user,
            auth_id,
            token,
        }
    }

    /// Inserts a local record with no provider account.
    #[allow(dead_code)]
    pub fn seed_legacy_user(&self, name: &str, email: &str) -> StoredUser {
        let user = StoredUser::new(name, email);
        let _ = self.storage.clone().with_user(user.clone());
        user
    }

    /// Auth ids passed to `admin_delete_user`, in call order.
    #[allow(dead_code)]
    pub fn provider_deletes(&self) -> Vec<Uuid> {
        self.identity
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                IdentityCall::AdminDeleteUser { auth_id } => Some(auth_id),
                _ => None,
            })
            .collect()
    }
}
