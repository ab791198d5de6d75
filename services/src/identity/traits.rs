//! Identity provider trait definition.

use super::types::{AuthSession, Identity, IdentityError};
use std::future::Future;
use uuid::Uuid;

/// Operations the service consumes from the external identity provider.
///
/// See [module documentation](super) for the available implementations.
pub trait IdentityProvider: Clone + Send + Sync + 'static {
    /// Creates a provider account and returns its identity.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Identity, IdentityError>> + Send;

    /// Checks credentials and opens a session.
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthSession, IdentityError>> + Send;

    /// Ends the session behind `access_token`.
    fn sign_out(&self, access_token: &str)
    -> impl Future<Output = Result<(), IdentityError>> + Send;

    /// Resolves the identity behind `access_token`.
    ///
    /// Returns `None` when the token is unknown, expired or revoked.
    fn get_user(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Option<Identity>, IdentityError>> + Send;

    /// Deletes a provider account with administrative privileges.
    fn admin_delete_user(
        &self,
        auth_id: Uuid,
    ) -> impl Future<Output = Result<(), IdentityError>> + Send;
}
