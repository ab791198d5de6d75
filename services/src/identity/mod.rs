//! Identity provider client.
//!
//! Credential checks and account lifecycle are delegated to an external,
//! GoTrue-compatible auth service. This module wraps it behind the
//! `IdentityProvider` trait so the gate and the handlers never talk HTTP
//! directly:
//! - `GoTrueIdentityProvider`: reqwest client for the provider's REST API
//! - `MockIdentityProvider`: in-memory provider that records every call

mod gotrue;
mod mock;
mod traits;
mod types;

pub use gotrue::{GoTrueConfig, GoTrueIdentityProvider};
pub use mock::{IdentityCall, MockIdentityProvider};
pub use traits::IdentityProvider;
pub use types::{AuthSession, Identity, IdentityError};
