//! GoTrue-compatible identity provider over HTTP.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::traits::IdentityProvider;
use super::types::{AuthSession, Identity, IdentityError};
use crate::config::Config;

/// Connection settings for the identity provider.
#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    /// Base URL, e.g. `https://project.supabase.co`.
    pub url: String,
    /// Public key sent as `apikey` on every request.
    pub anon_key: String,
    /// Privileged key used for admin operations.
    pub service_role_key: String,
}

impl GoTrueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.auth_url().to_string(),
            anon_key: config.auth_anon_key().to_string(),
            service_role_key: config.auth_service_role_key().to_string(),
        }
    }
}

/// Identity provider backed by a GoTrue REST API (`/auth/v1/*`).
#[derive(Debug, Clone)]
pub struct GoTrueIdentityProvider {
    client: Client,
    config: Arc<GoTrueConfig>,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    email: Option<String>,
}

impl From<GoTrueUser> for Identity {
    fn from(user: GoTrueUser) -> Self {
        Identity::new(user.id, user.email)
    }
}

/// `/signup` answers with a session when auto-confirm is on, with the bare
/// user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session { user: GoTrueUser },
    User(GoTrueUser),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    user: GoTrueUser,
}

/// Error bodies differ between GoTrue versions; take whichever text is set.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| status.to_string())
}

async fn rejected(response: Response) -> IdentityError {
    let status = response.status().as_u16();
    IdentityError::Rejected {
        status,
        message: error_message(response).await,
    }
}

impl GoTrueIdentityProvider {
    pub fn new(config: GoTrueConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(GoTrueConfig::from_config(config))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Request authenticated as the end user behind `access_token`.
    fn user_request(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        builder
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
    }

    /// Request authenticated with the service-role key.
    fn admin_request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.service_role_key)
            .bearer_auth(&self.config.service_role_key)
    }
}

impl IdentityProvider for GoTrueIdentityProvider {
    #[tracing::instrument(skip_all)]
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let response = self
            .client
            .post(self.endpoint("signup"))
            .header("apikey", &self.config.anon_key)
            .json(&Credentials { email, password })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let user = match response.json::<SignUpResponse>().await? {
                    SignUpResponse::Session { user } | SignUpResponse::User(user) => user,
                };
                Ok(user.into())
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let message = error_message(response).await;
                if message.to_ascii_lowercase().contains("already") {
                    Err(IdentityError::AlreadyRegistered(email.to_owned()))
                } else {
                    Err(IdentityError::Rejected {
                        status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                        message,
                    })
                }
            }
            _ => Err(rejected(response).await),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        let response = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.anon_key)
            .json(&Credentials { email, password })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let token = response.json::<TokenResponse>().await?;
                Ok(AuthSession {
                    access_token: token.access_token,
                    refresh_token: token.refresh_token,
                    expires_in: token.expires_in,
                    identity: token.user.into(),
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(IdentityError::InvalidCredentials)
            }
            _ => Err(rejected(response).await),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let response = self
            .user_request(self.client.post(self.endpoint("logout")), access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // The session is already gone.
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(rejected(response).await),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn get_user(&self, access_token: &str) -> Result<Option<Identity>, IdentityError> {
        let response = self
            .user_request(self.client.get(self.endpoint("user")), access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let user = response.json::<GoTrueUser>().await?;
                Ok(Some(user.into()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            _ => Err(rejected(response).await),
        }
    }

    #[tracing::instrument(skip_all, fields(auth_id = %auth_id))]
    async fn admin_delete_user(&self, auth_id: Uuid) -> Result<(), IdentityError> {
        let response = self
            .admin_request(
                self.client
                    .delete(self.endpoint(&format!("admin/users/{auth_id}"))),
            )
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(IdentityError::NotFound(auth_id.to_string())),
            _ => Err(rejected(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GoTrueIdentityProvider {
        GoTrueIdentityProvider::new(GoTrueConfig {
            url: server.uri(),
            anon_key: "anon-key".to_string(),
            service_role_key: "service-key".to_string(),
        })
    }

    #[tokio::test]
    async fn test_get_user_resolves_identity() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer user-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": id, "email": "alice@example.com", "aud": "authenticated"})),
            )
            .mount(&server)
            .await;

        let identity = provider_for(&server)
            .get_user("user-token")
            .await
            .unwrap()
            .expect("identity");

        assert_eq!(identity.id, id);
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_get_user_invalid_token_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"msg": "invalid JWT"})),
            )
            .mount(&server)
            .await;

        let identity = provider_for(&server).get_user("expired").await.unwrap();
        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_returns_session() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(body_json(json!({"email": "alice@example.com", "password": "hunter22"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "token_type": "bearer",
                "user": {"id": id, "email": "alice@example.com"}
            })))
            .mount(&server)
            .await;

        let session = provider_for(&server)
            .sign_in("alice@example.com", "hunter22")
            .await
            .unwrap();

        assert_eq!(session.access_token, "access");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(session.expires_in, Some(3600));
        assert_eq!(session.identity.id, id);
    }

    #[tokio::test]
    async fn test_sign_in_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .sign_in("alice@example.com", "wrong")
            .await;

        assert!(matches!(result, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_sign_up_accepts_bare_user_and_session_shapes() {
        let server = MockServer::start().await;
        let bare = Uuid::new_v4();
        let with_session = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(body_json(json!({"email": "bare@example.com", "password": "pw123456"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": bare, "email": "bare@example.com"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(body_json(json!({"email": "session@example.com", "password": "pw123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "user": {"id": with_session, "email": "session@example.com"}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let first = provider
            .sign_up("bare@example.com", "pw123456")
            .await
            .unwrap();
        let second = provider
            .sign_up("session@example.com", "pw123456")
            .await
            .unwrap();

        assert_eq!(first.id, bare);
        assert_eq!(second.id, with_session);
    }

    #[tokio::test]
    async fn test_sign_up_already_registered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": 422,
                "error_code": "user_already_exists",
                "msg": "User already registered"
            })))
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .sign_up("alice@example.com", "pw123456")
            .await;

        assert!(matches!(result, Err(IdentityError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_admin_delete_uses_service_key() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("DELETE"))
            .and(path(format!("/auth/v1/admin/users/{id}")))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        provider_for(&server).admin_delete_user(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_delete_missing_account() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"msg": "User not found"})),
            )
            .mount(&server)
            .await;

        let result = provider_for(&server)
            .admin_delete_user(Uuid::new_v4())
            .await;

        assert!(matches!(result, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_rejected_with_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})),
            )
            .mount(&server)
            .await;

        let result = provider_for(&server).sign_out("token").await;

        match result {
            Err(IdentityError::Rejected { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let provider = GoTrueIdentityProvider::new(GoTrueConfig {
            url: "http://127.0.0.1:1".to_string(),
            anon_key: "anon".to_string(),
            service_role_key: "service".to_string(),
        });

        let result = provider.get_user("token").await;
        assert!(matches!(result, Err(IdentityError::Transport(_))));
    }
}
