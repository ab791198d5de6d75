use serde::Deserialize;
use std::env::vars;
use std::fmt::Display;
use tracing::info;

/// Default name of the cookie carrying the identity-provider access token.
pub const DEFAULT_SESSION_COOKIE: &str = "sb-access-token";

const LOCAL_AUTH_URL: &str = "http://127.0.0.1:9999";
const LOCAL_AUTH_KEY: &str = "local-development-key";

#[derive(Debug, Clone, Deserialize)]
pub enum Env {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "test")]
    Test,
    #[serde(rename = "pr")]
    Pr,
    #[serde(rename = "prod")]
    Prod,
}

impl Display for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Env::Local => write!(f, "local"),
            Env::Test => write!(f, "test"),
            Env::Pr => write!(f, "pr"),
            Env::Prod => write!(f, "prod"),
        }
    }
}

// The final, validated configuration struct.
#[derive(Debug, Clone)]
pub struct Config {
    env: Env,
    database_url: String,
    server_addr: String,
    port: u16,
    // Identity provider
    auth_url: String,
    auth_anon_key: String,
    auth_service_role_key: String,
    session_cookie: String,
    // Self-action policy
    allow_self_block: bool,
    allow_self_delete: bool,
}

// An intermediate struct for deserializing environment variables
// where most fields are optional.
#[derive(Deserialize)]
struct RawConfig {
    env: Env,
    database_url: String,
    server_addr: Option<String>,
    port: Option<u16>,
    auth_url: Option<String>,
    auth_anon_key: Option<String>,
    auth_service_role_key: Option<String>,
    session_cookie: Option<String>,
    allow_self_block: Option<bool>,
    allow_self_delete: Option<bool>,
}

impl Config {
    /// Create a test configuration with default values.
    ///
    /// This function is available for both unit tests and integration tests.
    /// It should not be used in production code.
    pub fn new_for_test() -> Self {
        Self {
            env: Env::Local,
            database_url: "postgres://localhost:5432/test".to_string(),
            server_addr: "127.0.0.1".to_string(),
            port: 8080,
            auth_url: LOCAL_AUTH_URL.to_string(),
            auth_anon_key: LOCAL_AUTH_KEY.to_string(),
            auth_service_role_key: LOCAL_AUTH_KEY.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            allow_self_block: true,
            allow_self_delete: true,
        }
    }

    /// Test configuration with the self-action policy overridden.
    pub fn new_for_test_with_self_actions(allow_self_block: bool, allow_self_delete: bool) -> Self {
        Self {
            allow_self_block,
            allow_self_delete,
            ..Self::new_for_test()
        }
    }

    pub fn environment(&self) -> &Env {
        &self.env
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_local(&self) -> bool {
        matches!(self.env, Env::Local)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self.env, Env::Prod)
    }

    /// Base URL of the identity provider, without a trailing slash.
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn auth_anon_key(&self) -> &str {
        &self.auth_anon_key
    }

    pub fn auth_service_role_key(&self) -> &str {
        &self.auth_service_role_key
    }

    pub fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    /// Whether a user may set their own status through a bulk status change.
    pub fn allow_self_block(&self) -> bool {
        self.allow_self_block
    }

    /// Whether a user may include themself in a bulk delete.
    pub fn allow_self_delete(&self) -> bool {
        self.allow_self_delete
    }

    /// Initializes configuration by reading from environment variables
    /// and applying environment-aware defaults.
    pub fn init() -> anyhow::Result<Self> {
        info!("Loading configuration from environment variables");

        // First, deserialize into a temporary struct that allows for optional fields
        let raw_config: RawConfig = serde_env::from_iter(vars())?;
        Self::from_raw(raw_config)
    }

    fn from_raw(raw_config: RawConfig) -> anyhow::Result<Self> {
        let RawConfig {
            env,
            database_url,
            server_addr,
            port,
            auth_url,
            auth_anon_key,
            auth_service_role_key,
            session_cookie,
            allow_self_block,
            allow_self_delete,
        } = raw_config;

        let server_addr = match server_addr {
            Some(addr) => {
                info!("Using provided SERVER_ADDR: {}", addr);
                addr
            }
            None => {
                let default_addr = match env {
                    Env::Local => "127.0.0.1",
                    _ => "0.0.0.0",
                };
                info!(
                    "SERVER_ADDR not set, defaulting to {} for {} environment",
                    default_addr, env
                );
                default_addr.to_string()
            }
        };

        let port = match port {
            Some(port) => port,
            None if matches!(env, Env::Local) => {
                info!("PORT not set, defaulting to 8080 for local environment");
                8080
            }
            None => anyhow::bail!("PORT must be set for {} environment", env),
        };

        let is_dev = matches!(env, Env::Local | Env::Test);

        let auth_url = match auth_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if is_dev => {
                info!(
                    "AUTH_URL not set, defaulting to {} for {} environment",
                    LOCAL_AUTH_URL, env
                );
                LOCAL_AUTH_URL.to_string()
            }
            None => anyhow::bail!("AUTH_URL must be set for {} environment", env),
        };

        let auth_anon_key = match auth_anon_key {
            Some(key) => key,
            None if is_dev => LOCAL_AUTH_KEY.to_string(),
            None => anyhow::bail!("AUTH_ANON_KEY must be set for {} environment", env),
        };

        let auth_service_role_key = match auth_service_role_key {
            Some(key) => key,
            None if is_dev => LOCAL_AUTH_KEY.to_string(),
            None => anyhow::bail!("AUTH_SERVICE_ROLE_KEY must be set for {} environment", env),
        };

        let session_cookie = session_cookie
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());

        Ok(Config {
            env,
            database_url,
            server_addr,
            port,
            auth_url,
            auth_anon_key,
            auth_service_role_key,
            session_cookie,
            allow_self_block: allow_self_block.unwrap_or(true),
            allow_self_delete: allow_self_delete.unwrap_or(true),
        })
    }
}
