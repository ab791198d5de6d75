use crate::config::Config;
use crate::identity::IdentityProvider;
use crate::users::routes::AppState;
use crate::users::storage::UserStorage;
use axum::{
    Router,
    extract::{Extension, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{any, get},
};
use opentelemetry::{global, propagation::Extractor};
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub mod config;
pub mod database;
pub mod identity;
pub mod telemetry;
pub mod users;
pub mod version;

struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Builds the service router over a user store and an identity provider.
pub fn routes<U, P>(user_storage: U, identity: P, config: Config) -> Router
where
    U: UserStorage,
    P: IdentityProvider,
{
    let state = AppState::new(user_storage, identity);

    Router::new()
        .route("/is-health", get(health_check::<U, P>))
        .merge(users::user_routes::<U, P>())
        .merge(users::session_routes::<U, P>())
        .fallback(any(catch_all))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let parent_context = global::get_text_map_propagator(|propagator| {
                    propagator.extract(&HeaderExtractor(request.headers()))
                });

                let span = tracing::info_span!(
                    "http_request",
                    http_request.method = ?request.method(),
                    http_request.uri = ?request.uri(),
                    http_request.version = ?request.version(),
                    http_request.user_agent = ?request.headers().get(axum::http::header::USER_AGENT),
                );

                span.set_parent(parent_context);

                span
            }),
        )
        .layer(Extension(config))
        .with_state(state)
}

async fn health_check<U, P>(
    State(state): State<AppState<U, P>>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse
where
    U: UserStorage,
    P: IdentityProvider,
{
    let mut response = if state.user_storage.is_connected().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::BAD_GATEWAY, "502").into_response()
    };

    let headers = [
        ("x-service-env", config.environment().to_string()),
        (
            "x-service-version",
            version::format_version_for_env(config.environment()),
        ),
    ];
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
    }

    response
}

async fn catch_all() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
