/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use usrd_api::{app::AppState, config::Config};
/// use usrd_shared::store::MemoryStore;
/// use usrd_shared::users::UserService;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let users = UserService::new(Arc::new(MemoryStore::new()));
/// let state = AppState::new(users, config, CancellationToken::new());
/// let app = usrd_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::config::Config;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use usrd_shared::users::UserService;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Uses Arc internally for cheap cloning.
#[derive(Clone)]
pub struct AppState {
    /// Entity management API over the configured Record Store
    pub users: UserService,

    /// Application configuration
    pub config: Arc<Config>,

    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates new application state
    pub fn new(users: UserService, config: Config, shutdown: CancellationToken) -> Self {
        Self {
            users,
            config: Arc::new(config),
            shutdown,
        }
    }

    /// Cancellation token for one request, cancelled with the server
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET /health
/// └── /system/users
///     ├── POST   /                          # Create
///     ├── GET    /                          # List
///     ├── DELETE /                          # Delete all
///     ├── GET    /:id                       # Get
///     ├── PATCH  /:id                       # Partial update
///     ├── DELETE /:id                       # Delete
///     ├── PUT    /:id/metadata              # Replace metadata
///     ├── POST   /:id/disabled/toggle       # Flip disabled
///     ├── PUT    /:id/disabled              # Set disabled
///     ├── POST   /:id/anonymous/toggle      # Flip is_anonymous
///     ├── PUT    /:id/anonymous             # Set is_anonymous
///     ├── PUT    /:id/password              # Replace secret
///     └── POST   /:id/password/verify       # Check secret
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer)
pub fn build_router(state: AppState) -> Router {
    use crate::routes::{health, users};

    let health_routes = Router::new().route("/health", get(health::health_check));

    let user_routes = Router::new()
        .route(
            "/",
            post(users::create_user)
                .get(users::list_users)
                .delete(users::delete_all_users),
        )
        .route(
            "/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/:id/metadata", put(users::update_metadata))
        .route("/:id/disabled/toggle", post(users::toggle_disabled))
        .route("/:id/disabled", put(users::set_disabled))
        .route("/:id/anonymous/toggle", post(users::toggle_anonymous))
        .route("/:id/anonymous", put(users::set_anonymous))
        .route("/:id/password", put(users::set_password))
        .route("/:id/password/verify", post(users::verify_password));

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE])
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/system/users", user_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, StoreBackend};
    use usrd_shared::store::MemoryStore;

    fn state() -> AppState {
        let config = Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_origins: vec!["https://admin.example".to_string()],
            },
            store: StoreBackend::Memory,
            database: None,
        };
        AppState::new(
            UserService::new(Arc::new(MemoryStore::new())),
            config,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_request_token_follows_shutdown() {
        let state = state();
        let token = state.request_token();
        assert!(!token.is_cancelled());

        state.shutdown.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_router_builds_with_restricted_cors() {
        let _router = build_router(state());
    }
}
