//! HTTP handlers for the CRM Bridge Service
//!
//! Public routes (webhook delivery, auth, health, metrics) sit next to
//! session-protected management routes and an admin-only group.

pub mod admin;
pub mod auth;
pub mod bitrix;
pub mod connections;
pub mod health;
pub mod projects;
pub mod webhook;

use crate::auth::{require_admin, require_auth, Principal};
use crate::error::{BridgeError, BridgeResult};
use crate::models::Project;
use crate::service::AppState;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Create all routes for the bridge service
pub fn create_routes(state: Arc<AppState>) -> Router {
    let public = Router::new()
        // Health and monitoring endpoints
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(health::metrics_handler))
        // Inbound webhooks
        .route(
            "/api/webhook/bitrix/:token",
            post(webhook::receive_webhook).get(webhook::probe_webhook),
        )
        // Sessions
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout));

    let authenticated = Router::new()
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/api/projects/:id/connections",
            get(connections::list_connections).post(connections::create_connection),
        )
        .route(
            "/api/projects/:id/connections/:connection_id",
            get(connections::get_connection)
                .put(connections::update_connection)
                .delete(connections::delete_connection),
        )
        .route(
            "/api/projects/:id/connections/:connection_id/test",
            post(connections::test_connection),
        )
        .route("/api/bitrix/funnels", get(bitrix::list_funnels))
        .route("/api/bitrix/stages", get(bitrix::list_stages))
        .route("/api/bitrix/fields", get(bitrix::list_fields))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        .route(
            "/api/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route(
            "/api/admin/users/:id",
            patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/api/admin/projects", get(admin::list_projects))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let body_limit = state.config.server.max_body_size;

    public
        .merge(authenticated)
        .merge(admin)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Load a project the caller owns or administers
pub(crate) async fn accessible_project(
    state: &AppState,
    principal: &Principal,
    project_id: Uuid,
) -> BridgeResult<Project> {
    let project = state
        .store
        .find_project(project_id)
        .await?
        .ok_or_else(|| BridgeError::not_found("Project"))?;

    if !principal.can_access(project.user_id) {
        return Err(BridgeError::forbidden("Access to this project is denied"));
    }

    Ok(project)
}

/// Trimmed text, with blank strings treated as absent
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router fixtures shared by handler tests

    use super::*;
    use crate::auth::hash_password;
    use crate::bitrix::BitrixClient;
    use crate::config::BridgeConfig;
    use crate::models::{Role, User};
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;
    use axum_test::TestServer;
    use chrono::Utc;
    use std::time::Duration;

    pub const PASSWORD: &str = "password1";

    pub struct TestApp {
        pub server: TestServer,
        pub state: Arc<AppState>,
    }

    impl TestApp {
        pub fn new() -> Self {
            let mut config = BridgeConfig::default();
            config.observability.metrics_namespace = "handler_test".to_string();
            Self::with_config(config)
        }

        pub fn with_config(config: BridgeConfig) -> Self {
            let crm = BitrixClient::new(Duration::from_secs(5)).unwrap();
            let state = Arc::new(
                AppState::new(config, Arc::new(MemoryStore::new()), Arc::new(crm)).unwrap(),
            );
            let server = TestServer::new(create_routes(state.clone())).unwrap();
            Self { server, state }
        }

        /// Create a user directly in the store and return it with its `Authorization` value
        pub async fn user(&self, email: &str, role: Role) -> (User, HeaderValue) {
            let user = self
                .state
                .store
                .create_user(User {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    password_hash: hash_password(PASSWORD).unwrap(),
                    name: None,
                    role,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            let token = self.state.verifier.issue(&user).unwrap();
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).unwrap();
            (user, bearer)
        }
    }
}
