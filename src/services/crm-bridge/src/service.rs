//! Service wiring for the CRM Bridge
//!
//! Builds the shared application state, mounts the HTTP routes behind the
//! middleware stack and runs the server until a shutdown signal arrives.

use crate::auth::{hash_password, JwtVerifier, TokenVerifier};
use crate::bitrix::{BitrixClient, CrmClient, FieldCache};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::handlers::create_routes;
use crate::metrics::BridgeMetrics;
use crate::models::{Connection, Project, Role, User};
use crate::operations::OperationContext;
use crate::store::{MemoryStore, PostgresStore, Store};
use axum::serve;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use axum::http::HeaderName;
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    /// Service configuration
    pub config: BridgeConfig,
    /// Users, projects and connections
    pub store: Arc<dyn Store>,
    /// Outbound CRM access
    pub crm: Arc<dyn CrmClient>,
    /// Session token issuance and checks
    pub verifier: Arc<dyn TokenVerifier>,
    /// Metrics collector
    pub metrics: BridgeMetrics,
    /// Cached CRM field lists
    pub field_cache: FieldCache,
    pub started_at: Instant,
}

impl AppState {
    /// Assemble state around an existing store and CRM client
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn Store>,
        crm: Arc<dyn CrmClient>,
    ) -> BridgeResult<Self> {
        let metrics = BridgeMetrics::new(&config.observability.metrics_namespace)?;
        Ok(Self::with_metrics(config, store, crm, metrics))
    }

    fn with_metrics(
        config: BridgeConfig,
        store: Arc<dyn Store>,
        crm: Arc<dyn CrmClient>,
        metrics: BridgeMetrics,
    ) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.auth));
        let field_cache = FieldCache::new(Duration::from_secs(config.bitrix.fields_cache_ttl));

        Self {
            config,
            store,
            crm,
            verifier,
            metrics,
            field_cache,
            started_at: Instant::now(),
        }
    }

    /// Handler context for one delivery
    pub fn operation_context<'a>(
        &'a self,
        project: &'a Project,
        connection: &'a Connection,
    ) -> OperationContext<'a> {
        OperationContext::new(self.crm.as_ref(), &self.config, project, connection)
    }

    /// Create the configured admin account when the store has no admin yet
    pub async fn ensure_bootstrap_admin(&self) -> BridgeResult<()> {
        let (Some(email), Some(password)) = (
            self.config.auth.bootstrap_admin_email.as_deref(),
            self.config.auth.bootstrap_admin_password.as_deref(),
        ) else {
            return Ok(());
        };

        if self.store.count_admins().await? > 0 {
            return Ok(());
        }

        match self.store.find_user_by_email(email).await? {
            Some(mut user) => {
                user.role = Role::Admin;
                self.store.update_user(user).await?;
                info!(email = email, "Existing user promoted to admin");
            }
            None => {
                self.store
                    .create_user(User {
                        id: Uuid::new_v4(),
                        email: email.to_string(),
                        password_hash: hash_password(password)?,
                        name: Some("Administrator".to_string()),
                        role: Role::Admin,
                        created_at: Utc::now(),
                    })
                    .await?;
                info!(email = email, "Bootstrap admin created");
            }
        }

        Ok(())
    }
}

/// Main bridge service
pub struct BridgeService {
    /// Application state
    app_state: Arc<AppState>,
    /// Server address
    addr: SocketAddr,
}

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID generator
#[derive(Clone, Default)]
struct BridgeRequestId;

impl MakeRequestId for BridgeRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = format!("req-{}", Uuid::new_v4());
        axum::http::HeaderValue::from_str(&id)
            .ok()
            .map(RequestId::new)
    }
}

/// Tracing span carrying the request id set by [`BridgeRequestId`]
fn request_span<B>(request: &axum::http::Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = request_id,
    )
}

impl BridgeService {
    /// Create a new bridge service
    pub async fn new(config: BridgeConfig) -> BridgeResult<Self> {
        info!("Initializing CRM Bridge Service");

        config.validate().map_err(BridgeError::configuration)?;

        let metrics = BridgeMetrics::new(&config.observability.metrics_namespace)?;

        let crm = BitrixClient::new(Duration::from_secs(config.bitrix.request_timeout))?
            .with_metrics(metrics.clone());

        let store: Arc<dyn Store> = if config.database.postgres_url.is_empty() {
            warn!("No database configured, using in-memory store");
            Arc::new(MemoryStore::new())
        } else {
            let store = PostgresStore::connect(&config.database).await?;
            info!("Database store initialized");
            Arc::new(store)
        };

        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| BridgeError::configuration(format!("Invalid server address: {}", e)))?;

        let app_state = Arc::new(AppState::with_metrics(
            config,
            store,
            Arc::new(crm),
            metrics,
        ));

        app_state.ensure_bootstrap_admin().await?;

        Ok(Self { app_state, addr })
    }

    /// Shared state, for embedding the router elsewhere
    pub fn state(&self) -> Arc<AppState> {
        self.app_state.clone()
    }

    /// Start the bridge service
    pub async fn start(self) -> BridgeResult<()> {
        info!("Starting CRM Bridge Service on {}", self.addr);

        let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                request_id_header.clone(),
                BridgeRequestId,
            ))
            .layer(TraceLayer::new_for_http().make_span_with(request_span::<axum::body::Body>))
            .layer(PropagateRequestIdLayer::new(request_id_header))
            .layer(CompressionLayer::new());

        let mut app = create_routes(self.app_state.clone()).layer(middleware);

        if self.app_state.config.server.cors_enabled {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| BridgeError::internal(format!("Failed to bind to address: {}", e)))?;

        info!("CRM Bridge Service started successfully on {}", self.addr);

        if let Err(e) = serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(Self::shutdown_signal())
        .await
        {
            error!("Server error: {}", e);
            return Err(BridgeError::internal(format!("Server error: {}", e)));
        }

        info!("CRM Bridge Service stopped gracefully");
        Ok(())
    }

    /// Wait for shutdown signal
    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = terminate => {
                info!("Received terminate signal, shutting down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.server.port = 0;
        config
    }

    #[tokio::test]
    async fn test_service_rejects_invalid_config() {
        let result = BridgeService::new(config()).await;
        assert!(matches!(result, Err(BridgeError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_service_defaults_to_memory_store() {
        let service = BridgeService::new(BridgeConfig::default()).await.unwrap();
        assert_eq!(service.state().store.backend(), "memory");
    }

    #[tokio::test]
    async fn test_bootstrap_admin_created_once() {
        let mut config = BridgeConfig::default();
        config.auth.bootstrap_admin_email = Some("root@example.com".to_string());
        config.auth.bootstrap_admin_password = Some("changeme".to_string());

        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(BitrixClient::new(Duration::from_secs(1)).unwrap()),
        )
        .unwrap();

        state.ensure_bootstrap_admin().await.unwrap();
        state.ensure_bootstrap_admin().await.unwrap();

        let users = state.store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user.role, Role::Admin);
    }
}
