//! Persistence for users, projects and connections
//!
//! Handlers only see the [`Store`] trait. [`MemoryStore`] backs tests and
//! single-node demos; [`PostgresStore`] is used whenever a database URL is
//! configured.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::BridgeResult;
use crate::models::{Connection, Project, ProjectWithOwner, User, UserSummary};
use async_trait::async_trait;
use uuid::Uuid;

/// Storage backend used by the HTTP layer
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for health reporting
    fn backend(&self) -> &'static str;

    /// Check that the backend is reachable
    async fn health_check(&self) -> BridgeResult<()>;

    async fn find_user(&self, id: Uuid) -> BridgeResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> BridgeResult<Option<User>>;

    /// All users with their project counts, newest first
    async fn list_users(&self) -> BridgeResult<Vec<UserSummary>>;

    async fn count_admins(&self) -> BridgeResult<i64>;

    /// Insert a user; a taken email is a validation error
    async fn create_user(&self, user: User) -> BridgeResult<User>;

    async fn update_user(&self, user: User) -> BridgeResult<User>;

    /// Delete a user together with their projects and connections
    async fn delete_user(&self, id: Uuid) -> BridgeResult<bool>;

    async fn find_project(&self, id: Uuid) -> BridgeResult<Option<Project>>;

    /// Projects owned by `user_id`, newest first
    async fn list_projects_by_owner(&self, user_id: Uuid) -> BridgeResult<Vec<Project>>;

    /// Every project with its owner, newest first
    async fn list_all_projects(&self) -> BridgeResult<Vec<ProjectWithOwner>>;

    async fn create_project(&self, project: Project) -> BridgeResult<Project>;

    async fn update_project(&self, project: Project) -> BridgeResult<Project>;

    /// Delete a project and its connections
    async fn delete_project(&self, id: Uuid) -> BridgeResult<bool>;

    /// Connection `id` if it belongs to `project_id`
    async fn find_connection(&self, project_id: Uuid, id: Uuid) -> BridgeResult<Option<Connection>>;

    async fn find_connection_by_webhook(&self, webhook_path: &str) -> BridgeResult<Option<Connection>>;

    /// Connections of a project, newest first
    async fn list_connections(&self, project_id: Uuid) -> BridgeResult<Vec<Connection>>;

    /// Insert a connection; its webhook path must be unused
    async fn create_connection(&self, connection: Connection) -> BridgeResult<Connection>;

    /// Persist edits. The stored webhook path is never changed.
    async fn update_connection(&self, connection: Connection) -> BridgeResult<Connection>;

    async fn delete_connection(&self, project_id: Uuid, id: Uuid) -> BridgeResult<bool>;
}
