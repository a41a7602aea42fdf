//! PostgreSQL store

use super::Store;
use crate::config::DatabaseConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{Connection, OwnerInfo, Project, ProjectWithOwner, User, UserSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, password_hash, name, role, created_at";
const PROJECT_COLUMNS: &str = "id, user_id, name, description, status, bitrix_webhook_url, \
                               test_mode, created_at, updated_at";
const CONNECTION_COLUMNS: &str = "id, project_id, name, description, category, status, config, \
                                  field_mapping, funnel_id, stage_id, webhook_url, created_at, \
                                  updated_at";

/// SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and optionally apply the embedded migrations
    pub async fn connect(config: &DatabaseConfig) -> BridgeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.postgres_url)
            .await?;

        if config.run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| BridgeError::internal(format!("Migration failed: {}", e)))?;
            info!("Database migrations applied");
        }

        info!("PostgreSQL connection pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = BridgeError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            role: row.role.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct UserSummaryRow {
    #[sqlx(flatten)]
    user: UserRow,
    project_count: i64,
}

#[derive(FromRow)]
struct ProjectRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    description: Option<String>,
    status: String,
    bitrix_webhook_url: Option<String>,
    test_mode: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = BridgeError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            status: row.status.parse()?,
            bitrix_webhook_url: row.bitrix_webhook_url,
            test_mode: row.test_mode,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ProjectOwnerRow {
    #[sqlx(flatten)]
    project: ProjectRow,
    owner_email: String,
    owner_name: Option<String>,
}

#[derive(FromRow)]
struct ConnectionRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    description: Option<String>,
    category: String,
    status: String,
    config: String,
    field_mapping: Option<String>,
    funnel_id: Option<String>,
    stage_id: Option<String>,
    webhook_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConnectionRow> for Connection {
    type Error = BridgeError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        Ok(Connection {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            category: row.category,
            status: row.status.parse()?,
            config: row.config,
            field_mapping: row.field_mapping,
            funnel_id: row.funnel_id,
            stage_id: row.stage_id,
            webhook_url: row.webhook_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> BridgeResult<Vec<T>>
where
    T: TryFrom<R, Error = BridgeError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> BridgeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> BridgeResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> BridgeResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self) -> BridgeResult<Vec<UserSummary>> {
        let rows: Vec<UserSummaryRow> = sqlx::query_as(
            r#"
            SELECT u.id, u.email, u.password_hash, u.name, u.role, u.created_at,
                   COUNT(p.id) AS project_count
            FROM users u
            LEFT JOIN projects p ON p.user_id = u.id
            GROUP BY u.id
            ORDER BY u.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(UserSummary {
                    user: User::try_from(row.user)?,
                    project_count: row.project_count,
                })
            })
            .collect()
    }

    async fn count_admins(&self) -> BridgeResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'ADMIN'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create_user(&self, user: User) -> BridgeResult<User> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BridgeError::validation("A user with this email already exists")
            } else {
                BridgeError::from(e)
            }
        })?;
        Ok(user)
    }

    async fn update_user(&self, user: User) -> BridgeResult<User> {
        let result = sqlx::query(
            "UPDATE users SET email = $2, password_hash = $3, name = $4, role = $5 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BridgeError::validation("A user with this email already exists")
            } else {
                BridgeError::from(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(BridgeError::not_found("User"));
        }
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> BridgeResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_project(&self, id: Uuid) -> BridgeResult<Option<Project>> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE id = $1",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn list_projects_by_owner(&self, user_id: Uuid) -> BridgeResult<Vec<Project>> {
        let rows: Vec<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM projects WHERE user_id = $1 ORDER BY created_at DESC",
            PROJECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_all_projects(&self) -> BridgeResult<Vec<ProjectWithOwner>> {
        let rows: Vec<ProjectOwnerRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.user_id, p.name, p.description, p.status, p.bitrix_webhook_url,
                   p.test_mode, p.created_at, p.updated_at,
                   u.email AS owner_email, u.name AS owner_name
            FROM projects p
            JOIN users u ON u.id = p.user_id
            ORDER BY p.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let project = Project::try_from(row.project)?;
                Ok(ProjectWithOwner {
                    user: OwnerInfo {
                        id: project.user_id,
                        email: row.owner_email,
                        name: row.owner_name,
                    },
                    project,
                })
            })
            .collect()
    }

    async fn create_project(&self, project: Project) -> BridgeResult<Project> {
        sqlx::query(
            "INSERT INTO projects (id, user_id, name, description, status, bitrix_webhook_url, \
             test_mode, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(project.id)
        .bind(project.user_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(&project.bitrix_webhook_url)
        .bind(project.test_mode)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(project)
    }

    async fn update_project(&self, project: Project) -> BridgeResult<Project> {
        let result = sqlx::query(
            "UPDATE projects SET name = $2, description = $3, status = $4, \
             bitrix_webhook_url = $5, test_mode = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(&project.bitrix_webhook_url)
        .bind(project.test_mode)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BridgeError::not_found("Project"));
        }
        Ok(project)
    }

    async fn delete_project(&self, id: Uuid) -> BridgeResult<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_connection(&self, project_id: Uuid, id: Uuid) -> BridgeResult<Option<Connection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM connections WHERE id = $1 AND project_id = $2",
            CONNECTION_COLUMNS
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Connection::try_from).transpose()
    }

    async fn find_connection_by_webhook(&self, webhook_path: &str) -> BridgeResult<Option<Connection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM connections WHERE webhook_url = $1",
            CONNECTION_COLUMNS
        ))
        .bind(webhook_path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Connection::try_from).transpose()
    }

    async fn list_connections(&self, project_id: Uuid) -> BridgeResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM connections WHERE project_id = $1 ORDER BY created_at DESC",
            CONNECTION_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn create_connection(&self, connection: Connection) -> BridgeResult<Connection> {
        sqlx::query(
            "INSERT INTO connections (id, project_id, name, description, category, status, \
             config, field_mapping, funnel_id, stage_id, webhook_url, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(connection.id)
        .bind(connection.project_id)
        .bind(&connection.name)
        .bind(&connection.description)
        .bind(&connection.category)
        .bind(connection.status.as_str())
        .bind(&connection.config)
        .bind(&connection.field_mapping)
        .bind(&connection.funnel_id)
        .bind(&connection.stage_id)
        .bind(&connection.webhook_url)
        .bind(connection.created_at)
        .bind(connection.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BridgeError::internal("Webhook path collision")
            } else {
                BridgeError::from(e)
            }
        })?;
        Ok(connection)
    }

    async fn update_connection(&self, connection: Connection) -> BridgeResult<Connection> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "UPDATE connections SET name = $3, description = $4, category = $5, status = $6, \
             config = $7, field_mapping = $8, funnel_id = $9, stage_id = $10, updated_at = $11 \
             WHERE id = $1 AND project_id = $2 RETURNING {}",
            CONNECTION_COLUMNS
        ))
        .bind(connection.id)
        .bind(connection.project_id)
        .bind(&connection.name)
        .bind(&connection.description)
        .bind(&connection.category)
        .bind(connection.status.as_str())
        .bind(&connection.config)
        .bind(&connection.field_mapping)
        .bind(&connection.funnel_id)
        .bind(&connection.stage_id)
        .bind(connection.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Connection::try_from)
            .transpose()?
            .ok_or_else(|| BridgeError::not_found("Connection"))
    }

    async fn delete_connection(&self, project_id: Uuid, id: Uuid) -> BridgeResult<bool> {
        let result = sqlx::query("DELETE FROM connections WHERE id = $1 AND project_id = $2")
            .bind(id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
