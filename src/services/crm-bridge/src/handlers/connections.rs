//! Connection management endpoints

use crate::auth::Principal;
use crate::dispatch::dispatch;
use crate::error::{BridgeError, BridgeResult};
use crate::handlers::{accessible_project, non_blank};
use crate::models::{
    generate_webhook_path, Connection, ConnectionCategory, ConnectionSettings, ConnectionStatus,
    FieldMappingRule, Project, WebhookResponse,
};
use crate::service::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "Connection name is required"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "Category is required"))]
    pub category: String,
    pub status: Option<ConnectionStatus>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub field_mapping: Value,
    pub funnel_id: Option<String>,
    pub stage_id: Option<String>,
}

/// Partial update. For `fieldMapping`, an absent key keeps the rules and
/// `null` clears them.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionRequest {
    #[validate(length(min = 1, max = 200, message = "Connection name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: Option<ConnectionStatus>,
    pub config: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub field_mapping: Option<Value>,
    pub funnel_id: Option<String>,
    pub stage_id: Option<String>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn category_name(category: &str) -> BridgeResult<String> {
    Ok(category.trim().parse::<ConnectionCategory>()?.as_str().to_string())
}

fn config_text(config: &Value) -> BridgeResult<String> {
    ConnectionSettings::from_value(config)?;
    Ok(match config {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    })
}

/// Normalize mapping rules supplied as a JSON array or as its text
fn mapping_text(field_mapping: &Value) -> BridgeResult<Option<String>> {
    let text = match field_mapping {
        Value::Null => return Ok(None),
        Value::String(text) if text.trim().is_empty() => return Ok(None),
        Value::String(text) => text.clone(),
        Value::Array(_) => field_mapping.to_string(),
        _ => return Err(BridgeError::validation("fieldMapping must be an array of rules")),
    };

    FieldMappingRule::parse_list(Some(&text))
        .map_err(|e| BridgeError::validation(format!("Invalid fieldMapping: {}", e)))?;
    Ok(Some(text))
}

async fn project_connection(
    state: &AppState,
    principal: &Principal,
    project_id: Uuid,
    connection_id: Uuid,
) -> BridgeResult<(Project, Connection)> {
    let project = accessible_project(state, principal, project_id).await?;
    let connection = state
        .store
        .find_connection(project.id, connection_id)
        .await?
        .ok_or_else(|| BridgeError::not_found("Connection"))?;
    Ok((project, connection))
}

/// `GET /api/projects/:id/connections`
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<Uuid>,
) -> BridgeResult<Json<Value>> {
    let project = accessible_project(&state, &principal, project_id).await?;
    let connections = state.store.list_connections(project.id).await?;
    Ok(Json(json!({ "connections": connections })))
}

/// `POST /api/projects/:id/connections`: issues a fresh webhook path
pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<CreateConnectionRequest>,
) -> BridgeResult<impl IntoResponse> {
    request.validate()?;
    let project = accessible_project(&state, &principal, project_id).await?;

    let now = Utc::now();
    let connection = state
        .store
        .create_connection(Connection {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: request.name.trim().to_string(),
            description: non_blank(request.description),
            category: category_name(&request.category)?,
            status: request.status.unwrap_or(ConnectionStatus::Active),
            config: config_text(&request.config)?,
            field_mapping: mapping_text(&request.field_mapping)?,
            funnel_id: non_blank(request.funnel_id),
            stage_id: non_blank(request.stage_id),
            webhook_url: generate_webhook_path(),
            created_at: now,
            updated_at: now,
        })
        .await?;

    info!(
        connection_id = %connection.id,
        project_id = %project.id,
        category = %connection.category,
        "Connection created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Connection created successfully", "connection": connection })),
    ))
}

/// `GET /api/projects/:id/connections/:connection_id`
pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((project_id, connection_id)): Path<(Uuid, Uuid)>,
) -> BridgeResult<Json<Value>> {
    let (_, connection) = project_connection(&state, &principal, project_id, connection_id).await?;
    Ok(Json(json!({ "connection": connection })))
}

/// `PUT /api/projects/:id/connections/:connection_id`
pub async fn update_connection(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((project_id, connection_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateConnectionRequest>,
) -> BridgeResult<Json<Value>> {
    request.validate()?;
    let (_, mut connection) =
        project_connection(&state, &principal, project_id, connection_id).await?;

    if let Some(name) = request.name {
        connection.name = name.trim().to_string();
    }
    if request.description.is_some() {
        connection.description = non_blank(request.description);
    }
    if let Some(ref category) = request.category {
        connection.category = category_name(category)?;
    }
    if let Some(status) = request.status {
        connection.status = status;
    }
    if let Some(ref config) = request.config {
        connection.config = config_text(config)?;
    }
    if let Some(ref field_mapping) = request.field_mapping {
        connection.field_mapping = mapping_text(field_mapping)?;
    }
    if request.funnel_id.is_some() {
        connection.funnel_id = non_blank(request.funnel_id);
    }
    if request.stage_id.is_some() {
        connection.stage_id = non_blank(request.stage_id);
    }
    connection.updated_at = Utc::now();

    let connection = state.store.update_connection(connection).await?;

    info!(connection_id = %connection.id, "Connection updated");
    Ok(Json(json!({ "message": "Connection updated successfully", "connection": connection })))
}

/// `DELETE /api/projects/:id/connections/:connection_id`
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((project_id, connection_id)): Path<(Uuid, Uuid)>,
) -> BridgeResult<Json<Value>> {
    let project = accessible_project(&state, &principal, project_id).await?;

    if !state.store.delete_connection(project.id, connection_id).await? {
        return Err(BridgeError::not_found("Connection"));
    }

    info!(connection_id = %connection_id, "Connection deleted");
    Ok(Json(json!({ "message": "Connection deleted" })))
}

/// `POST /api/projects/:id/connections/:connection_id/test`
///
/// Runs the request body through the connection as a sample payload. The
/// connection's status is not checked, so paused connections can be tried out.
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((project_id, connection_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<Value>,
) -> BridgeResult<Json<WebhookResponse>> {
    let (project, connection) =
        project_connection(&state, &principal, project_id, connection_id).await?;

    info!(connection_id = %connection.id, "Test delivery");

    let ctx = state.operation_context(&project, &connection);
    let result = dispatch(&ctx, &payload).await?;
    Ok(Json(WebhookResponse::processed(result)))
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::TestApp;
    use crate::models::Role;
    use axum::http::{header::AUTHORIZATION, HeaderValue};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    async fn project(app: &TestApp, auth: &HeaderValue, body: Value) -> String {
        let response = app
            .server
            .post("/api/projects")
            .add_header(AUTHORIZATION, auth.clone())
            .json(&body)
            .await;
        assert_eq!(response.status_code(), 201);
        response.json::<Value>()["project"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_create_accepts_rule_array_and_issues_path() {
        let app = TestApp::new();
        let (_, auth) = app.user("owner@example.com", Role::User).await;
        let project_id = project(&app, &auth, json!({"name": "Shop"})).await;

        let response = app
            .server
            .post(&format!("/api/projects/{}/connections", project_id))
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({
                "name": "Orders",
                "category": "CREATE_DEAL",
                "config": {"STAGE_ID": "NEW"},
                "fieldMapping": [{"sourceField": "order.title", "targetField": "TITLE"}],
                "funnelId": "2"
            }))
            .await;
        assert_eq!(response.status_code(), 201);

        let connection = response.json::<Value>()["connection"].clone();
        assert_eq!(connection["status"], json!("ACTIVE"));
        assert_eq!(connection["funnelId"], json!("2"));
        assert!(connection["webhookUrl"]
            .as_str()
            .unwrap()
            .starts_with("/api/webhook/bitrix/"));
        let rules: Value =
            serde_json::from_str(connection["fieldMapping"].as_str().unwrap()).unwrap();
        assert_eq!(rules[0]["targetField"], json!("TITLE"));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_category() {
        let app = TestApp::new();
        let (_, auth) = app.user("owner@example.com", Role::User).await;
        let project_id = project(&app, &auth, json!({"name": "Shop"})).await;

        let response = app
            .server
            .post(&format!("/api/projects/{}/connections", project_id))
            .add_header(AUTHORIZATION, auth)
            .json(&json!({"name": "X", "category": "DELETE_DEAL"}))
            .await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.json::<Value>()["code"], json!("UNSUPPORTED_CATEGORY"));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_rules() {
        let app = TestApp::new();
        let (_, auth) = app.user("owner@example.com", Role::User).await;
        let project_id = project(&app, &auth, json!({"name": "Shop"})).await;

        let response = app
            .server
            .post(&format!("/api/projects/{}/connections", project_id))
            .add_header(AUTHORIZATION, auth)
            .json(&json!({"name": "X", "category": "CREATE_LEAD", "fieldMapping": "{oops"}))
            .await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.json::<Value>()["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_update_keeps_webhook_path_and_rules() {
        let app = TestApp::new();
        let (_, auth) = app.user("owner@example.com", Role::User).await;
        let project_id = project(&app, &auth, json!({"name": "Shop"})).await;

        let created = app
            .server
            .post(&format!("/api/projects/{}/connections", project_id))
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({
                "name": "Orders",
                "category": "MOVE_DEAL",
                "fieldMapping": r#"[{"sourceField": "id", "targetField": "dealId"}]"#
            }))
            .await
            .json::<Value>()["connection"]
            .clone();
        let id = created["id"].as_str().unwrap();

        let updated = app
            .server
            .put(&format!("/api/projects/{}/connections/{}", project_id, id))
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({
                "name": "Orders v2",
                "status": "INACTIVE",
                "webhookUrl": "/api/webhook/bitrix/hijack"
            }))
            .await;
        assert_eq!(updated.status_code(), 200);
        let connection = updated.json::<Value>()["connection"].clone();
        assert_eq!(connection["name"], json!("Orders v2"));
        assert_eq!(connection["status"], json!("INACTIVE"));
        assert_eq!(connection["webhookUrl"], created["webhookUrl"]);
        assert_eq!(connection["fieldMapping"], created["fieldMapping"]);

        let cleared = app
            .server
            .put(&format!("/api/projects/{}/connections/{}", project_id, id))
            .add_header(AUTHORIZATION, auth)
            .json(&json!({"fieldMapping": null}))
            .await;
        assert_eq!(cleared.json::<Value>()["connection"]["fieldMapping"], Value::Null);
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let app = TestApp::new();
        let (_, auth) = app.user("owner@example.com", Role::User).await;
        let project_id = project(&app, &auth, json!({"name": "Shop"})).await;

        let created = app
            .server
            .post(&format!("/api/projects/{}/connections", project_id))
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({"name": "Leads", "category": "CREATE_LEAD"}))
            .await
            .json::<Value>();
        let id = created["connection"]["id"].as_str().unwrap();
        let url = format!("/api/projects/{}/connections/{}", project_id, id);

        let deleted = app
            .server
            .delete(&url)
            .add_header(AUTHORIZATION, auth.clone())
            .await;
        assert_eq!(deleted.status_code(), 200);

        let again = app.server.delete(&url).add_header(AUTHORIZATION, auth).await;
        assert_eq!(again.status_code(), 404);
    }

    #[tokio::test]
    async fn test_connection_test_runs_in_test_mode() {
        let app = TestApp::new();
        let (_, auth) = app.user("owner@example.com", Role::User).await;
        let project_id = project(
            &app,
            &auth,
            json!({
                "name": "Demo",
                "bitrixWebhookUrl": "https://acme.bitrix24.ru/rest/1/k/",
                "testMode": true
            }),
        )
        .await;

        let created = app
            .server
            .post(&format!("/api/projects/{}/connections", project_id))
            .add_header(AUTHORIZATION, auth.clone())
            .json(&json!({
                "name": "Leads",
                "category": "CREATE_LEAD",
                "status": "PENDING",
                "fieldMapping": [{"sourceField": "who", "targetField": "NAME"}]
            }))
            .await
            .json::<Value>();
        let id = created["connection"]["id"].as_str().unwrap();

        let response = app
            .server
            .post(&format!("/api/projects/{}/connections/{}/test", project_id, id))
            .add_header(AUTHORIZATION, auth)
            .json(&json!({"who": "Oleg"}))
            .await;
        assert_eq!(response.status_code(), 200);
        let body = response.json::<Value>();
        assert_eq!(body["result"]["testMode"], json!(true));
        assert_eq!(body["result"]["mappedData"], json!({"NAME": "Oleg"}));
        let id = body["result"]["bitrixId"].as_i64().unwrap();
        assert!((1000..11000).contains(&id));
    }
}
