//! Inbound webhook delivery

use crate::dispatch::dispatch;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{
    webhook_path_for_token, ConnectionCategory, OperationResult, WebhookResponse,
};
use crate::service::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Metric label used before a connection is resolved
const UNRESOLVED: &str = "unresolved";

/// `POST /api/webhook/bitrix/:token`
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> BridgeResult<Json<WebhookResponse>> {
    let started = Instant::now();
    let mut category = UNRESOLVED;

    let result = deliver(&state, &token, &body, &mut category).await;

    let outcome = match &result {
        Ok(_) => "succeeded",
        Err(BridgeError::NotFound { .. }) if category == UNRESOLVED => "not_found",
        Err(BridgeError::Inactive { .. }) => "inactive",
        Err(_) => "failed",
    };
    state
        .metrics
        .record_webhook(category, outcome, started.elapsed());

    result.map(|result| Json(WebhookResponse::processed(result)))
}

async fn deliver(
    state: &AppState,
    token: &str,
    body: &[u8],
    category: &mut &'static str,
) -> BridgeResult<OperationResult> {
    let connection = state
        .store
        .find_connection_by_webhook(&webhook_path_for_token(token))
        .await?
        .ok_or_else(|| {
            debug!("Unknown webhook token");
            BridgeError::not_found("Webhook")
        })?;

    *category = connection
        .category
        .parse::<ConnectionCategory>()
        .map(|c| c.as_str())
        .unwrap_or("unsupported");

    if !connection.is_active() {
        warn!(connection_id = %connection.id, status = connection.status.as_str(), "Delivery to inactive connection");
        return Err(BridgeError::inactive(
            connection.id.to_string(),
            connection.status.as_str(),
        ));
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| BridgeError::validation(format!("Request body must be JSON: {}", e)))?;

    let project = state
        .store
        .find_project(connection.project_id)
        .await?
        .ok_or_else(|| BridgeError::not_found("Project"))?;

    info!(
        connection_id = %connection.id,
        project_id = %project.id,
        category = %connection.category,
        "Webhook received"
    );

    let ctx = state.operation_context(&project, &connection);
    dispatch(&ctx, &payload).await
}

/// `GET /api/webhook/bitrix/:token`: report whether a webhook exists
pub async fn probe_webhook(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> BridgeResult<Json<Value>> {
    let connection = state
        .store
        .find_connection_by_webhook(&webhook_path_for_token(&token))
        .await?
        .ok_or_else(|| BridgeError::not_found("Webhook"))?;

    Ok(Json(json!({
        "message": "Webhook is reachable",
        "connection": {
            "id": connection.id,
            "name": connection.name,
            "category": connection.category,
            "status": connection.status,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::TestApp;
    use crate::models::{Connection, ConnectionStatus, Project, ProjectStatus};
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn seed(app: &TestApp, crm_url: &str, category: &str, status: ConnectionStatus) -> String {
        let now = Utc::now();
        let project = app
            .state
            .store
            .create_project(Project {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                name: "Shop".into(),
                description: None,
                status: ProjectStatus::Active,
                bitrix_webhook_url: Some(crm_url.to_string()),
                test_mode: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let connection = app
            .state
            .store
            .create_connection(Connection {
                id: Uuid::new_v4(),
                project_id: project.id,
                name: "Orders".into(),
                description: None,
                category: category.to_string(),
                status,
                config: r#"{"STAGE_ID": "WON"}"#.into(),
                field_mapping: Some(r#"[{"sourceField": "client.name", "targetField": "NAME"}]"#.into()),
                funnel_id: None,
                stage_id: None,
                webhook_url: crate::models::generate_webhook_path(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        connection.webhook_url
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let app = TestApp::new();
        let response = app
            .server
            .post("/api/webhook/bitrix/deadbeef")
            .json(&json!({"anything": true}))
            .await;

        assert_eq!(response.status_code(), 404);
        assert_eq!(response.json::<Value>()["code"], json!("NOT_FOUND"));
        assert_eq!(app.state.metrics.webhook_count(UNRESOLVED, "not_found"), 1);
    }

    #[tokio::test]
    async fn test_inactive_connection_is_rejected() {
        let app = TestApp::new();
        let path = seed(&app, "https://acme.bitrix24.ru/rest/1/k/", "CREATE_LEAD", ConnectionStatus::Inactive).await;

        let response = app.server.post(&path).json(&json!({"client": {"name": "A"}})).await;

        assert_eq!(response.status_code(), 400);
        assert_eq!(response.json::<Value>()["code"], json!("CONNECTION_INACTIVE"));
    }

    #[tokio::test]
    async fn test_unsupported_category() {
        let app = TestApp::new();
        let path = seed(&app, "https://acme.bitrix24.ru/rest/1/k/", "SEND_SMS", ConnectionStatus::Active).await;

        let response = app.server.post(&path).json(&json!({})).await;

        assert_eq!(response.status_code(), 400);
        assert_eq!(response.json::<Value>()["code"], json!("UNSUPPORTED_CATEGORY"));
        assert_eq!(app.state.metrics.webhook_count("unsupported", "failed"), 1);
    }

    #[tokio::test]
    async fn test_non_json_body() {
        let app = TestApp::new();
        let path = seed(&app, "https://acme.bitrix24.ru/rest/1/k/", "CREATE_LEAD", ConnectionStatus::Active).await;

        let response = app.server.post(&path).text("name=A").await;

        assert_eq!(response.status_code(), 400);
        assert_eq!(response.json::<Value>()["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_lead_delivered_to_crm() {
        let crm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/1/k/crm.lead.add.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 901})))
            .expect(1)
            .mount(&crm)
            .await;

        let app = TestApp::new();
        let hook = seed(&app, &format!("{}/rest/1/k/", crm.uri()), "CREATE_LEAD", ConnectionStatus::Active).await;

        let response = app
            .server
            .post(&hook)
            .json(&json!({"client": {"name": "Anna"}}))
            .await;

        assert_eq!(response.status_code(), 200);
        let body = response.json::<Value>();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["result"]["bitrixId"], json!(901));
        assert_eq!(body["result"]["type"], json!("lead"));
        assert_eq!(body["result"]["fields"], json!({"NAME": "Anna", "STATUS_ID": "NEW"}));
        assert_eq!(app.state.metrics.webhook_count("CREATE_LEAD", "succeeded"), 1);
    }

    #[tokio::test]
    async fn test_crm_error_is_bad_gateway() {
        let crm = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "ERROR_CORE",
                "error_description": "Deal not found"
            })))
            .mount(&crm)
            .await;

        let app = TestApp::new();
        let hook = seed(&app, &crm.uri(), "MOVE_DEAL", ConnectionStatus::Active).await;

        let response = app.server.post(&hook).json(&json!({"dealId": 4})).await;

        assert_eq!(response.status_code(), 502);
        let body = response.json::<Value>();
        assert_eq!(body["code"], json!("UPSTREAM_ERROR"));
        assert!(body["error"].as_str().unwrap().contains("Deal not found"));
    }

    #[tokio::test]
    async fn test_probe() {
        let app = TestApp::new();
        let hook = seed(&app, "https://acme.bitrix24.ru/rest/1/k/", "CREATE_DEAL", ConnectionStatus::Pending).await;

        let response = app.server.get(&hook).await;
        assert_eq!(response.status_code(), 200);
        let body = response.json::<Value>();
        assert_eq!(body["connection"]["category"], json!("CREATE_DEAL"));
        assert_eq!(body["connection"]["status"], json!("PENDING"));

        let missing = app.server.get("/api/webhook/bitrix/missing").await;
        assert_eq!(missing.status_code(), 404);
    }
}
