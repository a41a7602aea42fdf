//! Project management endpoints

use crate::auth::Principal;
use crate::error::{BridgeError, BridgeResult};
use crate::handlers::{accessible_project, non_blank};
use crate::models::{Project, ProjectStatus};
use crate::service::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use url::Url;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "Project name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub bitrix_webhook_url: Option<String>,
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "Project name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub bitrix_webhook_url: Option<String>,
    pub test_mode: Option<bool>,
}

/// Blank clears the URL; anything else must be an absolute http(s) URL
fn crm_url(value: Option<String>) -> BridgeResult<Option<String>> {
    let Some(url) = non_blank(value) else {
        return Ok(None);
    };
    let parsed = Url::parse(&url)
        .map_err(|e| BridgeError::validation(format!("Invalid Bitrix webhook URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BridgeError::validation(
            "Bitrix webhook URL must use http or https",
        ));
    }
    Ok(Some(url))
}

/// `GET /api/projects`
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> BridgeResult<Json<Value>> {
    let projects = state
        .store
        .list_projects_by_owner(principal.user_id)
        .await?;
    Ok(Json(json!({ "projects": projects })))
}

/// `POST /api/projects`
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateProjectRequest>,
) -> BridgeResult<impl IntoResponse> {
    request.validate()?;

    let now = Utc::now();
    let project = state
        .store
        .create_project(Project {
            id: Uuid::new_v4(),
            user_id: principal.user_id,
            name: request.name.trim().to_string(),
            description: non_blank(request.description),
            status: ProjectStatus::Active,
            bitrix_webhook_url: crm_url(request.bitrix_webhook_url)?,
            test_mode: request.test_mode,
            created_at: now,
            updated_at: now,
        })
        .await?;

    info!(project_id = %project.id, user_id = %principal.user_id, "Project created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Project created successfully", "project": project })),
    ))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> BridgeResult<Json<Value>> {
    let project = accessible_project(&state, &principal, id).await?;
    Ok(Json(json!({ "project": project })))
}

/// `PUT /api/projects/:id`
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProjectRequest>,
) -> BridgeResult<Json<Value>> {
    request.validate()?;

    let mut project = accessible_project(&state, &principal, id).await?;
    let previous_url = project.bitrix_webhook_url.clone();

    if let Some(name) = request.name {
        project.name = name.trim().to_string();
    }
    if request.description.is_some() {
        project.description = non_blank(request.description);
    }
    if let Some(status) = request.status {
        project.status = status;
    }
    if request.bitrix_webhook_url.is_some() {
        project.bitrix_webhook_url = crm_url(request.bitrix_webhook_url)?;
    }
    if let Some(test_mode) = request.test_mode {
        project.test_mode = test_mode;
    }
    project.updated_at = Utc::now();

    let project = state.store.update_project(project).await?;

    if let Some(url) = previous_url {
        state.field_cache.invalidate(&url);
    }

    info!(project_id = %project.id, "Project updated");
    Ok(Json(json!({ "project": project })))
}

/// `DELETE /api/projects/:id`: removes the project's connections too
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> BridgeResult<Json<Value>> {
    let project = accessible_project(&state, &principal, id).await?;

    state.store.delete_project(project.id).await?;
    if let Some(ref url) = project.bitrix_webhook_url {
        state.field_cache.invalidate(url);
    }

    info!(project_id = %project.id, "Project deleted");
    Ok(Json(json!({ "message": "Project deleted" })))
}
