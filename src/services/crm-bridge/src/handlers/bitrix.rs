//! CRM metadata endpoints used by the connection editor

use crate::auth::Principal;
use crate::bitrix::{Funnel, Stage};
use crate::error::{BridgeError, BridgeResult};
use crate::handlers::accessible_project;
use crate::models::{CrmEntity, Project};
use crate::service::AppState;
use axum::{
    extract::{Query, State},
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataQuery {
    pub project_id: Uuid,
    pub funnel_id: Option<String>,
    pub entity_type: Option<String>,
}

/// CRM base URL for live calls, or `None` when the project answers synthetically
async fn crm_target(
    state: &AppState,
    principal: &Principal,
    project_id: Uuid,
) -> BridgeResult<Option<String>> {
    let project: Project = accessible_project(state, principal, project_id).await?;
    let base_url = project
        .crm_base_url()
        .ok_or_else(|| BridgeError::missing_crm_config(project.id.to_string()))?;

    if project.test_mode || state.config.is_sentinel_url(base_url) {
        debug!(project_id = %project.id, "Metadata request for demo project");
        return Ok(None);
    }
    Ok(Some(base_url.to_string()))
}

/// Status-list filter selecting one funnel's deal stages
fn stage_filter(funnel_id: &str) -> Value {
    if funnel_id == "0" {
        json!({ "ENTITY_ID": "DEAL_STAGE" })
    } else {
        json!({ "ENTITY_ID": format!("DEAL_STAGE_{}", funnel_id) })
    }
}

/// `GET /api/bitrix/funnels?projectId=`
pub async fn list_funnels(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<MetadataQuery>,
) -> BridgeResult<Json<Value>> {
    let Some(base_url) = crm_target(&state, &principal, query.project_id).await? else {
        return Ok(Json(json!({ "funnels": [], "testMode": true })));
    };

    let statuses = state.crm.list_statuses(&base_url, json!({})).await?;
    let funnels = Funnel::group(statuses);
    Ok(Json(json!({ "funnels": funnels })))
}

/// `GET /api/bitrix/stages?projectId=&funnelId=`
pub async fn list_stages(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<MetadataQuery>,
) -> BridgeResult<Json<Value>> {
    let Some(base_url) = crm_target(&state, &principal, query.project_id).await? else {
        return Ok(Json(json!({ "stages": [], "testMode": true })));
    };

    let funnel_id = query
        .funnel_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or("0");

    let mut stages: Vec<Stage> = state
        .crm
        .list_statuses(&base_url, stage_filter(funnel_id))
        .await?
        .into_iter()
        .map(Stage::from)
        .collect();
    stages.sort_by_key(|stage| stage.sort);

    Ok(Json(json!({ "stages": stages })))
}

/// `GET /api/bitrix/fields?projectId=&entityType=deal|lead`
pub async fn list_fields(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<MetadataQuery>,
) -> BridgeResult<Json<Value>> {
    let entity = match query.entity_type.as_deref().unwrap_or("deal") {
        "deal" => CrmEntity::Deal,
        "lead" => CrmEntity::Lead,
        other => {
            return Err(BridgeError::validation(format!(
                "Unknown entityType: {}",
                other
            )))
        }
    };

    let Some(base_url) = crm_target(&state, &principal, query.project_id).await? else {
        return Ok(Json(json!({ "fields": [], "testMode": true })));
    };

    let fields = state
        .field_cache
        .get_or_fetch(state.crm.as_ref(), &base_url, entity)
        .await?;
    Ok(Json(json!({ "fields": fields })))
}
