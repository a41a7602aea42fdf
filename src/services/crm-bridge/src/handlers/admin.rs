//! Admin-only account and project management

use crate::auth::{hash_password, Principal};
use crate::error::{BridgeError, BridgeResult};
use crate::handlers::non_blank;
use crate::models::{Role, User};
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
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[serde(default)]
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: Option<String>,
}

async fn load_user(state: &AppState, id: Uuid) -> BridgeResult<User> {
    state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| BridgeError::not_found("User"))
}

/// Refuse to remove the last remaining admin
async fn ensure_other_admin(state: &AppState, user: &User) -> BridgeResult<()> {
    if user.is_admin() && state.store.count_admins().await? <= 1 {
        return Err(BridgeError::validation("Cannot remove the last admin"));
    }
    Ok(())
}

/// `GET /api/admin/users`
pub async fn list_users(State(state): State<Arc<AppState>>) -> BridgeResult<Json<Value>> {
    let users = state.store.list_users().await?;
    Ok(Json(json!({ "users": users })))
}

/// `POST /api/admin/users`
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateUserRequest>,
) -> BridgeResult<impl IntoResponse> {
    request.validate()?;

    let email = request.email.trim().to_lowercase();
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(BridgeError::validation("A user with this email already exists"));
    }

    let user = state
        .store
        .create_user(User {
            id: Uuid::new_v4(),
            email,
            password_hash: hash_password(&request.password)?,
            name: non_blank(request.name),
            role: request.role.unwrap_or(Role::User),
            created_at: Utc::now(),
        })
        .await?;

    info!(user_id = %user.id, role = user.role.as_str(), created_by = %principal.user_id, "User created by admin");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully", "user": user })),
    ))
}

/// `PATCH /api/admin/users/:id`
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> BridgeResult<Json<Value>> {
    request.validate()?;
    let mut user = load_user(&state, id).await?;

    if request.name.is_some() {
        user.name = non_blank(request.name);
    }
    if let Some(role) = request.role {
        if role != Role::Admin {
            ensure_other_admin(&state, &user).await?;
        }
        user.role = role;
    }
    if let Some(ref password) = request.password {
        user.password_hash = hash_password(password)?;
    }

    let user = state.store.update_user(user).await?;

    info!(user_id = %user.id, role = user.role.as_str(), "User updated");
    Ok(Json(json!({ "message": "User updated successfully", "user": user })))
}

/// `DELETE /api/admin/users/:id`: removes the user's projects and connections too
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> BridgeResult<Json<Value>> {
    if id == principal.user_id {
        return Err(BridgeError::validation("You cannot delete your own account"));
    }

    let user = load_user(&state, id).await?;
    ensure_other_admin(&state, &user).await?;

    state.store.delete_user(user.id).await?;

    warn!(user_id = %user.id, deleted_by = %principal.user_id, "User deleted");
    Ok(Json(json!({ "message": "User deleted" })))
}

/// `GET /api/admin/projects`
pub async fn list_projects(State(state): State<Arc<AppState>>) -> BridgeResult<Json<Value>> {
    let projects = state.store.list_all_projects().await?;
    Ok(Json(json!({ "projects": projects })))
}
