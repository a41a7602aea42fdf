//! Registration and session endpoints

use crate::auth::{clear_session_cookie, hash_password, session_cookie, verify_password};
use crate::error::{BridgeError, BridgeResult};
use crate::handlers::non_blank;
use crate::models::{Role, User};
use crate::service::AppState;
use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// `POST /api/auth/register`: create a USER account
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
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
            role: Role::User,
            created_at: Utc::now(),
        })
        .await?;

    info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully", "user": user })),
    ))
}

/// `POST /api/auth/login`: check credentials and start a session
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> BridgeResult<impl IntoResponse> {
    request.validate()?;

    let email = request.email.trim().to_lowercase();
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .filter(|user| verify_password(&request.password, &user.password_hash))
        .ok_or_else(|| {
            warn!("Failed login attempt");
            BridgeError::unauthorized("Invalid email or password")
        })?;

    let token = state.verifier.issue(&user)?;
    let cookie = session_cookie(&state.config.auth, &token);

    info!(user_id = %user.id, "User logged in");

    Ok((
        [(SET_COOKIE, cookie)],
        Json(json!({
            "message": "Logged in successfully",
            "user": user,
            "token": token,
        })),
    ))
}

/// `POST /api/auth/logout`: drop the session cookie
pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_session_cookie(&state.config.auth))],
        Json(json!({ "message": "Logged out successfully" })),
    )
}
