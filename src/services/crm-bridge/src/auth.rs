//! Session tokens, password hashing and request authentication

use crate::config::AuthConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{Role, User};
use crate::service::AppState;
use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap,
    },
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Expiration time (UTC timestamp)
    pub exp: i64,
    /// Issued at (UTC timestamp)
    pub iat: i64,
}

/// Authenticated caller attached to request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may touch a project
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.user_id == owner_id || self.is_admin()
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Issues and checks session tokens
pub trait TokenVerifier: Send + Sync {
    fn issue(&self, user: &User) -> BridgeResult<String>;

    fn verify(&self, token: &str) -> BridgeResult<Principal>;
}

/// HS256 JWT sessions
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_seconds: i64,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            ttl_seconds: config.token_ttl as i64,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn issue(&self, user: &User) -> BridgeResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            exp: now + self.ttl_seconds,
            iat: now,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| BridgeError::internal(format!("Failed to sign token: {}", e)))
    }

    fn verify(&self, token: &str) -> BridgeResult<Principal> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "Token rejected");
            BridgeError::unauthorized("Invalid or expired token")
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| BridgeError::unauthorized("Invalid token subject"))?;

        Ok(Principal {
            user_id,
            email: data.claims.email,
            role: data.claims.role,
        })
    }
}

pub fn hash_password(password: &str) -> BridgeResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| BridgeError::internal(format!("Password hashing failed: {}", e)))
}

/// Malformed hashes count as a mismatch
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Bearer header first, then the session cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
        .filter(|token| !token.is_empty())
}

/// `Set-Cookie` value carrying a fresh session
pub fn session_cookie(config: &AuthConfig, token: &str) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.cookie_name, token, config.token_ttl
    );
    if config.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session
pub fn clear_session_cookie(config: &AuthConfig) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        config.cookie_name
    )
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> BridgeResult<Principal> {
    let token = extract_token(headers, &state.config.auth.cookie_name)
        .ok_or_else(|| BridgeError::unauthorized("Authentication required"))?;

    let claimed = state.verifier.verify(&token)?;

    // Role is taken from the stored user, not the token.
    let user = state
        .store
        .find_user(claimed.user_id)
        .await?
        .ok_or_else(|| BridgeError::unauthorized("Account no longer exists"))?;

    Ok(Principal::from(&user))
}

/// Reject requests without a valid session and attach the [`Principal`]
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, BridgeError> {
    let principal = authenticate(&state, request.headers()).await?;

    debug!(user_id = %principal.user_id, "User authenticated");
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

/// Like [`require_auth`], but only for admins
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, BridgeError> {
    let principal = authenticate(&state, request.headers()).await?;

    if !principal.is_admin() {
        warn!(user_id = %principal.user_id, "Admin route denied");
        return Err(BridgeError::forbidden("Administrator role required"));
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "x".repeat(40),
            ..AuthConfig::default()
        }
    }

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            email: "dev@example.com".to_string(),
            password_hash: String::new(),
            name: None,
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let verifier = JwtVerifier::new(&config());
        let user = user(Role::Admin);
        let token = verifier.issue(&user).unwrap();

        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal, Principal::from(&user));
        assert!(principal.is_admin());
    }

    #[test]
    fn test_foreign_token_rejected() {
        let token = JwtVerifier::new(&config()).issue(&user(Role::User)).unwrap();
        let other = JwtVerifier::new(&AuthConfig {
            jwt_secret: "y".repeat(40),
            ..AuthConfig::default()
        });

        let err = other.verify(&token).unwrap_err();
        assert!(matches!(err, BridgeError::Unauthorized { .. }));
        assert!(other.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
        assert!(!verify_password("secret1", "garbage"));
    }

    #[test]
    fn test_extract_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, "auth-token"), None);

        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; auth-token=abc.def"));
        assert_eq!(extract_token(&headers, "auth-token").as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(extract_token(&headers, "auth-token").as_deref(), Some("xyz"));
    }

    #[test]
    fn test_cookie_strings() {
        let mut config = config();
        let cookie = session_cookie(&config, "tok");
        assert!(cookie.starts_with("auth-token=tok;"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(!cookie.contains("Secure"));

        config.secure_cookies = true;
        assert!(session_cookie(&config, "tok").ends_with("; Secure"));
        assert!(clear_session_cookie(&config).contains("Max-Age=0"));
    }

    #[test]
    fn test_access_rules() {
        let owner = Uuid::new_v4();
        let user = Principal {
            user_id: owner,
            email: "a@b.c".into(),
            role: Role::User,
        };
        assert!(user.can_access(owner));
        assert!(!user.can_access(Uuid::new_v4()));

        let admin = Principal {
            role: Role::Admin,
            ..user
        };
        assert!(admin.can_access(Uuid::new_v4()));
    }
}
