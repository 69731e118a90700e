// auth.rs - bearer-token boundary: register, login, claims extraction

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::{LoginRequest, LoginResponse, RegisterRequest, UserInfo};
use crate::store;

// ============================================================================
// CLAIMS & CONFIG
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User ID
    pub email: String,
    pub exp: i64, // Expiration timestamp
    pub iat: i64, // Issued at timestamp
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    pub secret_key: String,
    pub token_expiration_hours: i64,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            secret_key: std::env::var("SECRET_KEY")
                .unwrap_or_else(|_| "dev-secret-change-in-production".to_string()),
            token_expiration_hours: 24,
        }
    }

    pub fn new(secret_key: String) -> Self {
        Self {
            secret_key,
            token_expiration_hours: 24,
        }
    }

    /// Generate an HS256 access token for a user.
    pub fn generate_token(&self, user_id: i64, email: &str) -> Result<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(Duration::hours(self.token_expiration_hours))
            .ok_or_else(|| AppError::InternalError("Token expiry overflow".to_string()))?
            .timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: expiration,
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret_key.as_ref()),
        )
        .map_err(|e| AppError::InternalError(format!("Failed to generate token: {}", e)))
    }

    /// Validate and decode a token.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret_key.as_ref()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Validates `Authorization: Bearer …` and yields the caller's claims.
#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized("Invalid authorization header format".to_string())
        })?;

        AuthConfig::from_env().validate_token(token)
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub pool: Arc<DbPool>,
    pub config: Arc<AuthConfig>,
}

/// Register with email/password; responds logged-in.
async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    payload
        .validate()
        .map_err(|e| AppError::validation_error(e.to_string()))?;

    let password_hash = hash_password(&payload.password)?;
    let user = store::create_user(&state.pool, &payload.email, &password_hash).await?;

    tracing::info!("User registered: {}", user.user_id);

    let access_token = state.config.generate_token(user.user_id, &user.email)?;
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: state.config.token_expiration_hours * 3600,
            user: UserInfo {
                id: user.user_id,
                email: user.email,
            },
        }),
    ))
}

/// Login with email/password.
async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let user = store::user_by_email(&state.pool, &payload.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let access_token = state.config.generate_token(user.user_id, &user.email)?;
    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: state.config.token_expiration_hours * 3600,
        user: UserInfo {
            id: user.user_id,
            email: user.email,
        },
    }))
}

// ============================================================================
// HELPERS
// ============================================================================

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash)
        .map_err(|e| AppError::InternalError(format!("Password verification failed: {}", e)))
}

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::InternalError(format!("Password hashing failed: {}", e)))
}

// ============================================================================
// ROUTES
// ============================================================================

pub fn auth_routes(pool: DbPool, config: Arc<AuthConfig>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .with_state(AuthState {
            pool: Arc::new(pool),
            config,
        })
}
