use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Request body for obtaining a token pair.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct TokenRequest {
    #[schema(example = "dispatcher")]
    pub username: String,
    #[schema(example = "s3cure_P@ss!")]
    pub password: String,
}

pub fn validate_token_request(payload: &TokenRequest) -> Result<(), AppError> {
    if payload.username.trim().is_empty() {
        return Err(AppError::Validation("Username must not be empty".into()));
    }
    if payload.password.is_empty() {
        return Err(AppError::Validation("Password must not be empty".into()));
    }
    Ok(())
}

/// Access and refresh tokens for a freshly authenticated user.
#[derive(Serialize, utoipa::ToSchema)]
pub struct TokenResponse {
    /// Short-lived bearer token for API calls.
    #[schema(example = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...")]
    pub access: String,
    /// Long-lived token accepted only by the refresh endpoint.
    #[schema(example = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...")]
    pub refresh: String,
    #[schema(example = "dispatcher")]
    pub username: String,
    #[schema(example = "operator")]
    pub role: String,
    #[schema(example = json!([]))]
    pub permissions: Vec<String>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct RefreshResponse {
    pub access: String,
}

/// Current authenticated user's profile.
#[derive(Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    #[schema(example = 7)]
    pub id: i32,
    #[schema(example = "dispatcher")]
    pub username: String,
    #[schema(example = "admin")]
    pub role: String,
    #[schema(example = json!(["reference:manage"]))]
    pub permissions: Vec<String>,
}
