use axum::{Json, extract::State};
use sea_orm::*;
use tracing::instrument;

use crate::entity::{role_permission, user};
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::models::auth::{
    MeResponse, RefreshRequest, RefreshResponse, TokenRequest, TokenResponse,
    validate_token_request,
};
use crate::state::AppState;
use crate::utils::hash;
use crate::utils::jwt::{self, Subject, TokenType};

async fn permissions_of<C: ConnectionTrait>(db: &C, role: &str) -> Result<Vec<String>, DbErr> {
    let rows = role_permission::Entity::find()
        .filter(role_permission::Column::Role.eq(role))
        .order_by_asc(role_permission::Column::Permission)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|rp| rp.permission).collect())
}

fn sign(
    state: &AppState,
    user: &user::Model,
    permissions: &[String],
    token_type: TokenType,
) -> Result<String, AppError> {
    let subject = Subject {
        user_id: user.id,
        username: &user.username,
        role: &user.role,
        permissions,
    };
    jwt::sign(&subject, token_type, &state.config.auth)
        .map_err(|e| AppError::Internal(format!("JWT sign error: {}", e)))
}

#[utoipa::path(
    post,
    path = "/token",
    tag = "Auth",
    operation_id = "obtainToken",
    summary = "Obtain an access and refresh token",
    description = "Authenticates with username and password and returns a short-lived access token plus a refresh token.",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Wrong credentials (INVALID_CREDENTIALS)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn obtain_token(
    State(state): State<AppState>,
    AppJson(payload): AppJson<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    validate_token_request(&payload)?;

    let user = user::Entity::find()
        .filter(user::Column::Username.eq(payload.username.trim()))
        .one(&state.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let is_valid = hash::verify_password(&payload.password, &user.password)
        .map_err(|e| AppError::Internal(format!("Password verify error: {}", e)))?;
    if !is_valid {
        return Err(AppError::InvalidCredentials);
    }

    let permissions = permissions_of(&state.db, &user.role).await?;
    let access = sign(&state, &user, &permissions, TokenType::Access)?;
    let refresh = sign(&state, &user, &permissions, TokenType::Refresh)?;

    Ok(Json(TokenResponse {
        access,
        refresh,
        username: user.username,
        role: user.role,
        permissions,
    }))
}

#[utoipa::path(
    post,
    path = "/token/refresh",
    tag = "Auth",
    operation_id = "refreshToken",
    summary = "Exchange a refresh token for a new access token",
    description = "Role and permissions are re-read, so changes apply from the next refresh.",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Invalid or expired refresh token (TOKEN_INVALID)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let claims = jwt::verify(&payload.refresh, TokenType::Refresh, &state.config.auth.jwt_secret)
        .map_err(|_| AppError::TokenInvalid)?;

    let user = user::Entity::find_by_id(claims.uid)
        .one(&state.db)
        .await?
        .ok_or(AppError::TokenInvalid)?;

    let permissions = permissions_of(&state.db, &user.role).await?;
    let access = sign(&state, &user, &permissions, TokenType::Access)?;

    Ok(Json(RefreshResponse { access }))
}

#[utoipa::path(
    get,
    path = "/me",
    tag = "Auth",
    operation_id = "getCurrentUser",
    summary = "Get the authenticated user",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(auth_user), fields(user_id = auth_user.user_id))]
pub async fn me(auth_user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        id: auth_user.user_id,
        username: auth_user.username,
        role: auth_user.role,
        permissions: auth_user.permissions,
    })
}
