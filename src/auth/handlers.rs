use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        claims::TokenKind,
        dto::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            MessageResponse, PublicUser, RefreshRequest, RegisterRequest, ResetPasswordRequest,
        },
        jwt::AuthUser,
        validation,
    },
    error::AuthResult,
    extract::JsonBody,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/change-password", post(change_password))
        .route("/auth/profile", get(profile))
        .route("/auth/verify-token", get(verify_token))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<AuthResponse>)> {
    validation::validate_register(&payload)?;
    let res = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AuthResult<Json<AuthResponse>> {
    validation::validate_login(&payload)?;
    let res = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(res))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> AuthResult<Json<AuthResponse>> {
    let claims = match state.auth.keys().verify(&payload.refresh_token, TokenKind::Refresh) {
        Ok(c) => c,
        Err(e) => {
            warn!("refresh with an invalid token");
            return Err(e);
        }
    };
    let res = state.auth.refresh(claims.sub, &payload.refresh_token).await?;
    Ok(Json(res))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AuthResult<Json<MessageResponse>> {
    state.auth.logout(claims.sub).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    validation::validate_forgot_password(&payload)?;
    state.auth.forgot_password(&payload.email).await?;
    Ok(Json(MessageResponse::new(
        "If account exists, password reset email has been sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    validation::validate_reset_password(&payload)?;
    state
        .auth
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}

#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    validation::validate_change_password(&payload)?;
    state
        .auth
        .change_password(claims.sub, &payload.old_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password changed successfully")))
}

#[instrument(skip_all)]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AuthResult<Json<PublicUser>> {
    let user = state.auth.profile(claims.sub).await?;
    Ok(Json(user))
}

/// Succeeds for any live access token; no store lookup.
pub async fn verify_token(AuthUser(claims): AuthUser) -> Json<MessageResponse> {
    info!(user_id = %claims.sub, "token verified");
    Json(MessageResponse::new("Token is valid"))
}
