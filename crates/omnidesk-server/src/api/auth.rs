//! Account registration, login, and the current-user lookup.

use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};

use omnidesk_db::UserRow;

use crate::auth::{hash_password, verify_password};
use crate::middleware::{CurrentUser, RequestId};

use super::{map_db_error, ApiError, ApiResponse, AppState};

const MIN_PASSWORD_CHARS: usize = 8;
const BAD_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default, alias = "first_name")]
    pub first_name: Option<String>,
    #[serde(default, alias = "last_name")]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Auth responses carry the token at the top level next to `success`.
#[derive(Debug, Serialize)]
pub(super) struct AuthResponse {
    success: bool,
    token: String,
    user: UserRow,
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn validate_credentials(req_id: &str, email: &str, password: &str) -> Result<(), ApiError> {
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            "a valid email address is required",
        ));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            format!("password must be at least {MIN_PASSWORD_CHARS} characters"),
        ));
    }
    Ok(())
}

fn issue(state: &AppState, req_id: &str, user: &UserRow) -> Result<String, ApiError> {
    state
        .auth
        .issue_token(user.id, &user.email, &user.role)
        .map_err(|e| {
            tracing::error!(error = %e, user_id = user.id, "token signing failed");
            ApiError::new(req_id, "internal_error", "could not issue token")
        })
}

/// POST /api/auth/register: the first account becomes `admin`.
pub(super) async fn register(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let rid = &req_id.0;
    let email = normalize_email(&body.email);
    validate_credentials(rid, &email, &body.password)?;

    let password = body.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "password hashing task failed");
            ApiError::new(rid, "internal_error", "could not hash password")
        })?
        .map_err(|e| {
            tracing::error!(error = %e, "password hashing failed");
            ApiError::new(rid, "internal_error", "could not hash password")
        })?;

    let trimmed = |value: Option<String>| {
        value
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    let user = omnidesk_db::create_user(
        &state.pool,
        &email,
        &password_hash,
        trimmed(body.first_name).as_deref(),
        trimmed(body.last_name).as_deref(),
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    let token = issue(&state, rid, &user)?;
    tracing::info!(user_id = user.id, role = %user.role, "auth: user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            token,
            user,
        }),
    ))
}

/// POST /api/auth/login: unknown email and wrong password answer alike.
pub(super) async fn login(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let rid = &req_id.0;
    let email = normalize_email(&body.email);

    let user = omnidesk_db::get_user_by_email(&state.pool, &email)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::new(rid, "unauthorized", BAD_CREDENTIALS))?;

    let stored = user.password_hash.clone();
    let password = body.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .unwrap_or(false);
    if !valid {
        tracing::debug!(user_id = user.id, "auth: rejected login");
        return Err(ApiError::new(rid, "unauthorized", BAD_CREDENTIALS));
    }

    omnidesk_db::touch_last_login(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let token = issue(&state, rid, &user)?;

    Ok(Json(AuthResponse {
        success: true,
        token,
        user,
    }))
}

/// GET /api/auth/me
pub(super) async fn me(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<UserRow>>, ApiError> {
    let user = omnidesk_db::get_user(&state.pool, claims.sub)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(user, req_id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn credentials_need_an_address_and_eight_chars() {
        assert!(validate_credentials("r", "ada@example.com", "longenough").is_ok());
        assert!(validate_credentials("r", "ada.example.com", "longenough").is_err());
        assert!(validate_credentials("r", "ada@example.com", "short").is_err());
    }
}
