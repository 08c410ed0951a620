//! Database operations for `users`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `users` table. `password_hash` is never serialized.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `admin` or `staff`.
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, role, created_at, last_login_at";

/// Serializes registrations so exactly one account can see an empty table.
const REGISTRATION_LOCK_KEY: i64 = 0x6f6d_6e69_7573_6572;

/// Inserts a user. `email` must already be normalized by the caller.
///
/// The role is decided inside the insert: the first account becomes
/// `admin`, every later one `staff`.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if the email is taken, or
/// [`DbError::Sqlx`] on any other failure.
pub async fn create_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<UserRow, DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(REGISTRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (email, password_hash, first_name, last_name, role) \
         VALUES ($1, $2, $3, $4, \
                 CASE WHEN NOT EXISTS (SELECT 1 FROM users) THEN 'admin' ELSE 'staff' END) \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(email)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| DbError::unique_or(e, format!("email '{email}' is already registered")))?;
    tx.commit().await?;
    Ok(row)
}

/// Looks a user up by (normalized) email.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetches a user by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no such user exists, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_user(pool: &PgPool, id: i64) -> Result<UserRow, DbError> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Stamps `last_login_at = NOW()`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn touch_last_login(pool: &PgPool, id: i64) -> Result<(), DbError> {
    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
