use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{generate_jwt, password_digest, Claims};
use crate::config;
use crate::database::manager::DatabaseManager;
use crate::database::models::User;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /auth/login - Verify credentials and issue a Bearer token
pub async fn login(Json(body): Json<LoginRequest>) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1 AND is_active")
        .bind(&body.username)
        .fetch_optional(&pool)
        .await?;

    // Same response for unknown user and wrong password
    let Some(user) = user else {
        return Err(ApiError::unauthorized("Invalid username or password"));
    };
    if user.password_digest != password_digest(&body.password) {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let token = generate_jwt(Claims::new(user.username.clone(), user.id)).map_err(|e| {
        tracing::error!("JWT generation failed: {}", e);
        ApiError::internal_server_error("Could not issue token")
    })?;

    let expires_in = config::config().security.jwt_expiry_hours * 3600;

    Ok(Json(json!({
        "success": true,
        "data": {
            "token": token,
            "token_type": "Bearer",
            "expires_in": expires_in,
            "user": {
                "id": user.id,
                "username": user.username,
            }
        }
    })))
}
