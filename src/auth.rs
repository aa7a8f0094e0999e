// src/auth.rs

use actix_web::{web, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::info;
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub fn create_jwt(user_id: &str, secret: &str) -> Result<String, ApiError> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| ApiError::Internal(format!("Token encode error: {}", e)))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub(crate) fn valid_email(email: &str) -> bool {
    // Shape check only; deliverability is the mail server's problem.
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

/// POST /api/v1/auth/signup
pub async fn signup(
    data: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    if payload.username.trim().is_empty() {
        return Err(ApiError::Validation("Username must not be empty".to_string()));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    if !valid_email(&payload.email) {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    let users = data.mongodb.db.collection::<User>("users");

    // Username and email are unique across the system.
    if users
        .find_one(doc! { "username": &payload.username })
        .await?
        .is_some()
    {
        return Err(ApiError::Validation("Username already taken".to_string()));
    }
    if users
        .find_one(doc! { "email": &payload.email })
        .await?
        .is_some()
    {
        return Err(ApiError::Validation("Email already registered".to_string()));
    }

    let hashed_password = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("Error hashing password: {}", e)))?;

    let new_user = User {
        user_id: Uuid::new_v4().to_string(),
        username: payload.username.clone(),
        email: payload.email.clone(),
        password: hashed_password,
        first_name: payload.first_name.clone(),
        last_name: payload.last_name.clone(),
        is_system_admin: false,
        created_at: Utc::now(),
    };
    users.insert_one(&new_user).await?;
    info!("User created: {}", new_user.user_id);

    Ok(HttpResponse::Created().json(serde_json::json!({
        "user_id": new_user.user_id,
        "username": new_user.username,
    })))
}

/// POST /api/v1/auth/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let users = data.mongodb.db.collection::<User>("users");
    let user = users
        .find_one(doc! { "username": &payload.username })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify(&payload.password, &user.password).unwrap_or(false) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = create_jwt(&user.user_id, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user_id": user.user_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip() {
        let token = create_jwt("user-42", "test-secret").unwrap();
        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = create_jwt("user-42", "test-secret").unwrap();
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn email_shape_check() {
        assert!(valid_email("dev@example.com"));
        assert!(valid_email("a.b+c@sub.domain.org"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing@tld"));
        assert!(!valid_email("two@@example.com"));
        assert!(!valid_email("spaces in@example.com"));
    }

    fn test_state(uri: String, db_name: String, mongodb: std::sync::Arc<crate::db::MongoDB>) -> web::Data<AppState> {
        web::Data::new(AppState {
            mongodb,
            config: crate::config::Config {
                mongo_uri: uri,
                database_name: db_name,
                jwt_secret: "test-secret".to_string(),
                bind_addr: "127.0.0.1:0".to_string(),
                frontend_origin: "http://localhost:3000".to_string(),
            },
        })
    }

    // Runs only when MONGO_URI points at a reachable server.
    #[tokio::test]
    async fn duplicate_signup_is_rejected() {
        let Ok(uri) = std::env::var("MONGO_URI") else {
            eprintln!("MONGO_URI not set, skipping duplicate signup test");
            return;
        };
        let db_name = format!("scrumline_test_{}", Uuid::new_v4().simple());
        let mongodb =
            std::sync::Arc::new(crate::db::MongoDB::init(&uri, &db_name).await);
        let data = test_state(uri, db_name, mongodb.clone());

        let request = || SignupRequest {
            username: "sam".to_string(),
            password: "longenough".to_string(),
            email: "sam@example.com".to_string(),
            first_name: "Sam".to_string(),
            last_name: "Lee".to_string(),
        };
        signup(data.clone(), web::Json(request())).await.unwrap();

        // Same username again.
        let err = signup(data.clone(), web::Json(request())).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // Fresh username, same email.
        let err = signup(
            data.clone(),
            web::Json(SignupRequest {
                username: "sam2".to_string(),
                ..request()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        mongodb.db.drop().await.unwrap();
    }
}
