// src/user.rs

use actix_web::{web, HttpRequest, HttpResponse};
use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use futures_util::StreamExt;
use log::error;
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::authorization::current_user_id;
use crate::errors::ApiError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    /// Bcrypt hash. Persisted with the document; never leaves the API —
    /// responses go through [`UserProfile`] instead.
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub is_system_admin: bool,
    pub created_at: chrono::DateTime<Utc>,
}

/// What the API returns for a user: everything except the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_system_admin: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_system_admin: user.is_system_admin,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub search: Option<String>,
}

async fn is_system_admin(data: &AppState, user_id: &str) -> Result<bool, ApiError> {
    let users = data.mongodb.db.collection::<Document>("users");
    let user = users
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    Ok(user.get_bool("is_system_admin").unwrap_or(false))
}

/// GET /api/v1/users?search=<fragment>
/// Any authenticated user may list/search users (for member pickers).
pub async fn list_users(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<UserQuery>,
) -> Result<HttpResponse, ApiError> {
    current_user_id(&req)?;

    let filter = match &query.search {
        Some(fragment) if !fragment.is_empty() => doc! {
            "$or": [
                { "username": { "$regex": fragment, "$options": "i" } },
                { "email": { "$regex": fragment, "$options": "i" } },
            ]
        },
        _ => doc! {},
    };

    let users_coll = data.mongodb.db.collection::<User>("users");
    let mut cursor = users_coll.find(filter).await?;
    let mut users: Vec<UserProfile> = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(user) => users.push(user.into()),
            Err(e) => {
                error!("Error iterating users: {}", e);
                return Err(e.into());
            }
        }
    }
    Ok(HttpResponse::Ok().json(users))
}

/// GET /api/v1/users/{user_id}
pub async fn get_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    current_user_id(&req)?;
    let user_id = path.into_inner();

    let users_coll = data.mongodb.db.collection::<User>("users");
    let user = users_coll
        .find_one(doc! { "user_id": &user_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

/// PATCH /api/v1/users/{user_id}
/// A user may update their own profile; system admins may update anyone's.
pub async fn update_user(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let user_id = path.into_inner();

    if let Some(email) = &payload.email {
        if !crate::auth::valid_email(email) {
            return Err(ApiError::Validation("Invalid email address".to_string()));
        }
    }

    if current_user != user_id && !is_system_admin(&data, &current_user).await? {
        return Err(ApiError::Forbidden(
            "Cannot update another user's profile".to_string(),
        ));
    }

    let users_coll = data.mongodb.db.collection::<User>("users");

    if let Some(email) = &payload.email {
        // New email must not belong to someone else.
        if users_coll
            .find_one(doc! { "email": email, "user_id": { "$ne": &user_id } })
            .await?
            .is_some()
        {
            return Err(ApiError::Validation("Email already registered".to_string()));
        }
    }

    let mut set_doc = doc! {};
    if let Some(email) = &payload.email {
        set_doc.insert("email", email);
    }
    if let Some(password) = &payload.password {
        if password.len() < 8 {
            return Err(ApiError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        let hashed = hash(password, DEFAULT_COST)
            .map_err(|e| ApiError::Internal(format!("Error hashing password: {}", e)))?;
        set_doc.insert("password", hashed);
    }
    if let Some(first_name) = &payload.first_name {
        set_doc.insert("first_name", first_name);
    }
    if let Some(last_name) = &payload.last_name {
        set_doc.insert("last_name", last_name);
    }
    if set_doc.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    let result = users_coll
        .update_one(doc! { "user_id": &user_id }, doc! { "$set": set_doc })
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "User updated" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, web, HttpMessage};
    use mongodb::bson;
    use std::sync::Arc;

    fn sample_user() -> User {
        User {
            user_id: "user-1".to_string(),
            username: "sam".to_string(),
            email: "sam@example.com".to_string(),
            password: "$2b$12$abcdefghijklmnopqrstuv".to_string(),
            first_name: "Sam".to_string(),
            last_name: "Lee".to_string(),
            is_system_admin: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn password_hash_survives_the_persist_round_trip() {
        let user = sample_user();
        let document = bson::to_document(&user).unwrap();
        assert_eq!(
            document.get_str("password").unwrap(),
            "$2b$12$abcdefghijklmnopqrstuv"
        );
        // The exact read login performs.
        let back: User = bson::from_document(document).unwrap();
        assert_eq!(back.password, user.password);
    }

    #[test]
    fn profile_responses_carry_no_password() {
        let profile = UserProfile::from(sample_user());
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json.get("username").unwrap(), "sam");
    }

    // The client never connects, so this runs without a server: the handler
    // must reject the address before it reaches the database.
    #[tokio::test]
    async fn malformed_email_update_is_rejected() {
        let mongodb = Arc::new(
            crate::db::MongoDB::init("mongodb://localhost:27017", "scrumline_unused").await,
        );
        let data = web::Data::new(AppState {
            mongodb,
            config: crate::config::Config {
                mongo_uri: "mongodb://localhost:27017".to_string(),
                database_name: "scrumline_unused".to_string(),
                jwt_secret: "test-secret".to_string(),
                bind_addr: "127.0.0.1:0".to_string(),
                frontend_origin: "http://localhost:3000".to_string(),
            },
        });

        let req = actix_test::TestRequest::default().to_http_request();
        req.extensions_mut().insert("user-1".to_string());
        let payload = UpdateUserRequest {
            email: Some("not-an-email".to_string()),
            password: None,
            first_name: None,
            last_name: None,
        };
        let err = update_user(
            req,
            data,
            web::Path::from("user-1".to_string()),
            web::Json(payload),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
