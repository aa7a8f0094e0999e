// src/post.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authorization::{
    authorize, current_user_id, resolve_project_id, ProjectScope, ANY_MEMBER,
};
use crate::errors::ApiError;

/// A message on a project's wall.
#[derive(Debug, Serialize, Deserialize)]
pub struct Post {
    pub post_id: String,
    pub project_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

/// GET /api/v1/projects/{project_id}/posts
pub async fn list_posts(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let posts = data.mongodb.db.collection::<Post>("posts");
    let mut cursor = posts.find(doc! { "project_id": &project_id }).await?;
    let mut result = Vec::new();
    while let Some(post) = cursor.next().await {
        result.push(post?);
    }
    Ok(HttpResponse::Ok().json(result))
}

/// POST /api/v1/projects/{project_id}/posts
pub async fn create_post(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    if payload.content.trim().is_empty() {
        return Err(ApiError::Validation("Post content must not be empty".to_string()));
    }

    let new_post = Post {
        post_id: Uuid::new_v4().to_string(),
        project_id,
        author_id: current_user,
        content: payload.content.clone(),
        created_at: Utc::now(),
    };
    let posts = data.mongodb.db.collection::<Post>("posts");
    posts.insert_one(&new_post).await?;
    info!("Post created: {}", new_post.post_id);
    Ok(HttpResponse::Created().json(new_post))
}
