// src/sprint.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::info;
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authorization::{
    authorize, current_user_id, resolve_project_id, ProjectScope, ANY_MEMBER, SPRINT_MANAGERS,
};
use crate::errors::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Sprint {
    pub sprint_id: String,
    pub project_id: String,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSprintRequest {
    pub name: String,
    pub goal: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSprintRequest {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ApiError> {
    if end <= start {
        return Err(ApiError::Validation(
            "Sprint end date must be after its start date".to_string(),
        ));
    }
    Ok(())
}

fn build_update(payload: &UpdateSprintRequest) -> Document {
    let mut set_doc = doc! {};
    if let Some(name) = &payload.name {
        set_doc.insert("name", name);
    }
    if let Some(goal) = &payload.goal {
        set_doc.insert("goal", goal);
    }
    // Dates are stored the way chrono's serde writes them, as RFC 3339 strings.
    if let Some(start) = &payload.start_date {
        set_doc.insert("start_date", start.to_rfc3339());
    }
    if let Some(end) = &payload.end_date {
        set_doc.insert("end_date", end.to_rfc3339());
    }
    set_doc
}

/// POST /api/v1/projects/{project_id}/sprints
pub async fn create_sprint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreateSprintRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, SPRINT_MANAGERS).await?;

    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Sprint name must not be empty".to_string()));
    }
    validate_window(payload.start_date, payload.end_date)?;

    let new_sprint = Sprint {
        sprint_id: Uuid::new_v4().to_string(),
        project_id,
        name: payload.name.clone(),
        goal: payload.goal.clone(),
        start_date: payload.start_date,
        end_date: payload.end_date,
        created_at: Utc::now(),
    };
    let sprints = data.mongodb.db.collection::<Sprint>("sprints");
    sprints.insert_one(&new_sprint).await?;
    info!("Sprint created: {}", new_sprint.sprint_id);
    Ok(HttpResponse::Created().json(new_sprint))
}

/// GET /api/v1/projects/{project_id}/sprints
pub async fn list_sprints(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let sprints = data.mongodb.db.collection::<Sprint>("sprints");
    let mut cursor = sprints.find(doc! { "project_id": &project_id }).await?;
    let mut result = Vec::new();
    while let Some(sprint) = cursor.next().await {
        result.push(sprint?);
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/v1/sprints/{sprint_id}
pub async fn get_sprint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let sprint_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Sprint(&sprint_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let sprints = data.mongodb.db.collection::<Sprint>("sprints");
    let sprint = sprints
        .find_one(doc! { "sprint_id": &sprint_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;
    Ok(HttpResponse::Ok().json(sprint))
}

/// PATCH /api/v1/sprints/{sprint_id}
pub async fn update_sprint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateSprintRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let sprint_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Sprint(&sprint_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, SPRINT_MANAGERS).await?;

    let sprints = data.mongodb.db.collection::<Sprint>("sprints");
    let existing = sprints
        .find_one(doc! { "sprint_id": &sprint_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;

    // The window stays consistent even when only one bound changes.
    let start = payload.start_date.unwrap_or(existing.start_date);
    let end = payload.end_date.unwrap_or(existing.end_date);
    validate_window(start, end)?;

    let set_doc = build_update(&payload);
    if set_doc.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    sprints
        .update_one(doc! { "sprint_id": &sprint_id }, doc! { "$set": set_doc })
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Sprint updated" })))
}

/// DELETE /api/v1/sprints/{sprint_id}
/// Stories assigned to the sprint fall back to the backlog.
pub async fn delete_sprint(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let sprint_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Sprint(&sprint_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, SPRINT_MANAGERS).await?;

    let stories = data.mongodb.db.collection::<Document>("user_stories");
    stories
        .update_many(
            doc! { "sprint_id": &sprint_id, "status": { "$ne": "done" } },
            doc! { "$set": { "sprint_id": null, "status": "backlog" } },
        )
        .await?;

    let sprints = data.mongodb.db.collection::<Sprint>("sprints");
    let result = sprints.delete_one(doc! { "sprint_id": &sprint_id }).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("Sprint not found".to_string()));
    }
    info!("Sprint deleted: {}", sprint_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Sprint deleted" })))
}
