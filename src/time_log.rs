// src/time_log.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{NaiveDate, Utc};
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

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeLogEntry {
    pub entry_id: String,
    pub task_id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub hours: f64,
    pub description: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTimeLogRequest {
    pub date: NaiveDate,
    pub hours: f64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTimeLogRequest {
    pub date: Option<NaiveDate>,
    pub hours: Option<f64>,
    pub description: Option<String>,
}

fn validate_hours(hours: f64) -> Result<(), ApiError> {
    if !(hours > 0.0 && hours <= 24.0) {
        return Err(ApiError::Validation(
            "Logged hours must be between 0 and 24".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/v1/tasks/{task_id}/timelogs
pub async fn create_entry(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreateTimeLogRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let task_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Task(&task_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    validate_hours(payload.hours)?;

    let new_entry = TimeLogEntry {
        entry_id: Uuid::new_v4().to_string(),
        task_id,
        user_id: current_user,
        date: payload.date,
        hours: payload.hours,
        description: payload.description.clone(),
        created_at: Utc::now(),
    };
    let entries = data.mongodb.db.collection::<TimeLogEntry>("time_log_entries");
    entries.insert_one(&new_entry).await?;
    info!("Time log entry created: {}", new_entry.entry_id);
    Ok(HttpResponse::Created().json(new_entry))
}

/// GET /api/v1/tasks/{task_id}/timelogs
pub async fn list_entries(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let task_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Task(&task_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let entries = data.mongodb.db.collection::<TimeLogEntry>("time_log_entries");
    let mut cursor = entries.find(doc! { "task_id": &task_id }).await?;
    let mut result = Vec::new();
    while let Some(entry) = cursor.next().await {
        result.push(entry?);
    }
    Ok(HttpResponse::Ok().json(result))
}

/// Users touch only their own entries; system admins are exempt.
async fn load_owned_entry(
    data: &AppState,
    entry_id: &str,
    current_user: &str,
) -> Result<TimeLogEntry, ApiError> {
    let entries = data.mongodb.db.collection::<TimeLogEntry>("time_log_entries");
    let entry = entries
        .find_one(doc! { "entry_id": entry_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("Time log entry not found".to_string()))?;

    if entry.user_id != current_user {
        let users = data.mongodb.db.collection::<mongodb::bson::Document>("users");
        let user = users
            .find_one(doc! { "user_id": current_user })
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
        if !user.get_bool("is_system_admin").unwrap_or(false) {
            return Err(ApiError::Forbidden(
                "Cannot modify another user's time log entry".to_string(),
            ));
        }
    }
    Ok(entry)
}

/// PATCH /api/v1/timelogs/{entry_id}
pub async fn update_entry(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTimeLogRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let entry_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::TimeLogEntry(&entry_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;
    load_owned_entry(&data, &entry_id, &current_user).await?;

    let mut set_doc = doc! {};
    if let Some(date) = &payload.date {
        set_doc.insert("date", date.to_string());
    }
    if let Some(hours) = payload.hours {
        validate_hours(hours)?;
        set_doc.insert("hours", hours);
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description);
    }
    if set_doc.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    let entries = data.mongodb.db.collection::<TimeLogEntry>("time_log_entries");
    entries
        .update_one(doc! { "entry_id": &entry_id }, doc! { "$set": set_doc })
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Time log updated" })))
}

/// DELETE /api/v1/timelogs/{entry_id}
pub async fn delete_entry(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let entry_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::TimeLogEntry(&entry_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;
    load_owned_entry(&data, &entry_id, &current_user).await?;

    let entries = data.mongodb.db.collection::<TimeLogEntry>("time_log_entries");
    let result = entries.delete_one(doc! { "entry_id": &entry_id }).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("Time log entry not found".to_string()));
    }
    info!("Time log entry deleted: {}", entry_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Time log deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hours_must_be_positive_and_sane() {
        assert!(validate_hours(0.5).is_ok());
        assert!(validate_hours(8.0).is_ok());
        assert!(validate_hours(24.0).is_ok());
        assert!(validate_hours(0.0).is_err());
        assert!(validate_hours(-1.0).is_err());
        assert!(validate_hours(25.0).is_err());
    }
}
