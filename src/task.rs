// src/task.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authorization::{
    authorize, current_user_id, resolve_project_id, ProjectScope, ANY_MEMBER,
};
use crate::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Unassigned,
    Assigned,
    InProgress,
    Done,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub story_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub estimated_hours: Option<f64>,
    pub created_by: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub description: String,
    pub estimated_hours: Option<f64>,
    pub assignee: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    /// Some("") drops the assignee and returns the task to `unassigned`.
    pub assignee: Option<String>,
    pub estimated_hours: Option<f64>,
}

fn build_update(payload: &UpdateTaskRequest) -> Result<Document, ApiError> {
    let mut set_doc = doc! {};
    if let Some(description) = &payload.description {
        if description.trim().is_empty() {
            return Err(ApiError::Validation(
                "Task description must not be empty".to_string(),
            ));
        }
        set_doc.insert("description", description);
    }
    if let Some(status) = &payload.status {
        set_doc.insert("status", to_bson(status)?);
    }
    if let Some(hours) = payload.estimated_hours {
        if hours <= 0.0 {
            return Err(ApiError::Validation(
                "Estimated hours must be positive".to_string(),
            ));
        }
        set_doc.insert("estimated_hours", hours);
    }
    match &payload.assignee {
        Some(assignee) if assignee.is_empty() => {
            set_doc.insert("assignee", mongodb::bson::Bson::Null);
            if payload.status.is_none() {
                set_doc.insert("status", to_bson(&TaskStatus::Unassigned)?);
            }
        }
        Some(assignee) => {
            set_doc.insert("assignee", assignee);
            if payload.status.is_none() {
                set_doc.insert("status", to_bson(&TaskStatus::Assigned)?);
            }
        }
        None => {}
    }
    Ok(set_doc)
}

/// POST /api/v1/stories/{story_id}/tasks
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let story_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Story(&story_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    if payload.description.trim().is_empty() {
        return Err(ApiError::Validation(
            "Task description must not be empty".to_string(),
        ));
    }
    if payload.estimated_hours.is_some_and(|h| h <= 0.0) {
        return Err(ApiError::Validation(
            "Estimated hours must be positive".to_string(),
        ));
    }

    // An assignee named at creation must be a member of the same project.
    if let Some(assignee) = &payload.assignee {
        let roles = data.mongodb.db.collection::<Document>("project_user_roles");
        if roles
            .find_one(doc! { "project_id": &project_id, "user_id": assignee })
            .await?
            .is_none()
        {
            return Err(ApiError::Validation(
                "Assignee is not a member of this project".to_string(),
            ));
        }
    }

    let new_task = Task {
        task_id: Uuid::new_v4().to_string(),
        story_id,
        description: payload.description.clone(),
        status: if payload.assignee.is_some() {
            TaskStatus::Assigned
        } else {
            TaskStatus::Unassigned
        },
        assignee: payload.assignee.clone(),
        estimated_hours: payload.estimated_hours,
        created_by: current_user,
        created_at: Utc::now(),
    };
    let tasks = data.mongodb.db.collection::<Task>("tasks");
    tasks.insert_one(&new_task).await?;
    info!("Task created: {}", new_task.task_id);
    Ok(HttpResponse::Created().json(new_task))
}

/// GET /api/v1/stories/{story_id}/tasks
pub async fn list_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let story_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Story(&story_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let mut cursor = tasks.find(doc! { "story_id": &story_id }).await?;
    let mut result = Vec::new();
    while let Some(task) = cursor.next().await {
        result.push(task?);
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/v1/tasks/{task_id}
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let task_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Task(&task_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let task = tasks
        .find_one(doc! { "task_id": &task_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
    Ok(HttpResponse::Ok().json(task))
}

/// POST /api/v1/tasks/{task_id}/claim
/// The caller takes the task for themselves.
pub async fn claim_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let task_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Task(&task_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    // One conditional update, so two concurrent claimers cannot both win.
    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let result = tasks
        .update_one(
            doc! { "task_id": &task_id, "assignee": mongodb::bson::Bson::Null },
            doc! { "$set": {
                "assignee": &current_user,
                "status": to_bson(&TaskStatus::Assigned)?,
            } },
        )
        .await?;
    if result.matched_count == 0 {
        if tasks.find_one(doc! { "task_id": &task_id }).await?.is_some() {
            return Err(ApiError::Validation("Task is already assigned".to_string()));
        }
        return Err(ApiError::NotFound("Task not found".to_string()));
    }
    info!("Task {} claimed by {}", task_id, current_user);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Task claimed" })))
}

/// PATCH /api/v1/tasks/{task_id}
pub async fn update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let task_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Task(&task_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    if let Some(assignee) = &payload.assignee {
        if !assignee.is_empty() {
            let roles = data.mongodb.db.collection::<Document>("project_user_roles");
            if roles
                .find_one(doc! { "project_id": &project_id, "user_id": assignee })
                .await?
                .is_none()
            {
                return Err(ApiError::Validation(
                    "Assignee is not a member of this project".to_string(),
                ));
            }
        }
    }

    let set_doc = build_update(&payload)?;
    if set_doc.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let result = tasks
        .update_one(doc! { "task_id": &task_id }, doc! { "$set": set_doc })
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Task updated" })))
}

/// DELETE /api/v1/tasks/{task_id}
pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let task_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Task(&task_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    data.mongodb
        .db
        .collection::<Document>("time_log_entries")
        .delete_many(doc! { "task_id": &task_id })
        .await?;

    let tasks = data.mongodb.db.collection::<Task>("tasks");
    let result = tasks.delete_one(doc! { "task_id": &task_id }).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }
    info!("Task deleted: {}", task_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Task deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_snake_case() {
        let s: TaskStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(s, TaskStatus::InProgress);
        assert!(serde_json::from_str::<TaskStatus>("\"blocked\"").is_err());
    }

    #[test]
    fn assigning_flips_status_to_assigned() {
        let payload = UpdateTaskRequest {
            description: None,
            status: None,
            assignee: Some("user-7".to_string()),
            estimated_hours: None,
        };
        let set_doc = build_update(&payload).unwrap();
        assert_eq!(set_doc.get_str("assignee").unwrap(), "user-7");
        assert_eq!(set_doc.get_str("status").unwrap(), "assigned");
    }

    #[test]
    fn clearing_assignee_returns_task_to_unassigned() {
        let payload = UpdateTaskRequest {
            description: None,
            status: None,
            assignee: Some(String::new()),
            estimated_hours: None,
        };
        let set_doc = build_update(&payload).unwrap();
        assert!(matches!(set_doc.get("assignee"), Some(mongodb::bson::Bson::Null)));
        assert_eq!(set_doc.get_str("status").unwrap(), "unassigned");
    }

    #[test]
    fn explicit_status_wins_over_assignment_default() {
        let payload = UpdateTaskRequest {
            description: None,
            status: Some(TaskStatus::InProgress),
            assignee: Some("user-7".to_string()),
            estimated_hours: None,
        };
        let set_doc = build_update(&payload).unwrap();
        assert_eq!(set_doc.get_str("status").unwrap(), "in_progress");
    }

    #[test]
    fn nonpositive_estimate_rejected() {
        let payload = UpdateTaskRequest {
            description: None,
            status: None,
            assignee: None,
            estimated_hours: Some(-2.0),
        };
        assert!(build_update(&payload).is_err());
    }

    // Runs only when MONGO_URI points at a reachable server.
    #[tokio::test]
    async fn second_claim_on_the_same_task_loses() {
        use actix_web::{test, HttpMessage};
        use crate::authorization::{ProjectRole, ProjectUserRole};
        use std::sync::Arc;

        let Ok(uri) = std::env::var("MONGO_URI") else {
            eprintln!("MONGO_URI not set, skipping claim test");
            return;
        };
        let db_name = format!("scrumline_test_{}", Uuid::new_v4().simple());
        let mongodb = Arc::new(crate::db::MongoDB::init(&uri, &db_name).await);
        let data = web::Data::new(crate::app_state::AppState {
            mongodb: mongodb.clone(),
            config: crate::config::Config {
                mongo_uri: uri,
                database_name: db_name,
                jwt_secret: "test-secret".to_string(),
                bind_addr: "127.0.0.1:0".to_string(),
                frontend_origin: "http://localhost:3000".to_string(),
            },
        });

        let db = &mongodb.db;
        db.collection::<Document>("users")
            .insert_many(vec![
                doc! { "user_id": "u1", "username": "ana", "email": "ana@example.com", "is_system_admin": false },
                doc! { "user_id": "u2", "username": "ben", "email": "ben@example.com", "is_system_admin": false },
            ])
            .await
            .unwrap();
        db.collection::<Document>("projects")
            .insert_one(doc! { "project_id": "p1", "name": "Apollo" })
            .await
            .unwrap();
        db.collection::<Document>("user_stories")
            .insert_one(doc! { "story_id": "st1", "project_id": "p1" })
            .await
            .unwrap();
        for user_id in ["u1", "u2"] {
            db.collection::<ProjectUserRole>("project_user_roles")
                .insert_one(&ProjectUserRole {
                    project_id: "p1".to_string(),
                    user_id: user_id.to_string(),
                    role: ProjectRole::Developer,
                    granted_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        db.collection::<Task>("tasks")
            .insert_one(&Task {
                task_id: "t1".to_string(),
                story_id: "st1".to_string(),
                description: "wire up login".to_string(),
                status: TaskStatus::Unassigned,
                assignee: None,
                estimated_hours: None,
                created_by: "u1".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let as_user = |user_id: &str| {
            let req = test::TestRequest::default().to_http_request();
            req.extensions_mut().insert(user_id.to_string());
            req
        };

        claim_task(as_user("u1"), data.clone(), web::Path::from("t1".to_string()))
            .await
            .unwrap();

        let err = claim_task(as_user("u2"), data.clone(), web::Path::from("t1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::ApiError::Validation(_)));

        let task = db
            .collection::<Task>("tasks")
            .find_one(doc! { "task_id": "t1" })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.assignee.as_deref(), Some("u1"));
        assert_eq!(task.status, TaskStatus::Assigned);

        db.drop().await.unwrap();
    }
}
