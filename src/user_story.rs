// src/user_story.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authorization::{
    authorize, current_user_id, resolve_project_id, ProjectScope, ANY_MEMBER, SPRINT_MANAGERS,
};
use crate::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Backlog,
    InSprint,
    Done,
}

/// MoSCoW priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryPriority {
    MustHave,
    ShouldHave,
    CouldHave,
    WontHave,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserStory {
    pub story_id: String,
    pub project_id: String,
    /// Absent while the story sits in the backlog.
    pub sprint_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: StoryPriority,
    pub story_points: Option<i32>,
    pub status: StoryStatus,
    pub created_by: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStoryRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: StoryPriority,
    pub story_points: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStoryRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<StoryPriority>,
    pub story_points: Option<i32>,
    pub status: Option<StoryStatus>,
    /// Some("") clears the sprint assignment back to the backlog.
    pub sprint_id: Option<String>,
}

fn build_update(payload: &UpdateStoryRequest) -> Result<Document, ApiError> {
    let mut set_doc = doc! {};
    if let Some(title) = &payload.title {
        if title.trim().is_empty() {
            return Err(ApiError::Validation("Story title must not be empty".to_string()));
        }
        set_doc.insert("title", title);
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description);
    }
    if let Some(priority) = &payload.priority {
        set_doc.insert("priority", to_bson(priority)?);
    }
    if let Some(points) = payload.story_points {
        if points <= 0 {
            return Err(ApiError::Validation("Story points must be positive".to_string()));
        }
        set_doc.insert("story_points", points);
    }
    if let Some(status) = &payload.status {
        set_doc.insert("status", to_bson(status)?);
    }
    Ok(set_doc)
}

/// POST /api/v1/projects/{project_id}/stories
pub async fn create_story(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreateStoryRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, SPRINT_MANAGERS).await?;

    if payload.title.trim().is_empty() {
        return Err(ApiError::Validation("Story title must not be empty".to_string()));
    }
    if payload.story_points.is_some_and(|p| p <= 0) {
        return Err(ApiError::Validation("Story points must be positive".to_string()));
    }

    let new_story = UserStory {
        story_id: Uuid::new_v4().to_string(),
        project_id,
        sprint_id: None,
        title: payload.title.clone(),
        description: payload.description.clone(),
        priority: payload.priority,
        story_points: payload.story_points,
        status: StoryStatus::Backlog,
        created_by: current_user,
        created_at: Utc::now(),
    };
    let stories = data.mongodb.db.collection::<UserStory>("user_stories");
    stories.insert_one(&new_story).await?;
    info!("User story created: {}", new_story.story_id);
    Ok(HttpResponse::Created().json(new_story))
}

/// GET /api/v1/projects/{project_id}/stories
/// Optionally filtered by sprint: ?sprint_id=<id> or ?sprint_id= for backlog.
#[derive(Debug, Deserialize)]
pub struct StoryQuery {
    pub sprint_id: Option<String>,
}

pub async fn list_stories(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<StoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let mut filter = doc! { "project_id": &project_id };
    match &query.sprint_id {
        Some(sprint_id) if !sprint_id.is_empty() => {
            filter.insert("sprint_id", sprint_id);
        }
        Some(_) => {
            filter.insert("sprint_id", mongodb::bson::Bson::Null);
        }
        None => {}
    }

    let stories = data.mongodb.db.collection::<UserStory>("user_stories");
    let mut cursor = stories.find(filter).await?;
    let mut result = Vec::new();
    while let Some(story) = cursor.next().await {
        result.push(story?);
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/v1/stories/{story_id}
pub async fn get_story(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let story_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Story(&story_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let stories = data.mongodb.db.collection::<UserStory>("user_stories");
    let story = stories
        .find_one(doc! { "story_id": &story_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("User story not found".to_string()))?;
    Ok(HttpResponse::Ok().json(story))
}

/// PATCH /api/v1/stories/{story_id}
pub async fn update_story(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateStoryRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let story_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Story(&story_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, SPRINT_MANAGERS).await?;

    let mut set_doc = build_update(&payload)?;

    // Moving between sprint and backlog also flips the status.
    if let Some(sprint_id) = &payload.sprint_id {
        if sprint_id.is_empty() {
            set_doc.insert("sprint_id", mongodb::bson::Bson::Null);
            set_doc.insert("status", to_bson(&StoryStatus::Backlog)?);
        } else {
            let sprints = data.mongodb.db.collection::<Document>("sprints");
            let sprint = sprints
                .find_one(doc! { "sprint_id": sprint_id })
                .await?
                .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;
            if sprint.get_str("project_id").ok() != Some(project_id.as_str()) {
                return Err(ApiError::Validation(
                    "Sprint belongs to a different project".to_string(),
                ));
            }
            set_doc.insert("sprint_id", sprint_id);
            if payload.status.is_none() {
                set_doc.insert("status", to_bson(&StoryStatus::InSprint)?);
            }
        }
    }

    if set_doc.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    let stories = data.mongodb.db.collection::<UserStory>("user_stories");
    let result = stories
        .update_one(doc! { "story_id": &story_id }, doc! { "$set": set_doc })
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("User story not found".to_string()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Story updated" })))
}

/// DELETE /api/v1/stories/{story_id}
/// Tasks and their time logs go with the story.
pub async fn delete_story(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let story_id = path.into_inner();
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Story(&story_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, SPRINT_MANAGERS).await?;

    let db = &data.mongodb.db;
    let tasks = db.collection::<Document>("tasks");
    let mut cursor = tasks.find(doc! { "story_id": &story_id }).await?;
    while let Some(task) = cursor.next().await {
        let task = task?;
        if let Ok(task_id) = task.get_str("task_id") {
            db.collection::<Document>("time_log_entries")
                .delete_many(doc! { "task_id": task_id })
                .await?;
        }
    }
    tasks.delete_many(doc! { "story_id": &story_id }).await?;

    let stories = db.collection::<UserStory>("user_stories");
    let result = stories.delete_one(doc! { "story_id": &story_id }).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("User story not found".to_string()));
    }
    info!("User story deleted: {}", story_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Story deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_and_status_parse_snake_case() {
        let p: StoryPriority = serde_json::from_str("\"must_have\"").unwrap();
        assert_eq!(p, StoryPriority::MustHave);
        let s: StoryStatus = serde_json::from_str("\"in_sprint\"").unwrap();
        assert_eq!(s, StoryStatus::InSprint);
        assert!(serde_json::from_str::<StoryStatus>("\"doing\"").is_err());
    }

    #[test]
    fn update_doc_only_carries_provided_fields() {
        let payload = UpdateStoryRequest {
            title: Some("As a user, I can log in".to_string()),
            description: None,
            priority: Some(StoryPriority::ShouldHave),
            story_points: Some(5),
            status: None,
            sprint_id: None,
        };
        let set_doc = build_update(&payload).unwrap();
        assert_eq!(set_doc.get_str("title").unwrap(), "As a user, I can log in");
        assert_eq!(set_doc.get_str("priority").unwrap(), "should_have");
        assert_eq!(set_doc.get_i32("story_points").unwrap(), 5);
        assert!(set_doc.get("description").is_none());
        assert!(set_doc.get("status").is_none());
    }

    #[test]
    fn nonpositive_story_points_rejected() {
        let payload = UpdateStoryRequest {
            title: None,
            description: None,
            priority: None,
            story_points: Some(0),
            status: None,
            sprint_id: None,
        };
        assert!(build_update(&payload).is_err());
    }

    #[test]
    fn empty_title_rejected() {
        let payload = UpdateStoryRequest {
            title: Some("   ".to_string()),
            description: None,
            priority: None,
            story_points: None,
            status: None,
            sprint_id: None,
        };
        assert!(build_update(&payload).is_err());
    }
}
