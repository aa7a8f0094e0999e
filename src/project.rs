// src/project.rs

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use futures_util::StreamExt;
use log::{error, info};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authorization::{
    authorize, current_user_id, resolve_project_id, ProjectRole, ProjectScope,
    ProjectUserRole, ANY_MEMBER, PRODUCT_OWNER,
};
use crate::errors::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantRoleRequest {
    pub user_id: String,
    pub role: ProjectRole,
}

/// POST /api/v1/projects
/// Creates a project; the creator becomes its product owner.
pub async fn create_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateProjectRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Project name must not be empty".to_string()));
    }

    let new_project = Project {
        project_id: Uuid::new_v4().to_string(),
        name: payload.name.clone(),
        description: payload.description.clone(),
        created_by: current_user.clone(),
        created_at: Utc::now(),
    };
    let projects = data.mongodb.db.collection::<Project>("projects");
    projects.insert_one(&new_project).await?;
    info!("Project created: {}", new_project.project_id);

    let roles = data.mongodb.db.collection::<ProjectUserRole>("project_user_roles");
    let grant = ProjectUserRole {
        project_id: new_project.project_id.clone(),
        user_id: current_user,
        role: ProjectRole::ProductOwner,
        granted_at: Utc::now(),
    };
    roles.insert_one(&grant).await?;

    Ok(HttpResponse::Created().json(new_project))
}

/// GET /api/v1/projects
/// Lists projects the caller belongs to; system admins see everything.
pub async fn list_projects(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;

    let users = data.mongodb.db.collection::<mongodb::bson::Document>("users");
    let user = users
        .find_one(doc! { "user_id": &current_user })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    let is_admin = user.get_bool("is_system_admin").unwrap_or(false);

    let projects = data.mongodb.db.collection::<Project>("projects");
    let filter = if is_admin {
        doc! {}
    } else {
        let roles = data.mongodb.db.collection::<ProjectUserRole>("project_user_roles");
        let mut cursor = roles.find(doc! { "user_id": &current_user }).await?;
        let mut project_ids = Vec::new();
        while let Some(grant) = cursor.next().await {
            project_ids.push(grant?.project_id);
        }
        doc! { "project_id": { "$in": project_ids } }
    };

    let mut cursor = projects.find(filter).await?;
    let mut result = Vec::new();
    while let Some(project) = cursor.next().await {
        match project {
            Ok(p) => result.push(p),
            Err(e) => {
                error!("Cursor error listing projects: {}", e);
                return Err(e.into());
            }
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/v1/projects/{project_id}
pub async fn get_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let projects = data.mongodb.db.collection::<Project>("projects");
    let project = projects
        .find_one(doc! { "project_id": &project_id })
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;
    Ok(HttpResponse::Ok().json(project))
}

/// PATCH /api/v1/projects/{project_id}
pub async fn update_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateProjectRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, PRODUCT_OWNER).await?;

    let mut set_doc = doc! {};
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Project name must not be empty".to_string()));
        }
        set_doc.insert("name", name);
    }
    if let Some(description) = &payload.description {
        set_doc.insert("description", description);
    }
    if set_doc.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    let projects = data.mongodb.db.collection::<Project>("projects");
    let result = projects
        .update_one(doc! { "project_id": &project_id }, doc! { "$set": set_doc })
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::NotFound("Project not found".to_string()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Project updated" })))
}

/// DELETE /api/v1/projects/{project_id}
/// Removes the project and everything hanging off it.
pub async fn delete_project(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, PRODUCT_OWNER).await?;

    let db = &data.mongodb.db;
    let filter = doc! { "project_id": &project_id };

    // Cascade: stories and tasks/time logs first, then project-level records.
    let stories = db.collection::<mongodb::bson::Document>("user_stories");
    let mut cursor = stories.find(filter.clone()).await?;
    while let Some(story) = cursor.next().await {
        let story = story?;
        if let Ok(story_id) = story.get_str("story_id") {
            let tasks = db.collection::<mongodb::bson::Document>("tasks");
            let mut task_cursor = tasks.find(doc! { "story_id": story_id }).await?;
            while let Some(task) = task_cursor.next().await {
                let task = task?;
                if let Ok(task_id) = task.get_str("task_id") {
                    db.collection::<mongodb::bson::Document>("time_log_entries")
                        .delete_many(doc! { "task_id": task_id })
                        .await?;
                }
            }
            tasks.delete_many(doc! { "story_id": story_id }).await?;
        }
    }
    stories.delete_many(filter.clone()).await?;
    db.collection::<mongodb::bson::Document>("sprints")
        .delete_many(filter.clone())
        .await?;
    db.collection::<mongodb::bson::Document>("posts")
        .delete_many(filter.clone())
        .await?;
    db.collection::<mongodb::bson::Document>("project_user_roles")
        .delete_many(filter.clone())
        .await?;

    let projects = db.collection::<Project>("projects");
    let result = projects.delete_one(filter).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("Project not found".to_string()));
    }
    info!("Project deleted: {}", project_id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Project deleted" })))
}

/// GET /api/v1/projects/{project_id}/roles
pub async fn list_roles(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, ANY_MEMBER).await?;

    let roles = data.mongodb.db.collection::<ProjectUserRole>("project_user_roles");
    let mut cursor = roles.find(doc! { "project_id": &project_id }).await?;
    let mut grants = Vec::new();
    while let Some(grant) = cursor.next().await {
        grants.push(grant?);
    }
    Ok(HttpResponse::Ok().json(grants))
}

/// POST /api/v1/projects/{project_id}/roles
/// Grants a project role; one grant per user, duplicates rejected.
pub async fn grant_role(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<GrantRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&path)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, PRODUCT_OWNER).await?;

    // The target must exist.
    let users = data.mongodb.db.collection::<mongodb::bson::Document>("users");
    if users
        .find_one(doc! { "user_id": &payload.user_id })
        .await?
        .is_none()
    {
        return Err(ApiError::Validation("No such user".to_string()));
    }

    let roles = data.mongodb.db.collection::<ProjectUserRole>("project_user_roles");
    if roles
        .find_one(doc! { "project_id": &project_id, "user_id": &payload.user_id })
        .await?
        .is_some()
    {
        return Err(ApiError::Validation(
            "User already has a role in this project".to_string(),
        ));
    }

    let grant = ProjectUserRole {
        project_id: project_id.clone(),
        user_id: payload.user_id.clone(),
        role: payload.role,
        granted_at: Utc::now(),
    };
    roles.insert_one(&grant).await?;
    info!("Granted {} on {} to {}", grant.role, project_id, grant.user_id);
    Ok(HttpResponse::Created().json(grant))
}

/// DELETE /api/v1/projects/{project_id}/roles/{user_id}
pub async fn revoke_role(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (project_path_id, target_user) = path.into_inner();
    let current_user = current_user_id(&req)?;
    let project_id =
        resolve_project_id(&data.mongodb.db, ProjectScope::Project(&project_path_id)).await?;
    authorize(&data.mongodb.db, &current_user, &project_id, PRODUCT_OWNER).await?;

    let roles = data.mongodb.db.collection::<ProjectUserRole>("project_user_roles");
    let result = roles
        .delete_one(doc! { "project_id": &project_id, "user_id": &target_user })
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound("No role grant for that user".to_string()));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "Role revoked" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, HttpMessage};
    use std::sync::Arc;

    // Runs only when MONGO_URI points at a reachable server.
    #[tokio::test]
    async fn duplicate_role_grant_is_rejected() {
        let Ok(uri) = std::env::var("MONGO_URI") else {
            eprintln!("MONGO_URI not set, skipping duplicate grant test");
            return;
        };
        let db_name = format!("scrumline_test_{}", Uuid::new_v4().simple());
        let mongodb = Arc::new(crate::db::MongoDB::init(&uri, &db_name).await);
        let data = web::Data::new(AppState {
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
        db.collection::<mongodb::bson::Document>("users")
            .insert_many(vec![
                doc! { "user_id": "owner-1", "username": "po", "email": "po@example.com", "is_system_admin": false },
                doc! { "user_id": "dev-1", "username": "dev", "email": "dev@example.com", "is_system_admin": false },
            ])
            .await
            .unwrap();
        db.collection::<mongodb::bson::Document>("projects")
            .insert_one(doc! { "project_id": "p1", "name": "Apollo" })
            .await
            .unwrap();
        db.collection::<ProjectUserRole>("project_user_roles")
            .insert_one(&ProjectUserRole {
                project_id: "p1".to_string(),
                user_id: "owner-1".to_string(),
                role: ProjectRole::ProductOwner,
                granted_at: Utc::now(),
            })
            .await
            .unwrap();

        let req = test::TestRequest::default().to_http_request();
        req.extensions_mut().insert("owner-1".to_string());
        let payload = || GrantRoleRequest {
            user_id: "dev-1".to_string(),
            role: ProjectRole::Developer,
        };

        grant_role(
            req.clone(),
            data.clone(),
            web::Path::from("p1".to_string()),
            web::Json(payload()),
        )
        .await
        .unwrap();

        let err = grant_role(
            req.clone(),
            data.clone(),
            web::Path::from("p1".to_string()),
            web::Json(payload()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        db.drop().await.unwrap();
    }
}
