// src/authorization.rs
//
// Resolves which project a request concerns and checks the caller's
// per-project role against an endpoint's allow-list.

use actix_web::{HttpMessage, HttpRequest};
use chrono::Utc;
use mongodb::bson::{doc, Document};
use mongodb::Database;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ApiError;

/// A user's permission level scoped to one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    ProductOwner,
    ScrumMaster,
    Developer,
}

impl ProjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::ProductOwner => "product_owner",
            ProjectRole::ScrumMaster => "scrum_master",
            ProjectRole::Developer => "developer",
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectRole {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_owner" => Ok(ProjectRole::ProductOwner),
            "scrum_master" => Ok(ProjectRole::ScrumMaster),
            "developer" => Ok(ProjectRole::Developer),
            other => Err(ApiError::Validation(format!("Unknown project role: {}", other))),
        }
    }
}

/// One document per project/user pair in the `project_user_roles` collection.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectUserRole {
    pub project_id: String,
    pub user_id: String,
    pub role: ProjectRole,
    pub granted_at: chrono::DateTime<Utc>,
}

pub const ANY_MEMBER: &[ProjectRole] = &[
    ProjectRole::ProductOwner,
    ProjectRole::ScrumMaster,
    ProjectRole::Developer,
];
pub const PRODUCT_OWNER: &[ProjectRole] = &[ProjectRole::ProductOwner];
pub const SPRINT_MANAGERS: &[ProjectRole] =
    &[ProjectRole::ProductOwner, ProjectRole::ScrumMaster];

/// The id a request carries. Sub-resource ids are walked up to their project.
#[derive(Debug, Clone, Copy)]
pub enum ProjectScope<'a> {
    Project(&'a str),
    Sprint(&'a str),
    Story(&'a str),
    Task(&'a str),
    TimeLogEntry(&'a str),
}

fn field_str(document: &Document, field: &'static str) -> Result<String, ApiError> {
    document
        .get_str(field)
        .map(str::to_string)
        .map_err(|_| ApiError::Internal(format!("Document missing field '{}'", field)))
}

/// Walks from whichever id the request carries up to the owning project id.
/// A broken link anywhere along the chain is a 404.
pub async fn resolve_project_id(
    db: &Database,
    scope: ProjectScope<'_>,
) -> Result<String, ApiError> {
    match scope {
        ProjectScope::Project(project_id) => {
            let projects = db.collection::<Document>("projects");
            projects
                .find_one(doc! { "project_id": project_id })
                .await?
                .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;
            Ok(project_id.to_string())
        }
        ProjectScope::Sprint(sprint_id) => {
            let sprints = db.collection::<Document>("sprints");
            let sprint = sprints
                .find_one(doc! { "sprint_id": sprint_id })
                .await?
                .ok_or_else(|| ApiError::NotFound("Sprint not found".to_string()))?;
            field_str(&sprint, "project_id")
        }
        ProjectScope::Story(story_id) => {
            let stories = db.collection::<Document>("user_stories");
            let story = stories
                .find_one(doc! { "story_id": story_id })
                .await?
                .ok_or_else(|| ApiError::NotFound("User story not found".to_string()))?;
            field_str(&story, "project_id")
        }
        ProjectScope::Task(task_id) => {
            let tasks = db.collection::<Document>("tasks");
            let task = tasks
                .find_one(doc! { "task_id": task_id })
                .await?
                .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
            let story_id = field_str(&task, "story_id")?;
            Box::pin(resolve_project_id(db, ProjectScope::Story(&story_id))).await
        }
        ProjectScope::TimeLogEntry(entry_id) => {
            let entries = db.collection::<Document>("time_log_entries");
            let entry = entries
                .find_one(doc! { "entry_id": entry_id })
                .await?
                .ok_or_else(|| ApiError::NotFound("Time log entry not found".to_string()))?;
            let task_id = field_str(&entry, "task_id")?;
            Box::pin(resolve_project_id(db, ProjectScope::Task(&task_id))).await
        }
    }
}

/// Pure allow-list check. A global admin passes regardless of project role;
/// a user with no role in the project is always denied.
pub fn role_permits(
    role: Option<ProjectRole>,
    is_system_admin: bool,
    allowed: &[ProjectRole],
) -> bool {
    if is_system_admin {
        return true;
    }
    role.is_some_and(|r| allowed.contains(&r))
}

/// Looks up the caller's global admin flag and project role, then applies the
/// allow-list. Returns the role (None for an admin without one) so handlers
/// can branch further if they need to.
pub async fn authorize(
    db: &Database,
    user_id: &str,
    project_id: &str,
    allowed: &[ProjectRole],
) -> Result<Option<ProjectRole>, ApiError> {
    let users = db.collection::<Document>("users");
    let user = users
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".to_string()))?;
    let is_system_admin = user.get_bool("is_system_admin").unwrap_or(false);

    let roles = db.collection::<ProjectUserRole>("project_user_roles");
    let role = roles
        .find_one(doc! { "project_id": project_id, "user_id": user_id })
        .await?
        .map(|r| r.role);

    if role_permits(role, is_system_admin, allowed) {
        Ok(role)
    } else {
        Err(ApiError::Forbidden(
            "Insufficient project role for this operation".to_string(),
        ))
    }
}

/// The authenticated user id the token middleware stored in extensions.
pub fn current_user_id(req: &HttpRequest) -> Result<String, ApiError> {
    req.extensions()
        .get::<String>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("Missing or invalid token".to_string()))
}
