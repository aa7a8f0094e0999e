// src/main.rs

mod app_state;
mod auth;
mod authorization;
mod config;
mod db;
mod errors;
mod post;
mod project;
mod sprint;
mod task;
mod time_log;
mod user;
mod user_story;

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::info;

use crate::app_state::AppState;
use crate::auth::{login, signup, validate_jwt};
use crate::post::{create_post, list_posts};
use crate::project::{
    create_project, delete_project, get_project, grant_role, list_projects, list_roles,
    revoke_role, update_project,
};
use crate::sprint::{create_sprint, delete_sprint, get_sprint, list_sprints, update_sprint};
use crate::task::{claim_task, create_task, delete_task, get_task, list_tasks, update_task};
use crate::time_log::{create_entry, delete_entry, list_entries, update_entry};
use crate::user::{get_user, list_users, update_user};
use crate::user_story::{create_story, delete_story, get_story, list_stories, update_story};

/// Bearer-token middleware. A valid token puts the subject user id into
/// request extensions; an invalid one is rejected outright. Requests without
/// a token pass through and fail later wherever an identity is required.
#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.starts_with("Bearer ") {
                    let token = auth_str.trim_start_matches("Bearer ").trim();
                    let secret =
                        env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string());
                    match validate_jwt(token, &secret) {
                        Ok(claims) => {
                            req.extensions_mut().insert(claims.sub);
                        }
                        Err(e) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .json(serde_json::json!({
                                    "error": "unauthorized",
                                    "message": format!("Invalid token: {}", e),
                                }))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

pub fn api_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login)),
            )
            .service(
                web::scope("/users")
                    .route("", web::get().to(list_users))
                    .route("/{user_id}", web::get().to(get_user))
                    .route("/{user_id}", web::patch().to(update_user)),
            )
            .service(
                web::scope("/projects")
                    .route("", web::post().to(create_project))
                    .route("", web::get().to(list_projects))
                    .route("/{project_id}", web::get().to(get_project))
                    .route("/{project_id}", web::patch().to(update_project))
                    .route("/{project_id}", web::delete().to(delete_project))
                    .route("/{project_id}/roles", web::get().to(list_roles))
                    .route("/{project_id}/roles", web::post().to(grant_role))
                    .route("/{project_id}/roles/{user_id}", web::delete().to(revoke_role))
                    .route("/{project_id}/sprints", web::get().to(list_sprints))
                    .route("/{project_id}/sprints", web::post().to(create_sprint))
                    .route("/{project_id}/stories", web::get().to(list_stories))
                    .route("/{project_id}/stories", web::post().to(create_story))
                    .route("/{project_id}/posts", web::get().to(list_posts))
                    .route("/{project_id}/posts", web::post().to(create_post)),
            )
            .service(
                web::scope("/sprints")
                    .route("/{sprint_id}", web::get().to(get_sprint))
                    .route("/{sprint_id}", web::patch().to(update_sprint))
                    .route("/{sprint_id}", web::delete().to(delete_sprint)),
            )
            .service(
                web::scope("/stories")
                    .route("/{story_id}", web::get().to(get_story))
                    .route("/{story_id}", web::patch().to(update_story))
                    .route("/{story_id}", web::delete().to(delete_story))
                    .route("/{story_id}/tasks", web::get().to(list_tasks))
                    .route("/{story_id}/tasks", web::post().to(create_task)),
            )
            .service(
                web::scope("/tasks")
                    .route("/{task_id}", web::get().to(get_task))
                    .route("/{task_id}", web::patch().to(update_task))
                    .route("/{task_id}", web::delete().to(delete_task))
                    .route("/{task_id}/claim", web::post().to(claim_task))
                    .route("/{task_id}/timelogs", web::get().to(list_entries))
                    .route("/{task_id}/timelogs", web::post().to(create_entry)),
            )
            .service(
                web::scope("/timelogs")
                    .route("/{entry_id}", web::patch().to(update_entry))
                    .route("/{entry_id}", web::delete().to(delete_entry)),
            ),
    );
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let mongodb = Arc::new(db::MongoDB::init(&config.mongo_uri, &config.database_name).await);

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS origin: {}", config.frontend_origin);

    let bind_addr = config.bind_addr.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PATCH", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication)
            .app_data(web::Data::new(AppState {
                mongodb: mongodb.clone(),
                config: config.clone(),
            }))
            .configure(api_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, HttpRequest};

    async fn whoami(req: HttpRequest) -> HttpResponse {
        match req.extensions().get::<String>() {
            Some(user_id) => HttpResponse::Ok().body(user_id.clone()),
            None => HttpResponse::Unauthorized().body("no identity"),
        }
    }

    #[actix_web::test]
    async fn valid_token_reaches_handler_with_identity() {
        env::set_var("JWT_SECRET", "test-secret");
        let app = test::init_service(
            App::new()
                .wrap(Authentication)
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let token = crate::auth::create_jwt("user-1", "test-secret").unwrap();
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        assert_eq!(body, "user-1");
    }

    #[actix_web::test]
    async fn garbage_token_is_rejected() {
        env::set_var("JWT_SECRET", "test-secret");
        let app = test::init_service(
            App::new()
                .wrap(Authentication)
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((http::header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn missing_token_leaves_request_anonymous() {
        env::set_var("JWT_SECRET", "test-secret");
        let app = test::init_service(
            App::new()
                .wrap(Authentication)
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
    }
}
