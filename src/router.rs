use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use crate::middleware::auth::require_auth;
use crate::middleware::error_handler::log_errors;
use crate::routes::{
    auth, friends, messages, parents, posts, profile_changes, school_codes, users, verification,
};
use crate::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::handler::register))
        .route("/api/auth/login", post(auth::handler::login))
        .route("/api/auth/login-with-code", post(auth::handler::login_with_code));

    let protected = Router::new()
        .route("/api/auth/me", get(auth::handler::me))
        .route("/api/auth/login-code", post(auth::handler::create_login_code))
        .route("/api/friends", get(friends::handler::list_friends))
        .route("/api/friends/my-code", get(friends::handler::my_code))
        .route("/api/friends/add-by-code", post(friends::handler::add_by_code))
        .route("/api/friends/request", post(friends::handler::request_friend))
        .route("/api/friends/accept", post(friends::handler::accept_friend))
        .route("/api/friends/search", get(friends::handler::search))
        .route(
            "/api/posts",
            post(posts::handler::create_post).get(posts::handler::feed),
        )
        .route("/api/posts/pending", get(posts::handler::pending_posts))
        .route("/api/posts/{id}/approve", put(posts::handler::review_post))
        .route("/api/posts/{id}/like", post(posts::handler::toggle_like))
        .route("/api/posts/{id}/comment", post(posts::handler::add_comment))
        .route(
            "/api/messages",
            post(messages::handler::send_message).get(messages::handler::list_messages),
        )
        .route("/api/messages/pending", get(messages::handler::pending_messages))
        .route(
            "/api/messages/{id}/moderate",
            put(messages::handler::moderate_message),
        )
        .route(
            "/api/profile-changes/request",
            post(profile_changes::handler::request_changes),
        )
        .route(
            "/api/profile-changes/pending",
            get(profile_changes::handler::pending_requests),
        )
        .route(
            "/api/profile-changes/{id}/approve",
            put(profile_changes::handler::review_request),
        )
        .route("/api/verification/parent", post(verification::handler::verify_child))
        .route("/api/school-codes/validate", post(school_codes::handler::validate_code))
        .route("/api/parents/dashboard", get(parents::handler::dashboard))
        .route("/api/parents/children/{id}", get(parents::handler::child_detail))
        .route("/api/parents/connections", get(parents::handler::connections))
        .route("/api/users/me/export", get(users::handler::export_my_data))
        .route("/api/users/me", delete(users::handler::delete_my_account))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let router = public.merge(protected).layer(from_fn(log_errors));

    // Local clients hit the API from another origin during development.
    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    router.with_state(state)
}
