//! Thin HTTP mapping layer: health check, library CRUD, job control, and
//! duplicate-group resolution routes over the `db`/`jobs`/`resolver` free
//! functions. Authentication, rate limiting, and response shape beyond this
//! envelope are left to a reverse proxy or a future admin layer.

mod handlers;
mod types;

pub use handlers::ApiState;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/libraries", get(handlers::list_libraries).post(handlers::create_library))
        .route("/libraries/:id", delete(handlers::delete_library))
        .route("/jobs", get(handlers::available_jobs))
        .route("/jobs/active", get(handlers::active_jobs))
        .route("/jobs/history", get(handlers::job_history))
        .route("/jobs/:key/start", post(handlers::start_job))
        .route("/jobs/executions/:id/cancel", post(handlers::cancel_job))
        .route("/duplicates", get(handlers::list_unresolved_duplicates))
        .route("/duplicates/resolve-all", post(handlers::resolve_all))
        .route("/duplicates/resolve-all-exact", post(handlers::resolve_all_exact))
        .route("/duplicates/resolve-all-same-folder", post(handlers::resolve_all_same_folder))
        .route("/duplicates/mark-all-unresolved", post(handlers::mark_all_unresolved))
        .route("/duplicates/:id/keep-one", post(handlers::keep_one))
        .route("/duplicates/:id/exclude", post(handlers::exclude_one))
        .route("/duplicates/:id/delete-with-file", post(handlers::delete_one_with_file))
        .route("/duplicates/:id/resolve-same-folder", post(handlers::resolve_same_folder_group))
        .route("/duplicates/:id/keep-all", post(handlers::keep_all))
        .route("/duplicates/:id/mark-unresolved", post(handlers::mark_unresolved))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
