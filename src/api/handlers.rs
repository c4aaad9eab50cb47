//! Route handlers: thin translation between HTTP and the `db`/`jobs`/
//! `resolver` free functions — no business logic lives here.

use super::types::{
    ApiResponse, CreateLibraryRequest, HistoryQuery, PostIdRequest, ResolveAllSameFolderRequest,
    StartJobRequest,
};
use crate::db::{duplicates, libraries};
use crate::error::AppResult;
use crate::jobs::{JobEngine, LibraryRoots};
use crate::resolver;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub job_engine: Arc<JobEngine>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_libraries(State(state): State<ApiState>) -> AppResult<Json<ApiResponse<Vec<libraries::Library>>>> {
    let all = libraries::list_libraries(&state.pool).await?;
    Ok(Json(ApiResponse::ok(all)))
}

pub async fn create_library(
    State(state): State<ApiState>,
    Json(body): Json<CreateLibraryRequest>,
) -> AppResult<Json<ApiResponse<libraries::Library>>> {
    let library = libraries::create_library(&state.pool, &body.name, &body.path, body.scan_interval_hours).await?;
    Ok(Json(ApiResponse::ok(library)))
}

pub async fn delete_library(State(state): State<ApiState>, Path(id): Path<i64>) -> AppResult<Json<ApiResponse<()>>> {
    libraries::delete_library(&state.pool, id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn available_jobs(State(state): State<ApiState>) -> Json<ApiResponse<Vec<crate::jobs::JobDescriptor>>> {
    Json(ApiResponse::ok(state.job_engine.get_available_jobs()))
}

pub async fn active_jobs(State(state): State<ApiState>) -> Json<ApiResponse<Vec<crate::jobs::JobInfo>>> {
    Json(ApiResponse::ok(state.job_engine.get_active_jobs().await))
}

pub async fn job_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ApiResponse<Value>>> {
    let (items, total) = state.job_engine.get_job_history(query.page, query.page_size).await?;
    Ok(Json(ApiResponse::ok(json!({ "items": items, "total": total }))))
}

pub async fn start_job(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(body): Json<StartJobRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    let execution_id = state.job_engine.start_job(&key, body.mode.into()).await?;
    Ok(Json(ApiResponse::ok(json!({ "executionId": execution_id }))))
}

pub async fn cancel_job(State(state): State<ApiState>, Path(execution_id): Path<i64>) -> Json<ApiResponse<()>> {
    state.job_engine.cancel_job(execution_id).await;
    Json(ApiResponse::ok(()))
}

pub async fn list_unresolved_duplicates(
    State(state): State<ApiState>,
) -> AppResult<Json<ApiResponse<Vec<duplicates::DuplicateGroup>>>> {
    let groups = duplicates::list_unresolved(&state.pool).await?;
    Ok(Json(ApiResponse::ok(groups)))
}

pub async fn keep_one(
    State(state): State<ApiState>,
    Path(group_id): Path<i64>,
    Json(body): Json<PostIdRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    resolver::keep_one(&state.pool, group_id, body.post_id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn exclude_one(
    State(state): State<ApiState>,
    Path(group_id): Path<i64>,
    Json(body): Json<PostIdRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    resolver::exclude_one(&state.pool, group_id, body.post_id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn delete_one_with_file(
    State(state): State<ApiState>,
    Path(group_id): Path<i64>,
    Json(body): Json<PostIdRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let roots = LibraryRoots::load(&state.pool).await.map_err(crate::error::AppError::Internal)?;
    resolver::delete_one_with_file(&state.pool, group_id, body.post_id, &roots).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn resolve_same_folder_group(
    State(state): State<ApiState>,
    Path(group_id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    let roots = LibraryRoots::load(&state.pool).await.map_err(crate::error::AppError::Internal)?;
    resolver::resolve_same_folder_group(&state.pool, group_id, &roots).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn keep_all(State(state): State<ApiState>, Path(group_id): Path<i64>) -> AppResult<Json<ApiResponse<()>>> {
    resolver::keep_all(&state.pool, group_id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn mark_unresolved(State(state): State<ApiState>, Path(group_id): Path<i64>) -> AppResult<Json<ApiResponse<()>>> {
    resolver::mark_unresolved(&state.pool, group_id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn mark_all_unresolved(State(state): State<ApiState>) -> AppResult<Json<ApiResponse<Value>>> {
    let count = resolver::mark_all_unresolved(&state.pool).await?;
    Ok(Json(ApiResponse::ok(json!({ "count": count }))))
}

pub async fn resolve_all(State(state): State<ApiState>) -> AppResult<Json<ApiResponse<Value>>> {
    let count = resolver::resolve_all(&state.pool).await?;
    Ok(Json(ApiResponse::ok(json!({ "resolved": count }))))
}

pub async fn resolve_all_exact(State(state): State<ApiState>) -> AppResult<Json<ApiResponse<Value>>> {
    let count = resolver::resolve_all_exact(&state.pool).await?;
    Ok(Json(ApiResponse::ok(json!({ "resolved": count }))))
}

pub async fn resolve_all_same_folder(
    State(state): State<ApiState>,
    Json(body): Json<ResolveAllSameFolderRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    let roots = LibraryRoots::load(&state.pool).await.map_err(crate::error::AppError::Internal)?;
    let count = resolver::resolve_all_same_folder(&state.pool, &roots, body.exact_only).await?;
    Ok(Json(ApiResponse::ok(json!({ "resolved": count }))))
}
