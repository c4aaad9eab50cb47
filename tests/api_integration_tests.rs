//! End-to-end tests for the HTTP API: library CRUD, job lifecycle
//! (including the at-most-one-per-key conflict), and duplicate-group
//! resolution, all driven over a real `axum::serve` listener.

use booru::api::{self, ApiState};
use booru::db;
use booru::jobs::{DerivedDataJob, JobContext, JobDescriptor, JobEngine, JobState};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// A handler that blocks until cancelled, used to exercise the engine's
/// conflict and cancellation behavior without a real filesystem job.
struct BlockingJob;

#[async_trait]
impl DerivedDataJob for BlockingJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "blocking",
            name: "Blocking",
            description: "waits for cancellation",
            supports_all_mode: false,
            display_order: 0,
        }
    }

    async fn run(&self, _pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        ctx.cancellation_token.cancelled().await;
        Ok("cancelled".into())
    }
}

struct InstantJob;

#[async_trait]
impl DerivedDataJob for InstantJob {
    fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            key: "instant",
            name: "Instant",
            description: "completes immediately",
            supports_all_mode: false,
            display_order: 1,
        }
    }

    async fn run(&self, _pool: &SqlitePool, ctx: JobContext) -> anyhow::Result<String> {
        ctx.reporter.update(JobState {
            activity_text: "done".into(),
            final_text: Some("ok".into()),
            ..Default::default()
        });
        Ok("ok".into())
    }
}

async fn spawn_server() -> (String, SqlitePool) {
    let pool = SqlitePool::connect("sqlite::memory:").await.expect("open db");
    db::init_schema(&pool).await.expect("init schema");

    let job_engine = Arc::new(JobEngine::new(
        pool.clone(),
        vec![Arc::new(InstantJob), Arc::new(BlockingJob)],
    ));
    let state = ApiState { pool: pool.clone(), job_engine };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), pool)
}

#[tokio::test]
async fn health_check_responds_ok() {
    let (base_url, _pool) = spawn_server().await;
    let resp = reqwest_get(&format!("{base_url}/health")).await;
    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn library_crud_round_trips_through_the_api() {
    let (base_url, _pool) = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base_url}/libraries"))
        .json(&json!({ "name": "Main", "path": "/data/main", "scan_interval_hours": 12 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["success"], true);
    let library_id = created["data"]["id"].as_i64().unwrap();

    let listed = reqwest_get(&format!("{base_url}/libraries")).await;
    let libraries = listed["data"].as_array().unwrap();
    assert!(libraries.iter().any(|l| l["id"] == library_id));

    let resp = client
        .delete(format!("{base_url}/libraries/{library_id}"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let listed = reqwest_get(&format!("{base_url}/libraries")).await;
    assert!(listed["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn starting_a_second_instance_of_a_running_job_key_conflicts() {
    let (base_url, _pool) = spawn_server().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base_url}/jobs/blocking/start"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert!(first.status().is_success());

    let second = client
        .post(format!("{base_url}/jobs/blocking/start"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

    let active = reqwest_get(&format!("{base_url}/jobs/active")).await;
    assert_eq!(active["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn starting_an_unknown_job_key_returns_not_found() {
    let (base_url, _pool) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/jobs/does-not-exist/start"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completed_job_shows_up_in_history() {
    let (base_url, _pool) = spawn_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base_url}/jobs/instant/start"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let history = reqwest_get(&format!("{base_url}/jobs/history?page=0&page_size=10")).await;
    let items = history["data"]["items"].as_array().unwrap();
    assert!(items.iter().any(|i| i["job_name"] == "instant" && i["status"] == "completed"));
}

async fn reqwest_get(url: &str) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}
