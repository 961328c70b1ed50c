//! Task routes: submit, poll, cancel.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use armory_core::CategoryRequest;
use armory_shared::{ArmoryError, Category, Progress, TaskId};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

/// `POST /api/scrape` body. Field aliases match older clients.
#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default, alias = "country_name")]
    pub country: Option<String>,
    #[serde(default, alias = "power")]
    pub categories: Option<CategoryRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    success: bool,
    message: &'static str,
    task_id: TaskId,
    country: String,
    categories: Vec<Category>,
    status_location: String,
}

#[derive(Debug, Serialize)]
struct TaskBody {
    success: bool,
    #[serde(flatten)]
    progress: Progress,
}

impl From<Progress> for TaskBody {
    fn from(progress: Progress) -> Self {
        Self {
            success: true,
            progress,
        }
    }
}

fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError(ArmoryError::NotFound(format!("task {raw}"))))
}

/// `POST /api/scrape`
pub async fn submit(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let country = request
        .country
        .ok_or_else(|| ArmoryError::validation("country is required"))?;
    let categories = request
        .categories
        .ok_or_else(|| ArmoryError::validation("categories is required"))?;

    let submission = state.dispatcher.submit(&country, categories).await?;
    info!(task_id = %submission.task_id, country = %submission.country, "scrape accepted");

    let body = Accepted {
        success: true,
        message: "Scraping pipeline started",
        task_id: submission.task_id,
        status_location: format!("/api/status/{}", submission.task_id),
        country: submission.country,
        categories: submission.categories,
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// `GET /api/status/:task_id`
pub async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let progress = state.dispatcher.status(parse_task_id(&task_id)?).await?;
    Ok(Json(TaskBody::from(progress)))
}

/// `DELETE /api/status/:task_id`
pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let progress = state.dispatcher.cancel(parse_task_id(&task_id)?).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskBody::from(progress))))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskList {
    success: bool,
    total_tasks: usize,
    tasks: Vec<Progress>,
}

/// `GET /api/debug/status`
pub async fn all_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.dispatcher.tasks().await;
    Json(TaskList {
        success: true,
        total_tasks: tasks.len(),
        tasks,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    success: bool,
    message: &'static str,
    available_categories: [Category; 4],
}

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(Health {
        success: true,
        message: "Armory scraper service is healthy",
        available_categories: Category::ALL,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};

    use crate::test_support::{call, get, harness, post_json};

    use super::*;

    async fn wait_until_finished(app: &axum::Router, task_id: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (status, body) = get(app, &format!("/api/status/{task_id}")).await;
                assert_eq!(status, StatusCode::OK);
                if ["completed", "failed", "cancelled"].contains(&body["status"].as_str().unwrap()) {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task did not finish")
    }

    #[tokio::test]
    async fn scrape_is_accepted_and_completes() {
        let h = harness().await;
        let (status, body) = post_json(
            &h.app,
            "/api/scrape",
            json!({"country": " India ", "categories": ["airpower", "droneforce"]}),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["success"], true);
        assert_eq!(body["country"], "india");
        assert_eq!(body["categories"], json!(["airpower", "droneforce"]));
        let task_id = body["taskId"].as_str().unwrap().to_string();
        assert_eq!(body["statusLocation"], format!("/api/status/{task_id}"));

        let done = wait_until_finished(&h.app, &task_id).await;
        assert_eq!(done["success"], true);
        assert_eq!(done["status"], "completed");
        assert_eq!(done["progressPercent"], 100);
        assert_eq!(done["completedCategories"], 2);
        assert_eq!(done["results"]["airpower"]["status"], "success");
        assert_eq!(done["results"]["airpower"]["recordCount"], 2);
        assert_eq!(done["results"]["droneforce"]["status"], "failed");
        assert_eq!(done["results"]["droneforce"]["message"], "No data found");
    }

    #[tokio::test]
    async fn duplicate_categories_run_twice() {
        let h = harness().await;
        let (status, body) = post_json(
            &h.app,
            "/api/scrape",
            json!({"country": "india", "categories": ["airpower", "airpower"]}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["categories"], json!(["airpower", "airpower"]));

        let done = wait_until_finished(&h.app, body["taskId"].as_str().unwrap()).await;
        assert_eq!(done["totalCategories"], 2);
        assert_eq!(done["completedCategories"], 2);
    }

    #[tokio::test]
    async fn legacy_field_names_are_accepted() {
        let h = harness().await;
        let (status, body) = post_json(
            &h.app,
            "/api/scrape",
            json!({"country_name": "france", "power": "all"}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            body["categories"],
            json!(["airpower", "navalpower", "droneforce", "landpower"])
        );
    }

    #[tokio::test]
    async fn invalid_submissions_are_rejected() {
        let h = harness().await;
        for payload in [
            json!({"country": "india", "categories": ["spacepower"]}),
            json!({"country": "", "categories": "airpower"}),
            json!({"country": "india", "categories": []}),
            json!({"categories": "airpower"}),
            json!({"country": "india"}),
            json!({"country": "india", "categories": ["airpower", "all"]}),
        ] {
            let (status, body) = post_json(&h.app, "/api/scrape", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        }
        assert!(h.state.dispatcher.tasks().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let h = harness().await;
        let (status, body) = call(
            &h.app,
            Request::builder()
                .method("POST")
                .uri("/api/scrape")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let h = harness().await;
        let (status, body) = get(&h.app, &format!("/api/status/{}", TaskId::new())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, _) = get(&h.app, "/api/status/not-a-uuid").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &h.app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/status/{}", TaskId::new()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancelling_a_finished_task_leaves_it_unchanged() {
        let h = harness().await;
        let (_, body) = post_json(
            &h.app,
            "/api/scrape",
            json!({"country": "india", "categories": "airpower"}),
        )
        .await;
        let task_id = body["taskId"].as_str().unwrap().to_string();
        wait_until_finished(&h.app, &task_id).await;

        let (status, body) = call(
            &h.app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/status/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn debug_status_lists_every_task() {
        let h = harness().await;
        for country in ["india", "france"] {
            post_json(
                &h.app,
                "/api/scrape",
                json!({"country": country, "categories": "landpower"}),
            )
            .await;
        }
        let (status, body) = get(&h.app, "/api/debug/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalTasks"], 2);
        assert_eq!(body["tasks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn health_reports_categories() {
        let h = harness().await;
        let (status, body) = get(&h.app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(
            body["availableCategories"],
            json!(["airpower", "navalpower", "droneforce", "landpower"])
        );
    }
}
