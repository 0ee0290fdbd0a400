//! Operator-facing HTTP surface.
//!
//! The web UI and programmatic clients both land here: list/detail data for
//! the dashboard, plus the two decision ingress routes (form post from the
//! task page, JSON for scripts). Both decision surfaces feed
//! [`DecisionCoordinator::deliver_decision`]; this module never touches the
//! rendezvous registry itself.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::error;
use uuid::Uuid;

use tollgate_protocol::{Decision, EventKind, TaskFilter, TaskStatus};

use crate::coordinator::DeliverError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/dashboard", get(dashboard))
        .route("/task/{id}", get(task_detail))
        .route("/task/{id}/action", post(task_action_form))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/action", post(task_action_api))
        .route("/health", get(health))
}

const RECENT_LIMIT: usize = 10;

/// GET `/` and `/dashboard` — data for the list view: pending decisions
/// oldest-first plus a short tail of recent activity.
async fn dashboard(State(state): State<AppState>) -> Response {
    let pending = match state.store.pending().await {
        Ok(tasks) => tasks,
        Err(e) => return store_failure("load pending tasks", e),
    };
    let recent = match state
        .store
        .list(TaskFilter {
            limit: Some(RECENT_LIMIT),
            ..Default::default()
        })
        .await
    {
        Ok(tasks) => tasks,
        Err(e) => return store_failure("load recent tasks", e),
    };

    Json(json!({
        "pending": pending,
        "recent": recent,
        "active_decisions": state.coordinator.active_decisions(),
    }))
    .into_response()
}

/// GET `/task/{id}` — detail-page data: the task plus its audit trail.
async fn task_detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    get_task_with_history(&state, &id).await
}

/// GET `/api/tasks/{id}` — same payload as the detail page.
async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    get_task_with_history(&state, &id).await
}

async fn get_task_with_history(state: &AppState, raw_id: &str) -> Response {
    let id = match parse_task_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let task = match state.store.get(id).await {
        Ok(task) => task,
        Err(crate::store::StoreError::NotFound(_)) => {
            return error_json(StatusCode::NOT_FOUND, "Task not found")
        }
        Err(e) => return store_failure("load task", e),
    };
    let history = match state.store.history_for(id).await {
        Ok(history) => history,
        Err(e) => return store_failure("load task history", e),
    };

    Json(json!({
        "task": task,
        "history": history,
        "awaiting_decision": state.coordinator.has_pending_decision(id),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    hook_type: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// GET `/api/tasks` — filtered task list.
async fn list_tasks(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<TaskStatus>() {
            Ok(status) => Some(status),
            Err(e) => return error_json(StatusCode::BAD_REQUEST, &e),
        },
    };
    let event_kind = match query.hook_type.as_deref() {
        None | Some("") => None,
        Some(raw) => match raw.parse::<EventKind>() {
            Ok(kind) => Some(kind),
            Err(e) => return error_json(StatusCode::BAD_REQUEST, &e.to_string()),
        },
    };

    let filter = TaskFilter {
        status,
        event_kind,
        limit: query.limit,
        offset: query.offset,
    };
    match state.store.list(filter).await {
        Ok(tasks) => {
            let count = tasks.len();
            Json(json!({"tasks": tasks, "count": count})).into_response()
        }
        Err(e) => store_failure("list tasks", e),
    }
}

#[derive(Debug, Deserialize)]
struct ActionForm {
    #[serde(default)]
    action: String,
    comment: Option<String>,
    timestamp: Option<String>,
}

/// POST `/task/{id}/action` — decision from the operator web form. Redirects
/// back to the task page so a refresh shows the resolved status.
async fn task_action_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<ActionForm>,
) -> Response {
    let id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let decision = match parse_decision(&form.action) {
        Ok(decision) => decision,
        Err(resp) => return resp,
    };

    let mut metadata = Map::new();
    if let Some(agent) = headers.get("user-agent").and_then(|v| v.to_str().ok()) {
        metadata.insert("user_agent".into(), Value::String(agent.to_string()));
    }
    if let Some(comment) = form.comment.filter(|c| !c.is_empty()) {
        metadata.insert("comment".into(), Value::String(comment));
    }
    if let Some(timestamp) = form.timestamp.filter(|t| !t.is_empty()) {
        metadata.insert("timestamp".into(), Value::String(timestamp));
    }

    match state.coordinator.deliver_decision(id, decision, metadata).await {
        Ok(()) => Redirect::to(&format!("/task/{id}")).into_response(),
        Err(e) => deliver_failure(e),
    }
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    #[serde(default)]
    action: String,
    response: Option<Map<String, Value>>,
}

/// POST `/api/tasks/{id}/action` — decision from a programmatic client.
async fn task_action_api(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Response {
    let id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let decision = match parse_decision(&request.action) {
        Ok(decision) => decision,
        Err(resp) => return resp,
    };

    let metadata = request.response.unwrap_or_default();
    match state.coordinator.deliver_decision(id, decision, metadata).await {
        Ok(()) => Json(json!({
            "success": true,
            "message": format!("Action '{decision}' processed for task {id}"),
        }))
        .into_response(),
        Err(e) => deliver_failure(e),
    }
}

/// GET `/health` — liveness probe.
async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

fn parse_task_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_json(StatusCode::BAD_REQUEST, "Invalid task ID"))
}

fn parse_decision(raw: &str) -> Result<Decision, Response> {
    raw.parse::<Decision>()
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, &e))
}

fn deliver_failure(err: DeliverError) -> Response {
    match err {
        DeliverError::NotFound(_) => error_json(StatusCode::NOT_FOUND, "Task not found"),
        DeliverError::Store(e) => store_failure("record decision", e),
    }
}

fn store_failure(what: &str, err: crate::store::StoreError) -> Response {
    error!(
        component = "web_api",
        event = "web_api.store_failed",
        action = what,
        error = %err,
        "Store operation failed"
    );
    error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process action")
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use tollgate_protocol::{HookEvent, Task};

    use crate::coordinator::{CoordinatorConfig, DecisionCoordinator};
    use crate::store::tests::{bash_event, test_store};

    fn test_state() -> AppState {
        let store = Arc::new(test_store());
        let coordinator = Arc::new(DecisionCoordinator::new(
            store.clone(),
            None,
            CoordinatorConfig {
                decision_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        ));
        AppState::new(coordinator, store)
    }

    fn app(state: AppState) -> Router {
        routes().with_state(state)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn get_path(router: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(router, request).await
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (status, value) = get_path(app(test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn dashboard_splits_pending_and_recent() {
        let state = test_state();
        let pending = Task::new(bash_event("s1"));
        state.store.create(&pending).await.unwrap();
        let done = Task::completed(HookEvent::empty(EventKind::Stop));
        state.store.create(&done).await.unwrap();

        let (status, value) = get_path(app(state), "/dashboard").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["pending"].as_array().unwrap().len(), 1);
        assert_eq!(value["recent"].as_array().unwrap().len(), 2);
        assert_eq!(value["active_decisions"], json!(0));
    }

    #[tokio::test]
    async fn task_detail_includes_history() {
        let state = test_state();
        let task = Task::new(bash_event("s1"));
        state.store.create(&task).await.unwrap();
        state
            .store
            .append_history(task.id, "created", Map::new())
            .await
            .unwrap();

        let (status, value) = get_path(app(state), &format!("/task/{}", task.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["task"]["id"], json!(task.id.to_string()));
        assert_eq!(value["history"].as_array().unwrap().len(), 1);
        assert_eq!(value["awaiting_decision"], json!(false));
    }

    #[tokio::test]
    async fn invalid_and_unknown_ids_are_distinct_errors() {
        let state = test_state();

        let (status, _) = get_path(app(state.clone()), "/api/tasks/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            get_path(app(state), &format!("/api/tasks/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_hook_type() {
        let state = test_state();
        state.store.create(&Task::new(bash_event("s1"))).await.unwrap();
        state
            .store
            .create(&Task::completed(HookEvent::empty(EventKind::Stop)))
            .await
            .unwrap();

        let (status, value) =
            get_path(app(state.clone()), "/api/tasks?status=pending").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["count"], json!(1));
        assert_eq!(value["tasks"][0]["status"], json!("pending"));

        let (status, value) = get_path(app(state.clone()), "/api/tasks?hook_type=Stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["count"], json!(1));

        let (status, _) = get_path(app(state), "/api/tasks?status=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn json_action_resolves_a_pending_task() {
        let state = test_state();
        let task = Task::new(bash_event("s1"));
        state.store.create(&task).await.unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/tasks/{}/action", task.id))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"action": "approve", "response": {"comment": "ship it"}}).to_string(),
            ))
            .unwrap();
        let (status, value) = send(app(state.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], json!(true));

        let reloaded = state.store.get(task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Approved);
        assert_eq!(reloaded.action_taken, Some(Decision::Approve));
    }

    #[tokio::test]
    async fn json_action_rejects_unknown_action() {
        let state = test_state();
        let task = Task::new(bash_event("s1"));
        state.store.create(&task).await.unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/tasks/{}/action", task.id))
            .header("content-type", "application/json")
            .body(Body::from(json!({"action": "explode"}).to_string()))
            .unwrap();
        let (status, _) = send(app(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn form_action_redirects_to_the_task_page() {
        let state = test_state();
        let task = Task::new(bash_event("s1"));
        state.store.create(&task).await.unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/task/{}/action", task.id))
            .header("content-type", "application/x-www-form-urlencoded")
            .header("user-agent", "tollgate-test")
            .body(Body::from("action=reject&comment=too+risky"))
            .unwrap();
        let response = app(state.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert_eq!(location, format!("/task/{}", task.id));

        let reloaded = state.store.get(task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Rejected);
        let payload = reloaded.response_payload.unwrap();
        assert_eq!(payload.get("comment"), Some(&json!("too risky")));
        assert_eq!(payload.get("user_agent"), Some(&json!("tollgate-test")));
    }

    #[tokio::test]
    async fn late_decision_still_acknowledged() {
        let state = test_state();
        let mut task = Task::new(bash_event("s1"));
        task.take_action(Decision::Cancel, None);
        // Stored already terminal, as after a timeout.
        state.store.create(&task).await.unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/tasks/{}/action", task.id))
            .header("content-type", "application/json")
            .body(Body::from(json!({"action": "approve"}).to_string()))
            .unwrap();
        let (status, value) = send(app(state.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], json!(true));

        let reloaded = state.store.get(task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Failed);
        assert_eq!(reloaded.action_taken, Some(Decision::Cancel));
    }
}
