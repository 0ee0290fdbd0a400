//! Agent-facing webhook ingress.
//!
//! All hook traffic lands on `/webhook/{slug}`; validation happens once here
//! and the coordinator only ever sees well-formed events. The event kind in
//! the JSON body wins over the URL slug, so misrouted but self-describing
//! payloads are still handled correctly. A blocking variant of every route
//! lives under `/webhook/blocking/{slug}` for operators who want
//! approval-in-the-loop.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use tollgate_protocol::{EventKind, HookEvent};

use crate::state::AppState;

/// Request bodies above this are rejected before parsing.
const MAX_BODY_BYTES: usize = 1024 * 1024;
/// Tool command strings above this are rejected.
const MAX_COMMAND_CHARS: usize = 5000;
/// Path-shaped fields above this are logged as suspicious.
const MAX_PATH_CHARS: usize = 500;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhook/blocking/{slug}", post(blocking_webhook))
        .route("/webhook/{slug}", post(immediate_webhook))
}

/// POST `/webhook/{slug}` — validate, then respond immediately.
async fn immediate_webhook(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Body,
) -> Response {
    let event = match read_event(&slug, body).await {
        Ok(event) => event,
        Err(resp) => return resp,
    };

    let response = state.coordinator.record_immediate(event).await;
    Json(response).into_response()
}

/// POST `/webhook/blocking/{slug}` — validate, then hold the call open until
/// the operator decides.
///
/// The wait runs in a spawned task so a client disconnect (this handler
/// being dropped) releases `cancel_tx` and shows up inside the coordinator
/// as a cancellation instead of silently abandoning the pending task.
async fn blocking_webhook(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Body,
) -> Response {
    let event = match read_event(&slug, body).await {
        Ok(event) => event,
        Err(resp) => return resp,
    };

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let coordinator = state.coordinator.clone();
    let wait = tokio::spawn(async move {
        coordinator
            .await_decision(event, async move {
                let _ = cancel_rx.await;
            })
            .await
    });
    let _cancel_on_drop = cancel_tx;

    match wait.await {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(e)) => {
            error!(
                component = "webhook",
                event = "webhook.blocking_failed",
                error = %e,
                "Blocking webhook could not be processed"
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process blocking webhook",
            )
        }
        Err(e) => {
            error!(
                component = "webhook",
                event = "webhook.wait_task_panicked",
                error = %e,
                "Blocking webhook wait task failed"
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process blocking webhook",
            )
        }
    }
}

/// Read and validate the request body into a [`HookEvent`].
async fn read_event(slug: &str, body: Body) -> Result<HookEvent, Response> {
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!(
                component = "webhook",
                event = "webhook.body_too_large",
                slug = slug,
                "Rejecting oversized webhook body"
            );
            return Err(error_response(StatusCode::BAD_REQUEST, "size_limit"));
        }
    };
    parse_event(slug, &bytes)
}

/// Resolve the event kind (body wins over slug) and deserialize.
fn parse_event(slug: &str, bytes: &Bytes) -> Result<HookEvent, Response> {
    let slug_kind = EventKind::from_slug(slug);

    // Agents sometimes forward empty stdin; treat it as an empty event of
    // the slug's kind.
    if bytes.is_empty() {
        let kind = slug_kind.unwrap_or(EventKind::PreToolUse);
        return Ok(HookEvent::empty(kind));
    }

    let mut value: Value = serde_json::from_slice(bytes).map_err(|e| {
        warn!(
            component = "webhook",
            event = "webhook.invalid_json",
            slug = slug,
            error = %e,
            "Rejecting unparseable webhook body"
        );
        error_response(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}"))
    })?;

    if !value.is_object() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "webhook body must be a JSON object",
        ));
    }

    let kind = match value.get("hook_event_name").and_then(Value::as_str) {
        Some(name) => EventKind::from_wire(name).ok_or_else(|| {
            warn!(
                component = "webhook",
                event = "webhook.unknown_kind",
                slug = slug,
                hook_event_name = name,
                "Rejecting unknown hook event kind"
            );
            error_response(
                StatusCode::BAD_REQUEST,
                &format!("unknown hook event kind: {name}"),
            )
        })?,
        None => match slug_kind {
            Some(kind) => kind,
            None => {
                info!(
                    component = "webhook",
                    event = "webhook.unknown_slug",
                    slug = slug,
                    "Unknown webhook slug with no body kind; treating as PreToolUse"
                );
                EventKind::PreToolUse
            }
        },
    };

    validate_payload(&value)?;

    // Stamp the resolved kind so the tagged deserialize sees it even when
    // the body omitted `hook_event_name`.
    value["hook_event_name"] = Value::String(kind.as_wire().to_string());
    serde_json::from_value::<HookEvent>(value).map_err(|e| {
        warn!(
            component = "webhook",
            event = "webhook.bad_payload",
            slug = slug,
            error = %e,
            "Rejecting malformed webhook payload"
        );
        error_response(StatusCode::BAD_REQUEST, &format!("invalid payload: {e}"))
    })
}

/// Field-level checks. Only the command length is a hard failure; the rest
/// are logged and accepted.
fn validate_payload(value: &Value) -> Result<(), Response> {
    if let Some(command) = value
        .pointer("/tool_input/command")
        .and_then(Value::as_str)
    {
        let len = command.chars().count();
        if len > MAX_COMMAND_CHARS {
            warn!(
                component = "webhook",
                event = "webhook.command_too_long",
                length = len,
                "Rejecting oversized tool command"
            );
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                &format!("command too long: {len} characters (max {MAX_COMMAND_CHARS})"),
            ));
        }
    }

    if let Some(session_id) = value.get("session_id").and_then(Value::as_str) {
        if !session_id.is_empty() && !is_uuid_shaped(session_id) {
            warn!(
                component = "webhook",
                event = "webhook.odd_session_id",
                session_id = session_id,
                "Session id is not UUID-shaped"
            );
        }
    }

    for field in ["cwd", "transcript_path"] {
        if let Some(path) = value.get(field).and_then(Value::as_str) {
            if !is_safe_path(path) {
                warn!(
                    component = "webhook",
                    event = "webhook.suspicious_path",
                    field = field,
                    "Path-shaped field contains control characters or is too long"
                );
            }
        }
    }

    Ok(())
}

/// 128-bit hex-with-dashes form: 8-4-4-4-12.
fn is_uuid_shaped(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

fn is_safe_path(path: &str) -> bool {
    path.len() <= MAX_PATH_CHARS && !path.contains(['\0', '\r', '\n'])
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::Request;
    use tower::ServiceExt;

    use tollgate_protocol::TaskStatus;

    use crate::coordinator::{CoordinatorConfig, DecisionCoordinator};
    use crate::store::tests::test_store;
    use crate::store::TaskStore;

    fn test_state(timeout: Duration) -> AppState {
        let store = Arc::new(test_store());
        let coordinator = Arc::new(DecisionCoordinator::new(
            store.clone(),
            None,
            CoordinatorConfig {
                decision_timeout: timeout,
                ..Default::default()
            },
        ));
        AppState::new(coordinator, store)
    }

    fn app(state: AppState) -> Router {
        routes().with_state(state)
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn immediate_post_tool_use_suppresses_output() {
        let state = test_state(Duration::from_secs(1));
        let body = r#"{"hook_event_name":"PostToolUse","session_id":"s1","tool_name":"Bash"}"#;
        let (status, value) = post_json(app(state), "/webhook/post-tool-use", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            value,
            json!({"continue": true, "stopReason": "", "suppressOutput": true})
        );
    }

    #[tokio::test]
    async fn notification_keeps_output_visible() {
        let state = test_state(Duration::from_secs(1));
        let body = r#"{"hook_event_name":"Notification","message":"needs attention"}"#;
        let (status, value) = post_json(app(state), "/webhook/notification", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["suppressOutput"], json!(false));
    }

    #[tokio::test]
    async fn body_kind_wins_over_slug() {
        let state = test_state(Duration::from_secs(1));
        let store = state.store.clone();

        // Posted to the pre-tool-use URL but self-describing as Notification.
        let body = r#"{"hook_event_name":"Notification","message":"hi"}"#;
        let (status, value) = post_json(app(state), "/webhook/pre-tool-use", body).await;

        assert_eq!(status, StatusCode::OK);
        // Notification response shape, not the tool-use one.
        assert_eq!(value["suppressOutput"], json!(false));

        let tasks = store.list(Default::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].event_kind, EventKind::Notification);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_without_a_task() {
        let state = test_state(Duration::from_secs(1));
        let store = state.store.clone();

        let big = format!(
            r#"{{"hook_event_name":"PreToolUse","session_id":"{}"}}"#,
            "x".repeat(MAX_BODY_BYTES)
        );
        let (status, value) = post_json(app(state), "/webhook/pre-tool-use", &big).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"], json!("size_limit"));
        assert!(store.list(Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_command_is_rejected_without_a_task() {
        let state = test_state(Duration::from_secs(1));
        let store = state.store.clone();

        let body = json!({
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "y".repeat(MAX_COMMAND_CHARS + 1)}
        })
        .to_string();
        let (status, value) = post_json(app(state), "/webhook/pre-tool-use", &body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["error"].as_str().unwrap().contains("command too long"));
        assert!(store.list(Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let state = test_state(Duration::from_secs(1));
        let (status, value) = post_json(app(state), "/webhook/stop", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["error"].as_str().unwrap().contains("invalid JSON"));
    }

    #[tokio::test]
    async fn unknown_body_kind_is_rejected() {
        let state = test_state(Duration::from_secs(1));
        let body = r#"{"hook_event_name":"FancyNewHook"}"#;
        let (status, value) = post_json(app(state), "/webhook/stop", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["error"]
            .as_str()
            .unwrap()
            .contains("unknown hook event kind"));
    }

    #[tokio::test]
    async fn empty_body_takes_the_slug_kind() {
        let state = test_state(Duration::from_secs(1));
        let store = state.store.clone();
        let (status, value) = post_json(app(state), "/webhook/stop", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["continue"], json!(true));

        let tasks = store.list(Default::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].event_kind, EventKind::Stop);
    }

    #[tokio::test]
    async fn unknown_slug_without_body_kind_defaults_to_pre_tool_use() {
        let state = test_state(Duration::from_secs(1));
        let store = state.store.clone();
        let (status, _) = post_json(app(state), "/webhook/some-new-hook", r#"{"session_id":"s"}"#)
            .await;

        assert_eq!(status, StatusCode::OK);
        let tasks = store.list(Default::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].event_kind, EventKind::PreToolUse);
    }

    #[tokio::test]
    async fn non_post_method_is_rejected() {
        let state = test_state(Duration::from_secs(1));
        let request = Request::builder()
            .method("GET")
            .uri("/webhook/pre-tool-use")
            .body(Body::empty())
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn blocking_route_times_out_with_a_verdict() {
        let state = test_state(Duration::from_millis(50));
        let store = state.store.clone();

        let body = r#"{"hook_event_name":"PreToolUse","tool_name":"Bash","tool_input":{"command":"ls"}}"#;
        let (status, value) = post_json(app(state), "/webhook/blocking/pre-tool-use", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["continue"], json!(false));
        assert!(value["stopReason"]
            .as_str()
            .unwrap()
            .starts_with("User decision timeout after"));

        let tasks = store.list(Default::default()).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn blocking_route_resumes_on_decision() {
        let state = test_state(Duration::from_secs(5));
        let store: Arc<TaskStore> = state.store.clone();
        let coordinator = state.coordinator.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if let Some(task) = store.pending().await.unwrap().first() {
                    if coordinator.has_pending_decision(task.id) {
                        coordinator
                            .deliver_decision(
                                task.id,
                                tollgate_protocol::Decision::Approve,
                                Default::default(),
                            )
                            .await
                            .unwrap();
                        break;
                    }
                }
            }
        });

        let body = r#"{"hook_event_name":"PreToolUse","session_id":"s1","tool_name":"Bash","tool_input":{"command":"ls"}}"#;
        let (status, value) = post_json(app(state), "/webhook/blocking/pre-tool-use", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            value,
            json!({"continue": true, "stopReason": "", "suppressOutput": false})
        );
    }

    #[test]
    fn uuid_shape_check() {
        assert!(is_uuid_shaped("4d5a6b7c-1234-4abc-9def-0123456789ab"));
        assert!(!is_uuid_shaped("not-a-uuid"));
        assert!(!is_uuid_shaped("4d5a6b7c1234-4abc-9def-0123456789ab"));
        assert!(!is_uuid_shaped(""));
    }

    #[test]
    fn path_safety_check() {
        assert!(is_safe_path("/home/dev/project"));
        assert!(!is_safe_path("/tmp/\0evil"));
        assert!(!is_safe_path("/tmp/a\nb"));
        assert!(!is_safe_path(&"x".repeat(MAX_PATH_CHARS + 1)));
    }
}
