//! Axum route handlers for the crewforge HTTP server.
//!
//! # Routes
//!
//! - `GET    /health`                  - liveness probe
//! - `GET    /tools`                   - tools visible to the workspace
//! - `POST   /tools/custom`            - register a webhook-backed tool
//! - `DELETE /tools/custom/:id`        - delete a custom tool
//! - `POST   /crews/generate`          - synthesize a crew from a prompt
//! - `POST   /crews/refine`            - revise a crew with feedback
//! - `POST   /crews`                   - save a crew
//! - `GET    /crews/:id`               - fetch a saved crew
//! - `POST   /executions`              - start an execution
//! - `GET    /executions`              - list executions
//! - `GET    /executions/:id`          - fetch an execution
//! - `POST   /executions/:id/pause`    - pause at the next task boundary
//! - `POST   /executions/:id/resume`   - resume a paused execution
//! - `POST   /executions/:id/cancel`   - cancel at the next task boundary
//! - `POST   /executions/:id/recover`  - re-attach a worker after a restart
//! - `GET    /executions/:id/stream`   - progress events (Server-Sent Events)
//!
//! Every route except `/health` is scoped by the `x-workspace-id` and
//! `x-owner-id` headers. The caller is trusted to have authenticated them.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::crew::Crew;
use crate::errors::EngineError;
use crate::execution::ExecutionStatus;
use crate::llms::ChatMessage;
use crate::service::CrewService;
use crate::store::ExecutionFilter;
use crate::tools::CustomToolSpec;

pub const WORKSPACE_HEADER: &str = "x-workspace-id";
pub const OWNER_HEADER: &str = "x-owner-id";

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CrewService>,
}

impl AppState {
    pub fn new(service: CrewService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/custom", post(register_tool_handler))
        .route("/tools/custom/:id", delete(delete_tool_handler))
        .route("/crews/generate", post(generate_crew_handler))
        .route("/crews/refine", post(refine_crew_handler))
        .route("/crews", post(save_crew_handler))
        .route("/crews/:id", get(get_crew_handler))
        .route(
            "/executions",
            post(start_execution_handler).get(list_executions_handler),
        )
        .route("/executions/:id", get(get_execution_handler))
        .route("/executions/:id/pause", post(pause_handler))
        .route("/executions/:id/resume", post(resume_handler))
        .route("/executions/:id/cancel", post(cancel_handler))
        .route("/executions/:id/recover", post(recover_handler))
        .route("/executions/:id/stream", get(stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors and tenant scope
// ---------------------------------------------------------------------------

/// [`EngineError`] rendered as `{"error": message, "kind": tag}`.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            "validation" | "invalid_request" => StatusCode::BAD_REQUEST,
            "crew_synthesis" => StatusCode::UNPROCESSABLE_ENTITY,
            "not_found" => StatusCode::NOT_FOUND,
            "already_running" | "execution_terminal" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        let body = json!({ "error": self.0.to_string(), "kind": self.0.kind() });
        (status, Json(body)).into_response()
    }
}

/// Workspace and owner taken from request headers.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub workspace_id: String,
    pub owner_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ApiError(EngineError::InvalidRequest(format!("missing {} header", name)))
                })
        };
        Ok(Tenant {
            workspace_id: header(WORKSPACE_HEADER)?,
            owner_id: header(OWNER_HEADER)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterToolRequest {
    #[serde(flatten)]
    spec: CustomToolSpec,
    webhook_url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateCrewRequest {
    prompt: String,
    #[serde(default)]
    conversation_history: Vec<ChatMessage>,
}

/// A crew given inline or by id.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrewRef {
    #[serde(default)]
    crew: Option<Crew>,
    #[serde(default)]
    crew_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefineCrewRequest {
    #[serde(flatten)]
    target: CrewRef,
    feedback: String,
    #[serde(default)]
    conversation_history: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionRequest {
    #[serde(flatten)]
    target: CrewRef,
    #[serde(default)]
    inputs: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListExecutionsQuery {
    #[serde(default)]
    status: Option<ExecutionStatus>,
    #[serde(default)]
    crew_id: Option<String>,
}

/// Resolve an inline crew or load a saved one of the tenant's workspace.
async fn resolve_crew(service: &CrewService, tenant: &Tenant, target: CrewRef) -> Result<Crew, ApiError> {
    match target {
        CrewRef { crew: Some(crew), .. } => Ok(crew),
        CrewRef { crew_id: Some(id), .. } => {
            let crew = service.get_crew(&id).await?;
            if crew.workspace_id != tenant.workspace_id {
                return Err(EngineError::NotFound { kind: "crew", id }.into());
            }
            Ok(crew)
        }
        _ => Err(EngineError::InvalidRequest("either crew or crewId is required".into()).into()),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health - liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "crewforge",
    }))
}

async fn list_tools_handler(State(state): State<AppState>, tenant: Tenant) -> impl IntoResponse {
    Json(json!({ "tools": state.service.list_tools(&tenant.workspace_id) }))
}

async fn register_tool_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(body): Json<RegisterToolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tool = state.service.register_webhook_tool(
        &tenant.workspace_id,
        body.spec,
        &body.webhook_url,
        body.headers,
    )?;
    Ok((StatusCode::CREATED, Json(tool)))
}

async fn delete_tool_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_custom_tool(&tenant.workspace_id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /crews/generate - run the generation pipeline. The crew is not saved.
async fn generate_crew_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(body): Json<GenerateCrewRequest>,
) -> Result<Json<Crew>, ApiError> {
    let crew = state
        .service
        .generate_crew(
            &body.prompt,
            &tenant.workspace_id,
            &tenant.owner_id,
            body.conversation_history,
        )
        .await?;
    Ok(Json(crew))
}

async fn refine_crew_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(body): Json<RefineCrewRequest>,
) -> Result<Json<Crew>, ApiError> {
    let crew = resolve_crew(&state.service, &tenant, body.target).await?;
    let refined = state
        .service
        .refine_crew(&crew, &body.feedback, &body.conversation_history)
        .await?;
    Ok(Json(refined))
}

async fn save_crew_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(crew): Json<Crew>,
) -> Result<impl IntoResponse, ApiError> {
    let crew_id = state
        .service
        .save_crew(&crew, &tenant.workspace_id, &tenant.owner_id)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "crewId": crew_id }))))
}

async fn get_crew_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<Json<Crew>, ApiError> {
    let crew = resolve_crew(
        &state.service,
        &tenant,
        CrewRef {
            crew: None,
            crew_id: Some(id),
        },
    )
    .await?;
    Ok(Json(crew))
}

async fn start_execution_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(body): Json<StartExecutionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let crew = resolve_crew(&state.service, &tenant, body.target).await?;
    let started = state
        .service
        .start_execution(crew, &tenant.workspace_id, &tenant.owner_id, body.inputs)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

async fn list_executions_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ExecutionFilter {
        workspace_id: Some(tenant.workspace_id),
        status: query.status,
        crew_id: query.crew_id,
    };
    let executions = state.service.list_executions(&filter).await?;
    Ok(Json(json!({ "executions": executions })))
}

async fn get_execution_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let execution = state.service.get_execution(&id, &tenant.workspace_id).await?;
    Ok(Json(execution))
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Pause,
    Resume,
    Cancel,
}

async fn control_execution(
    state: &AppState,
    tenant: &Tenant,
    id: &str,
    control: Control,
) -> Result<Json<Value>, ApiError> {
    let execution = state.service.get_execution(id, &tenant.workspace_id).await?;
    let accepted = match control {
        Control::Pause => state.service.pause_execution(id),
        Control::Resume => state.service.resume_execution(id),
        Control::Cancel => state.service.cancel_execution(id),
    };
    Ok(Json(json!({
        "executionId": id,
        "accepted": accepted,
        "status": execution.status,
    })))
}

async fn pause_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    control_execution(&state, &tenant, &id, Control::Pause).await
}

async fn resume_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    control_execution(&state, &tenant, &id, Control::Resume).await
}

async fn cancel_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    control_execution(&state, &tenant, &id, Control::Cancel).await
}

async fn recover_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.get_execution(&id, &tenant.workspace_id).await?;
    let started = state.service.recover_execution(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// GET /executions/:id/stream - one SSE event per ProgressEvent, named after
/// its type. The stream closes after `complete` or `error`.
async fn stream_handler(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.service.get_execution(&id, &tenant.workspace_id).await?;
    let keep_alive = state.service.config().progress.heartbeat_interval();

    let events = state.service.subscribe_progress(&id).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.kind.as_str()).data(payload))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(keep_alive)
            .text("keepalive"),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::config::EngineConfig;
    use crate::execution::Execution;
    use crate::llms::ScriptedLLM;
    use crate::store::{ExecutionStore, InMemoryExecutionStore};

    fn app_with(replies: &[&str]) -> Router {
        let llm = Arc::new(ScriptedLLM::new(replies.iter().map(|r| r.to_string()).collect()));
        let mut config = EngineConfig::default();
        config.executor.retry_base_delay_ms = 0;
        config.progress.poll_interval_ms = 20;
        let service = CrewService::new(config, llm, Arc::new(InMemoryExecutionStore::new()));
        app_router(AppState::new(service))
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(WORKSPACE_HEADER, "ws-1")
            .header(OWNER_HEADER, "user-1");
        match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn crew_json() -> Value {
        serde_json::to_value(crate::crew::tests::sample_crew()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = app_with(&[]);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
        assert_eq!(json["service"], "crewforge");
    }

    #[tokio::test]
    async fn test_missing_workspace_header_rejected() {
        let app = app_with(&[]);
        let request = Request::builder().uri("/tools").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["kind"], "invalid_request");
        assert!(json["error"].as_str().unwrap().contains(WORKSPACE_HEADER));
    }

    #[tokio::test]
    async fn test_list_tools() {
        let app = app_with(&[]);
        let response = app.oneshot(request("GET", "/tools", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["tools"].as_array().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_empty_crew_is_bad_request() {
        let app = app_with(&[]);
        let mut crew = crew_json();
        crew["tasks"] = json!([]);
        let response = app
            .oneshot(request("POST", "/executions", Some(json!({ "crew": crew }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "validation");
    }

    #[tokio::test]
    async fn test_unknown_execution_is_not_found() {
        let app = app_with(&[]);
        let response = app
            .oneshot(request("POST", "/executions/nope/pause", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_unparseable_synthesis_is_unprocessable() {
        let app = app_with(&["{}", "nonsense", "still nonsense"]);
        let response = app
            .oneshot(request(
                "POST",
                "/crews/generate",
                Some(json!({ "prompt": "Grow my newsletter" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["kind"], "crew_synthesis");
    }

    #[tokio::test]
    async fn test_save_then_run_and_stream() {
        let app = app_with(&["brief", "ads", "email"]);

        let response = app
            .clone()
            .oneshot(request("POST", "/crews", Some(crew_json())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let crew_id = json_body(response).await["crewId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/executions",
                Some(json!({ "crewId": crew_id, "inputs": { "product": "Acme" } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let execution_id = json_body(response).await["executionId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/executions/{}/stream", execution_id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("event: connected"));
        assert!(text.contains("event: complete"));

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/executions/{}", execution_id), None))
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["status"], "completed");
        assert_eq!(json["taskResults"]["t3"], "email");
        assert_eq!(json["result"], "email");

        let response = app
            .oneshot(request("GET", "/executions?status=completed", None))
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["executions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crew_from_other_workspace_hidden() {
        let app = app_with(&[]);
        let response = app
            .clone()
            .oneshot(request("POST", "/crews", Some(crew_json())))
            .await
            .unwrap();
        let crew_id = json_body(response).await["crewId"].as_str().unwrap().to_string();

        let foreign = Request::builder()
            .uri(format!("/crews/{}", crew_id))
            .header(WORKSPACE_HEADER, "ws-2")
            .header(OWNER_HEADER, "user-2")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(foreign).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_frames_follow_configured_heartbeat() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let mut exec = Execution::new("crew-1", "ws-1", "user-1", Map::new());
        store.create_execution(&exec).await.unwrap();
        exec.transition(ExecutionStatus::Running).unwrap();
        store.update_execution(&exec).await.unwrap();

        let mut config = EngineConfig::default();
        config.progress.poll_interval_ms = 60_000;
        config.progress.heartbeat_interval_ms = 50;
        let service = CrewService::new(config, Arc::new(ScriptedLLM::new(vec![])), store);
        let app = app_router(AppState::new(service));

        let response = app
            .oneshot(request("GET", &format!("/executions/{}/stream", exec.id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut frames = response.into_body().into_data_stream();
        let mut text = String::new();
        for _ in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
                .await
                .expect("frame within the heartbeat window")
                .unwrap()
                .unwrap();
            text.push_str(&String::from_utf8(frame.to_vec()).unwrap());
        }
        assert!(text.starts_with("event: connected"));
        assert!(text.contains("event: heartbeat") || text.contains(": keepalive"));
    }
}
