//! JSON HTTP API
//!
//! hyper http1, one task per connection. Request bodies are collected with a
//! size limit, then dispatched by `route`, which tests call directly.
//!
//! Routes:
//! - POST   /api/detection       raw image body -> UploadOutcome
//! - GET    /api/gate_status     {"is_open": bool}
//! - POST   /api/trigger_gate    (basic auth) manual open
//! - GET    /api/logs?limit=N    recent access log, newest first
//! - GET    /api/employees       employees with plates
//! - POST   /api/employees       (basic auth) register
//! - DELETE /api/employees/{id}  (basic auth) remove
//! - GET    /uploads/{name}      stored artifact
//! - GET    /metrics, /health

use crate::domain::error::RegistryError;
use crate::domain::types::{EmployeeId, NewEmployee};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::artifacts::{content_type_for, ArtifactStore};
use crate::io::prometheus::format_prometheus_metrics;
use crate::io::registry::Registry;
use crate::services::checkpoint::Checkpoint;
use crate::services::gate::GateStateMachine;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DEFAULT_LOG_LIMIT: usize = 20;
const MAX_LOG_LIMIT: usize = 1000;

/// Operator credentials for privileged routes
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Check an `Authorization: Basic ...` header
    fn matches(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, pass)) => user == self.username && pass == self.password,
            None => false,
        }
    }
}

/// Everything the handlers need, shared across connections
pub struct ApiState {
    pub checkpoint: Arc<Checkpoint>,
    pub registry: Arc<dyn Registry>,
    pub gate: GateStateMachine,
    pub artifacts: ArtifactStore,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
    pub credentials: Credentials,
    pub max_upload_bytes: usize,
}

impl ApiState {
    pub fn new(
        config: &Config,
        checkpoint: Arc<Checkpoint>,
        registry: Arc<dyn Registry>,
        gate: GateStateMachine,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            artifacts: checkpoint.pipeline().artifacts().clone(),
            checkpoint,
            registry,
            gate,
            metrics,
            site_id: config.site_id().to_string(),
            credentials: Credentials {
                username: config.auth_username().to_string(),
                password: config.auth_password().to_string(),
            },
            max_upload_bytes: config.max_upload_bytes(),
        }
    }
}

/// A request with its body already collected
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path.to_string(), None),
        };
        Self { method, path, query, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn with_body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = body.into();
        self
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let token = BASE64.encode(format!("{username}:{password}"));
        if let Ok(value) = HeaderValue::from_str(&format!("Basic {token}")) {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }

    fn query_param(&self, key: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then_some(v)
        })
    }
}

type ApiResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> ApiResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "json_encode_failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "internal error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    json_response(status, &json!({ "status": "error", "message": message }))
}

fn unauthorized() -> ApiResponse {
    let mut response = error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"plate-gate\""));
    response
}

fn registry_error_response(e: &RegistryError) -> ApiResponse {
    match e {
        RegistryError::Unavailable(_) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Registry unavailable")
        }
        RegistryError::Conflict(msg) => error_response(StatusCode::CONFLICT, msg),
        RegistryError::NotFound(msg) => error_response(StatusCode::NOT_FOUND, msg),
    }
}

/// Dispatch one request
pub async fn route(state: &ApiState, req: ApiRequest) -> ApiResponse {
    let response = match (&req.method, req.path.as_str()) {
        (&Method::POST, "/api/detection") => handle_detection(state, &req).await,
        (&Method::GET, "/api/gate_status") => {
            json_response(StatusCode::OK, &json!({ "is_open": state.gate.status() }))
        }
        (&Method::POST, "/api/trigger_gate") => handle_trigger_gate(state, &req),
        (&Method::GET, "/api/logs") => handle_logs(state, &req).await,
        (&Method::GET, "/api/employees") => match state.registry.list_employees_with_plates().await
        {
            Ok(employees) => json_response(StatusCode::OK, &employees),
            Err(e) => registry_error_response(&e),
        },
        (&Method::POST, "/api/employees") => handle_add_employee(state, &req).await,
        (&Method::DELETE, path) if path.starts_with("/api/employees/") => {
            handle_delete_employee(state, &req, &path["/api/employees/".len()..]).await
        }
        (&Method::GET, path) if path.starts_with("/uploads/") => {
            handle_artifact(state, &path["/uploads/".len()..]).await
        }
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&state.metrics, &state.site_id),
        ),
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => error_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    debug!(
        method = %req.method,
        path = %req.path,
        status = %response.status().as_u16(),
        "http_request"
    );
    response
}

fn is_image_upload(headers: &HeaderMap) -> bool {
    match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        // Let the decoder decide for untyped bodies
        None => true,
        Some(ct) => {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            matches!(mime.as_str(), "image/jpeg" | "image/jpg" | "image/png" | "application/octet-stream")
        }
    }
}

async fn handle_detection(state: &ApiState, req: &ApiRequest) -> ApiResponse {
    if !is_image_upload(&req.headers) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected an image/jpeg or image/png body",
        );
    }

    match state.checkpoint.process_upload(req.body.clone()).await {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(e) => {
            error!(error = %e, "upload_registry_error");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &json!({ "status": "ERROR", "message": "Registry unavailable" }),
            )
        }
    }
}

fn handle_trigger_gate(state: &ApiState, req: &ApiRequest) -> ApiResponse {
    if !state.credentials.matches(&req.headers) {
        warn!("manual_gate_trigger_unauthorized");
        let mut response = json_response(StatusCode::UNAUTHORIZED, &json!({ "status": "error" }));
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"plate-gate\""));
        return response;
    }

    let generation = state.gate.trigger();
    info!(generation = %generation, "manual_gate_open");
    json_response(StatusCode::OK, &json!({ "status": "opened" }))
}

async fn handle_logs(state: &ApiState, req: &ApiRequest) -> ApiResponse {
    let limit = req
        .query_param("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .min(MAX_LOG_LIMIT);

    match state.registry.list_recent_logs(limit).await {
        Ok(logs) => json_response(StatusCode::OK, &logs),
        Err(e) => registry_error_response(&e),
    }
}

async fn handle_add_employee(state: &ApiState, req: &ApiRequest) -> ApiResponse {
    if !state.credentials.matches(&req.headers) {
        return unauthorized();
    }

    let employee: NewEmployee = match serde_json::from_slice(&req.body) {
        Ok(employee) => employee,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("invalid body: {e}")),
    };
    if employee.name.trim().is_empty() || employee.position.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name and position are required");
    }

    match state.registry.add_employee(employee).await {
        Ok(created) => json_response(StatusCode::CREATED, &created),
        Err(e) => registry_error_response(&e),
    }
}

async fn handle_delete_employee(state: &ApiState, req: &ApiRequest, raw_id: &str) -> ApiResponse {
    if !state.credentials.matches(&req.headers) {
        return unauthorized();
    }

    let Ok(id) = raw_id.parse::<i64>() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid employee id");
    };

    match state.registry.delete_employee(EmployeeId(id)).await {
        Ok(()) => json_response(StatusCode::OK, &json!({ "status": "deleted", "id": id })),
        Err(e) => registry_error_response(&e),
    }
}

async fn handle_artifact(state: &ApiState, name: &str) -> ApiResponse {
    if state.artifacts.path_for(name).is_none() {
        return error_response(StatusCode::BAD_REQUEST, "invalid artifact name");
    }

    match state.artifacts.read(name).await {
        Ok(Some(bytes)) => respond(StatusCode::OK, content_type_for(name), bytes),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Not Found"),
        Err(e) => {
            error!(error = %format!("{e:#}"), "artifact_read_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "artifact read failed")
        }
    }
}

/// Collect the body under the size limit, then route
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<ApiResponse, Infallible> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, state.max_upload_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                warn!(limit = %state.max_upload_bytes, "request_body_too_large");
                return Ok(error_response(StatusCode::PAYLOAD_TOO_LARGE, "Upload too large"));
            }
            warn!(error = %e, "request_body_read_failed");
            return Ok(error_response(StatusCode::BAD_REQUEST, "Failed to read request body"));
        }
    };

    let api_request = ApiRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    };
    Ok(route(&state, api_request).await)
}

/// Serve on an already bound listener until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind and serve the API
pub async fn start_api_server(
    addr: SocketAddr,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, site = %state.site_id, "http_server_started");
    serve(listener, state, shutdown).await
}
