//! HTTP request handlers

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::core::{AppState, Error};
use crate::csrf::{CsrfStats, IssuedToken, TokenStore};
use crate::system::{export, MetricsStore};

/// Header carrying the CSRF token on mutating requests
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Cookie carrying the CSRF token when the cookie fallback is on
pub const CSRF_COOKIE: &str = "csrf-token";

/// Query parameter accepted on GET requests
pub const CSRF_QUERY_PARAM: &str = "csrf";

/// Header naming the caller's session for session-bound tokens
pub const SESSION_HEADER: &str = "x-session-id";

const NO_STORE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

// Response types
/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the operation was successful
    pub success: bool,
    /// Response data (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error body for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Error message
    pub error: String,
    /// Optional machine-readable details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Rejection type shared by all handlers
pub type HandlerError = (StatusCode, Json<ErrorResponse>);

impl<T> ApiResponse<T> {
    /// Successful response with data
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Successful response with data and message
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

impl ApiResponse<()> {
    /// Successful response carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl ErrorResponse {
    /// Error body without details
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
        }
    }

    /// Error body with details
    pub fn with_details(error: impl Into<String>, details: Value) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: Some(details),
        }
    }
}

/// Map a crate error to a status code and body.
///
/// Server-side failures are logged and answered with a generic message.
pub fn error_response(err: Error) -> HandlerError {
    match err {
        Error::Csrf(e) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::with_details(
                e.to_string(),
                json!({ "reason": e.reason() }),
            )),
        ),
        Error::NotFound(msg) => (StatusCode::NOT_FOUND, Json(ErrorResponse::new(msg))),
        Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))),
        other => {
            error!(error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
        }
    }
}

/// JSON body extractor that answers malformed input with an [`ErrorResponse`]
pub struct JsonRequest<T>(pub T);

impl<S, T> FromRequest<S> for JsonRequest<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = HandlerError;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonRequest(value)),
            Err(rejection) => {
                let message = match rejection {
                    JsonRejection::JsonDataError(_) => "Invalid JSON data",
                    JsonRejection::JsonSyntaxError(_) => "Malformed JSON",
                    JsonRejection::MissingJsonContentType(_) => {
                        "Missing or invalid Content-Type header. Expected 'application/json'"
                    }
                    JsonRejection::BytesRejection(_) => "Failed to read request body",
                    _ => "Invalid JSON request",
                };
                warn!("JSON parsing error: {}", message);
                Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))))
            }
        }
    }
}

/// Debug snapshot of the token store
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfDebugResponse {
    /// Entries in the store
    pub token_count: usize,
    /// Time of the snapshot
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Deployment environment
    pub environment: String,
    /// Detailed counts
    pub stats: CsrfStats,
}

/// Result of clearing the token store
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    /// Always true
    pub success: bool,
    /// Human-readable message
    pub message: String,
    /// Tokens removed
    pub cleared: usize,
}

/// Query of the performance endpoint
#[derive(Debug, Default, Deserialize)]
pub struct PerformanceQuery {
    /// `json` (default) or `prometheus`
    pub format: Option<String>,
    /// Restrict the JSON output to one operation
    pub operation: Option<String>,
}

/// Body of `POST /api/performance`
#[derive(Debug, Deserialize)]
pub struct PerformanceAction {
    /// Only `reset` is supported
    pub action: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Uptime, e.g. `"42s"`
    pub uptime: String,
    /// Crate version
    pub version: String,
}

/// System information response
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    /// Service name
    pub name: String,
    /// Crate version
    pub version: String,
    /// Deployment environment
    pub environment: String,
    /// Store backend in use
    pub store: String,
    /// Features served
    pub capabilities: Vec<String>,
}

/// `GET /api/csrf-token`: issue a token
///
/// When the request names a session in `X-Session-Id` the token is bound to
/// it. The response must never be cached.
pub async fn issue_csrf_token<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty());

    let issued: IssuedToken = crate::time_operation!(state.monitor, "csrf.issue", {
        match session {
            Some(session) => state.csrf.issue_for_session(session).await,
            None => state.csrf.issue().await,
        }
    })
    .map_err(error_response)?;

    let mut response = Json(&issued).into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));

    if state.config.csrf.cookie_fallback {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; SameSite=Strict",
            CSRF_COOKIE, issued.token, issued.expires_in
        );
        if state.config.is_production() {
            cookie.push_str("; Secure");
        }
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| error_response(Error::internal(format!("invalid cookie header: {}", e))))?;
        headers.insert(SET_COOKIE, value);
    }

    Ok(response)
}

/// `GET /api/csrf-debug`: token store diagnostics
pub async fn csrf_debug<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
) -> Result<Json<CsrfDebugResponse>, HandlerError> {
    let stats = state.csrf.stats().await.map_err(error_response)?;

    Ok(Json(CsrfDebugResponse {
        token_count: stats.total_tokens,
        timestamp: crate::core::utils::now(),
        environment: state.config.server.environment.clone(),
        stats,
    }))
}

/// `DELETE /api/csrf-debug`: remove every token
pub async fn clear_csrf_tokens<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
) -> Result<Json<ClearResponse>, HandlerError> {
    let cleared = state.csrf.clear().await.map_err(error_response)?;

    Ok(Json(ClearResponse {
        success: true,
        message: format!("Cleared {} CSRF tokens", cleared),
        cleared,
    }))
}

/// `GET /api/performance`: report, single aggregate or Prometheus text
pub async fn performance_report<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Response, HandlerError> {
    match query.format.as_deref().unwrap_or("json") {
        "json" => {}
        "prometheus" => {
            if !state.config.metrics.enable_prometheus {
                return Err(error_response(Error::not_found("prometheus export is disabled")));
            }
            if let Some(operation) = query.operation.as_deref() {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::with_details(
                        "Prometheus export covers every operation; drop the operation filter",
                        json!({ "format": "prometheus", "operation": operation }),
                    )),
                ));
            }
            let text = state.monitor.export_text().await.map_err(error_response)?;
            return Ok(([(CONTENT_TYPE, export::CONTENT_TYPE)], text).into_response());
        }
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_details(
                    "Unsupported format",
                    json!({ "format": other, "supported": ["json", "prometheus"] }),
                )),
            ))
        }
    }

    if let Some(operation) = query.operation.as_deref() {
        let aggregate = state
            .monitor
            .get_metrics(operation)
            .await
            .map_err(error_response)?;
        return Ok(Json(ApiResponse::success(json!({
            "operation": operation,
            "metrics": aggregate,
        })))
        .into_response());
    }

    let report = state.monitor.get_full_report().await.map_err(error_response)?;
    Ok(Json(ApiResponse::success(report)).into_response())
}

/// `POST /api/performance`: maintenance actions
pub async fn performance_action<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
    JsonRequest(body): JsonRequest<PerformanceAction>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    match body.action.as_str() {
        "reset" => {
            state.monitor.reset().await.map_err(error_response)?;
            info!("performance metrics reset via API");
            Ok(Json(ApiResponse::message("Performance metrics reset")))
        }
        other => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_details(
                "Unknown action",
                json!({ "action": other, "supported": ["reset"] }),
            )),
        )),
    }
}

/// Health check endpoint
pub async fn health_check<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
) -> Json<HealthResponse> {
    let uptime = (crate::core::utils::now() - state.started_at).num_seconds().max(0);
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: format!("{}s", uptime),
        version: crate::VERSION.to_string(),
    })
}

/// System information endpoint
pub async fn system_info<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
) -> Json<InfoResponse> {
    let store = match state.config.storage.backend {
        crate::core::config::StoreBackend::Memory => "memory",
        crate::core::config::StoreBackend::Redis => "redis",
    };

    Json(InfoResponse {
        name: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        environment: state.config.server.environment.clone(),
        store: store.to_string(),
        capabilities: vec!["csrf".to_string(), "performance".to_string()],
    })
}

/// Root API endpoint
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "service": crate::NAME,
        "version": crate::VERSION,
        "status": "operational",
        "endpoints": {
            "csrfToken": "GET /api/csrf-token",
            "csrfDebug": "GET|DELETE /api/csrf-debug",
            "performance": "GET|POST /api/performance",
            "health": "GET /health",
            "info": "GET /info"
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CsrfError;

    #[test]
    fn csrf_errors_map_to_forbidden_with_reason() {
        let (status, Json(body)) = error_response(CsrfError::Expired.into());
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.success);
        assert_eq!(body.error, "CSRF token expired");
        assert_eq!(body.details.unwrap()["reason"], "expired");
    }

    #[test]
    fn lookup_and_input_errors_map_to_4xx() {
        assert_eq!(error_response(Error::not_found("op")).0, StatusCode::NOT_FOUND);
        assert_eq!(error_response(Error::invalid_input("bad")).0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_errors_hide_details() {
        let (status, Json(body)) = error_response(Error::internal("secret detail"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_none());
    }
}
