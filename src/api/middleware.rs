//! Request middleware: CSRF guard and request timing

use axum::{
    extract::{MatchedPath, Query, Request, State},
    http::{header::COOKIE, HeaderMap, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::debug;

use crate::api::handlers::{error_response, CSRF_COOKIE, CSRF_HEADER, CSRF_QUERY_PARAM, SESSION_HEADER};
use crate::core::AppState;
use crate::csrf::TokenStore;
use crate::system::MetricsStore;

/// Methods that change state and must carry a token
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Find the presented token.
///
/// Order: `X-CSRF-Token` header, then the `csrf-token` cookie (when
/// `cookie_fallback` is on), then the `csrf` query parameter on GET.
/// A blank header falls through to the next source.
pub fn extract_token(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    cookie_fallback: bool,
) -> Option<String> {
    if let Some(value) = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(value.to_string());
    }

    if cookie_fallback {
        if let Some(value) = cookie_value(headers, CSRF_COOKIE) {
            return Some(value);
        }
    }

    if method == Method::GET {
        if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(uri) {
            return params.get(CSRF_QUERY_PARAM).cloned();
        }
    }

    None
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Reject mutating requests that lack a valid token with 403
pub async fn csrf_guard<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if !is_mutating(req.method()) || state.config.csrf.exempt_paths.iter().any(|p| p == path) {
        return next.run(req).await;
    }

    let token = extract_token(
        req.method(),
        req.uri(),
        req.headers(),
        state.config.csrf.cookie_fallback,
    );
    let session = req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match state
        .csrf
        .validate_for_session(token.as_deref(), session.as_deref())
        .await
    {
        Ok(_) => next.run(req).await,
        Err(e) => {
            debug!(method = %req.method(), path = %req.uri().path(), error = %e, "CSRF check failed");
            error_response(e).into_response()
        }
    }
}

/// Record each request as `"<METHOD> <route>"` on the performance monitor
pub async fn record_timing<T: TokenStore, M: MetricsStore>(
    State(state): State<AppState<T, M>>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.metrics.record_requests {
        return next.run(req).await;
    }

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let operation = format!("{} {}", req.method(), route);

    let timer = state.monitor.start_timer(operation);
    let response = next.run(req).await;
    timer.finish_request(response.status().as_u16() < 400).await;

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn header_wins_over_cookie() {
        let h = headers(&[("x-csrf-token", "from-header"), ("cookie", "csrf-token=from-cookie")]);
        let uri: Uri = "/api/x".parse().unwrap();
        assert_eq!(
            extract_token(&Method::POST, &uri, &h, true).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn blank_header_falls_back_to_cookie() {
        let h = headers(&[("x-csrf-token", "  "), ("cookie", "csrf-token=abcdefghijklmnop")]);
        let uri: Uri = "/api/x".parse().unwrap();
        assert_eq!(
            extract_token(&Method::POST, &uri, &h, true).as_deref(),
            Some("abcdefghijklmnop")
        );
        assert_eq!(extract_token(&Method::POST, &uri, &h, false), None);
    }

    #[test]
    fn cookie_is_used_only_with_fallback() {
        let h = headers(&[("cookie", "theme=dark; csrf-token=abc123456789")]);
        let uri: Uri = "/api/x".parse().unwrap();
        assert_eq!(
            extract_token(&Method::POST, &uri, &h, true).as_deref(),
            Some("abc123456789")
        );
        assert_eq!(extract_token(&Method::POST, &uri, &h, false), None);
    }

    #[test]
    fn query_param_only_on_get() {
        let uri: Uri = "/api/x?csrf=querytoken123".parse().unwrap();
        let h = HeaderMap::new();
        assert_eq!(
            extract_token(&Method::GET, &uri, &h, true).as_deref(),
            Some("querytoken123")
        );
        assert_eq!(extract_token(&Method::POST, &uri, &h, true), None);
    }

    #[test]
    fn only_state_changing_methods_are_guarded() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::OPTIONS));
    }
}
