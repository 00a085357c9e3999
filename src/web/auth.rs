//! REST authentication layer
//!
//! Axum middleware that guards every control-plane route, plus the JSON
//! error body shared by all endpoints. A missing or bad credential always
//! produces the same 401; the response never reveals whether a subject
//! exists.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::auth::jwt::bearer_token;
use crate::auth::{BasicAuthenticator, JwtAuthenticator};

/// JSON error body: `{code, error, detail?}`.
///
/// `detail` carries internals (exception text) and is only attached when the
/// server is configured to display tracebacks.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            error: error.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn server_error(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// How the control plane authenticates requests
pub enum AuthMode {
    Jwt(JwtAuthenticator),
    Basic(BasicAuthenticator),
    /// `no_auth.enabled`: everything passes
    Open,
}

/// The authenticated principal, stored as a request extension
#[derive(Debug, Clone)]
pub struct Principal(pub String);

#[derive(Clone)]
pub struct AuthState {
    pub mode: Arc<AuthMode>,
}

/// Guard middleware applied to every control-plane route
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = match state.mode.as_ref() {
        AuthMode::Open => None,
        mode => {
            let header_value = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| {
                    debug!("authorization header missing");
                    ApiError::unauthorized()
                })?;

            let principal = match mode {
                AuthMode::Jwt(jwt) => {
                    let token =
                        bearer_token(header_value).ok_or_else(ApiError::unauthorized)?;
                    jwt.authenticate(token).map_err(|e| {
                        debug!("bearer authentication failed: {}", e);
                        ApiError::unauthorized()
                    })?
                }
                AuthMode::Basic(basic) => {
                    let payload =
                        basic_payload(header_value).ok_or_else(ApiError::unauthorized)?;
                    basic.authenticate(payload).map_err(|e| {
                        debug!("basic authentication failed: {}", e);
                        ApiError::unauthorized()
                    })?
                }
                AuthMode::Open => unreachable!(),
            };
            Some(principal)
        }
    };

    if let Some(principal) = principal {
        request.extensions_mut().insert(Principal(principal));
    }

    Ok(next.run(request).await)
}

/// The base64 payload of a `Basic` header, scheme matched case-insensitively
fn basic_payload(header: &str) -> Option<&str> {
    let (scheme, payload) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("basic").then_some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn protected_app(mode: AuthMode) -> Router {
        let state = AuthState {
            mode: Arc::new(mode),
        };
        Router::new()
            .route("/probe", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, auth_middleware))
    }

    #[tokio::test]
    async fn test_open_mode_passes_without_credentials() {
        let app = protected_app(AuthMode::Open);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            crate::auth::SubjectRegistry::open(&dir.path().join("subjects.toml")).unwrap(),
        );
        let jwt = JwtAuthenticator::new(registry, &[], "iss", vec![], 30).unwrap();

        let app = protected_app(AuthMode::Jwt(jwt));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_garbage_bearer_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            crate::auth::SubjectRegistry::open(&dir.path().join("subjects.toml")).unwrap(),
        );
        let jwt = JwtAuthenticator::new(registry, &[], "iss", vec![], 30).unwrap();

        let app = protected_app(AuthMode::Jwt(jwt));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .header("Authorization", "Bearer not.a.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            crate::auth::SubjectRegistry::open(&dir.path().join("subjects.toml")).unwrap(),
        );
        let jwt = JwtAuthenticator::new(registry, &[], "iss", vec![], 30).unwrap();

        let app = protected_app(AuthMode::Jwt(jwt));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .header("Authorization", "Basic YWxpY2U6cHc=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_api_error_body_shape() {
        let error = ApiError::bad_request("Not a SOA domain");
        let body = serde_json::to_value(&error).unwrap();
        assert_eq!(body["code"], 400);
        assert_eq!(body["error"], "Not a SOA domain");
        assert!(body.get("detail").is_none());

        let with_detail = ApiError::server_error("Server Error")
            .with_detail(Some("backend exploded".to_string()));
        let body = serde_json::to_value(&with_detail).unwrap();
        assert_eq!(body["detail"], "backend exploded");
    }
}
