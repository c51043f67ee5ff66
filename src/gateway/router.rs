//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{
        Query, Request, State,
        rejection::{ExtensionRejection, JsonRejection, QueryRejection},
    },
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info_span};

use super::service::{AccessService, CheckRequest, CheckResult};
use crate::Error;
use crate::auth::Claims;

/// Correlation id header, reused when the caller sends one
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state
pub struct AppState {
    /// Access check service
    pub service: AccessService,
}

impl AppState {
    /// Wrap a service for the router
    #[must_use]
    pub fn new(service: AccessService) -> Self {
        Self { service }
    }
}

/// `?v=` query on the access-check route
#[derive(Debug, Deserialize)]
struct VersionQuery {
    v: String,
}

/// Access-check request body
#[derive(Debug, Deserialize)]
struct CheckBody {
    requests: Vec<String>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/access-check", post(check_access_handler))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), auth_gate));

    Router::new()
        .route("/readyz", get(readyz_handler))
        .route("/livez", get(livez_handler))
        .merge(gated)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(drop_blank_request_id))
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

/// Remove an inbound correlation id that is blank or not valid text, so a
/// fresh one is generated instead of echoing an empty header.
async fn drop_blank_request_id(mut request: Request, next: Next) -> Response {
    let blank = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .is_some_and(|v| v.to_str().ok().is_none_or(|id| id.trim().is_empty()));
    if blank {
        request.headers_mut().remove(REQUEST_ID_HEADER);
    }
    next.run(request).await
}

/// Authentication gate for the access-check route.
///
/// Verified claims are stored in the request extensions; failures answer 401
/// before the handler runs.
pub async fn auth_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match state.service.authenticate(authorization.as_deref()).await {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// POST /access-check?v=1
async fn check_access_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<VersionQuery>, QueryRejection>,
    claims: Result<Extension<Claims>, ExtensionRejection>,
    body: Result<Json<CheckBody>, JsonRejection>,
) -> Result<Json<CheckResult>, Error> {
    let Query(VersionQuery { v }) =
        query.map_err(|e| Error::BadRequest(format!("invalid query: {}", e.body_text())))?;
    let Json(CheckBody { requests }) =
        body.map_err(|e| Error::BadRequest(format!("invalid request body: {}", e.body_text())))?;

    if requests.is_empty() {
        return Err(Error::BadRequest(
            "requests must contain at least one element".to_string(),
        ));
    }

    let claims = claims.ok().map(|Extension(claims)| claims);
    let request = CheckRequest {
        version: v,
        requests,
    };
    debug!(requests = request.requests.len(), "Access check request");

    state
        .service
        .check_access(claims.as_ref(), &request)
        .await
        .map(Json)
}

/// GET /readyz
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Result<&'static str, Error> {
    state.service.readyz().await
}

/// GET /livez
async fn livez_handler(State(state): State<Arc<AppState>>) -> &'static str {
    state.service.livez()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(Arc::new(AppState::new(AccessService::unwired())))
    }

    #[tokio::test]
    async fn livez_is_always_ok() {
        let response = app()
            .oneshot(Request::builder().uri("/livez").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn inbound_request_id_is_echoed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/livez")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[tokio::test]
    async fn blank_request_id_is_replaced() {
        for blank in ["", "   "] {
            let response = app()
                .oneshot(
                    Request::builder()
                        .uri("/livez")
                        .header(REQUEST_ID_HEADER, blank)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
            assert!(uuid::Uuid::parse_str(id).is_ok(), "got {id:?} for {blank:?}");
        }
    }

    #[tokio::test]
    async fn readyz_without_dependencies_is_unavailable() {
        let response = app()
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn access_check_without_validator_never_reaches_handler() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/access-check?v=1")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"requests":["resource1"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
