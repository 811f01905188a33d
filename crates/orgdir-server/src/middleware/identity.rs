use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use orgdir_core::engine::Verb;
use orgdir_core::ids::UserId;

use crate::error::ApiError;
use crate::service::RequestContext;

pub const USER_HEADER: &str = "x-user-id";
pub const TENANT_HEADER: &str = "x-tenant-id";

fn skip_identity(path: &str) -> bool {
    matches!(path, "/healthz" | "/metrics")
}

fn parse_user(raw: Option<&str>) -> Option<UserId> {
    let id = raw?.trim().parse::<i64>().ok()?;
    (id > 0).then(|| UserId::new(id))
}

/// Reads the caller's declared identity and attaches a [`RequestContext`].
/// The tenant header is passed through raw; it is validated when the
/// transaction is bound.
pub async fn identity_middleware(mut request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if skip_identity(&path) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let user = headers.get(USER_HEADER).and_then(|v| v.to_str().ok());
    let Some(user_id) = parse_user(user) else {
        tracing::debug!(path = %path, "request without a valid user identity");
        return ApiError::Unauthenticated.into_response();
    };
    let tenant = headers
        .get(TENANT_HEADER)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    let operation = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(path, |matched| matched.as_str().to_string());
    let verb = Verb::from_http_method(request.method().as_str())
        .unwrap_or_else(|| Verb::infer(&operation));

    let ctx = RequestContext {
        user_id,
        tenant,
        operation,
        verb,
    };
    request.extensions_mut().insert(ctx);
    next.run(request).await
}
