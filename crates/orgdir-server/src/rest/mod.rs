mod handlers;
pub mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::middleware;
use axum::response::Response;
use axum::routing::{delete, get, patch, post};

use orgdir_storage::DirectoryStore;

const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1 MB

use crate::metrics::{self, Metrics};
use crate::middleware::identity::identity_middleware;
use crate::service::DirectoryService;

pub struct AppState<S: DirectoryStore> {
    pub service: Arc<DirectoryService<S>>,
    pub metrics: Arc<Metrics>,
}

impl<S: DirectoryStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

async fn metrics_middleware<S: DirectoryStore>(
    State(state): State<AppState<S>>,
    request: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response {
    state.metrics.record_request();

    let response = next.run(request).await;

    let status = response.status();
    if status.is_success() {
        state.metrics.record_success();
    } else {
        state.metrics.record_error();
        state.metrics.record_failure_status(status);
    }

    response
}

pub fn create_router<S>(state: AppState<S>) -> Router
where
    S: DirectoryStore + 'static,
{
    Router::new()
        .route("/v1/tenants", post(handlers::create_tenant))
        .route(
            "/v1/tenants/{id}",
            get(handlers::get_tenant)
                .patch(handlers::update_tenant)
                .delete(handlers::delete_tenant),
        )
        .route("/v1/tenants/{id}/children", get(handlers::list_children))
        .route("/v1/tenants/{id}/ancestors", get(handlers::ancestors))
        .route("/v1/tenant-statistics", get(handlers::statistics))
        .route(
            "/v1/departments",
            post(handlers::create_department).get(handlers::list_departments),
        )
        .route("/v1/departments/{id}", delete(handlers::delete_department))
        .route("/v1/users", post(handlers::create_user))
        .route("/v1/roles", post(handlers::create_role))
        .route(
            "/v1/roles/{id}",
            patch(handlers::update_role).delete(handlers::delete_role),
        )
        .route("/v1/user-roles", post(handlers::grant_role))
        .route("/v1/user-roles/{id}", delete(handlers::revoke_role))
        .route("/v1/policies", post(handlers::add_policy))
        .route("/v1/policies/{id}", delete(handlers::remove_policy))
        .route("/v1/subject", get(handlers::current_subject))
        .route_layer(middleware::from_fn(identity_middleware))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/metrics",
            get(metrics::metrics_handler).with_state(Arc::clone(&state.metrics)),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware::<S>,
        ))
        .with_state(state)
}
