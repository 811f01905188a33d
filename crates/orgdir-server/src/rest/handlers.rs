use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use serde_json::{Map, Value};

use orgdir_core::directory::{Department, PolicyRule, Role, User, UserRole};
use orgdir_core::engine::{Subject, TenantStatistics};
use orgdir_core::ids::{DepartmentId, GrantId, PolicyId, RoleId, TenantId};
use orgdir_core::tenant::Tenant;
use orgdir_storage::DirectoryStore;

use crate::error::ApiError;
use crate::service::RequestContext;

use super::AppState;
use super::types::*;

type Created<T> = (StatusCode, Json<T>);

fn created<T>(value: T) -> Created<T> {
    (StatusCode::CREATED, Json(value))
}

pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn create_tenant<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateTenantRequest>, JsonRejection>,
) -> Result<Created<Tenant>, ApiError> {
    let Json(req) = payload?;
    let tenant = state
        .service
        .create_tenant(&ctx, req.into_new_tenant()?)
        .await?;
    Ok(created(tenant))
}

pub async fn get_tenant<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<TenantId>, PathRejection>,
) -> Result<Json<Tenant>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.get_tenant(&ctx, id).await?))
}

pub async fn update_tenant<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<TenantId>, PathRejection>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<Tenant>, ApiError> {
    let Path(id) = id?;
    let Json(body) = payload?;
    let update = tenant_update_from_json(body)?;
    Ok(Json(state.service.update_tenant(&ctx, id, update).await?))
}

pub async fn delete_tenant<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<TenantId>, PathRejection>,
) -> Result<Json<Tenant>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.delete_tenant(&ctx, id).await?))
}

pub async fn list_children<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<TenantId>, PathRejection>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.list_children(&ctx, id).await?))
}

pub async fn ancestors<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<TenantId>, PathRejection>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.ancestors(&ctx, id).await?))
}

pub async fn statistics<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<TenantStatistics>, ApiError> {
    Ok(Json(state.service.statistics(&ctx).await?))
}

pub async fn create_department<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateDepartmentRequest>, JsonRejection>,
) -> Result<Created<Department>, ApiError> {
    let Json(req) = payload?;
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }
    let department = state.service.create_department(&ctx, req.into()).await?;
    Ok(created(department))
}

pub async fn list_departments<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    query: Result<Query<ListDepartmentsQuery>, QueryRejection>,
) -> Result<Json<Vec<Department>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(
        state
            .service
            .list_departments(&ctx, query.tenant_id)
            .await?,
    ))
}

pub async fn delete_department<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<DepartmentId>, PathRejection>,
) -> Result<Json<Department>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.delete_department(&ctx, id).await?))
}

pub async fn create_user<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Created<User>, ApiError> {
    let Json(req) = payload?;
    let user = state
        .service
        .create_user(&ctx, req.into_new_user()?)
        .await?;
    Ok(created(user))
}

pub async fn create_role<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> Result<Created<Role>, ApiError> {
    let Json(req) = payload?;
    let role = state
        .service
        .create_role(&ctx, req.into_new_role()?)
        .await?;
    Ok(created(role))
}

pub async fn update_role<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<RoleId>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<Role>, ApiError> {
    let Path(id) = id?;
    let Json(req) = payload?;
    Ok(Json(state.service.update_role(&ctx, id, req.into()).await?))
}

pub async fn delete_role<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<RoleId>, PathRejection>,
) -> Result<Json<Role>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.delete_role(&ctx, id).await?))
}

pub async fn grant_role<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<GrantRoleRequest>, JsonRejection>,
) -> Result<Created<UserRole>, ApiError> {
    let Json(req) = payload?;
    let grant = state.service.grant_role(&ctx, req.into()).await?;
    Ok(created(grant))
}

pub async fn revoke_role<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<GrantId>, PathRejection>,
) -> Result<Json<UserRole>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.revoke_role(&ctx, id).await?))
}

pub async fn add_policy<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<AddPolicyRequest>, JsonRejection>,
) -> Result<Created<PolicyRule>, ApiError> {
    let Json(req) = payload?;
    let rule = state
        .service
        .add_policy(&ctx, req.into_new_rule()?)
        .await?;
    Ok(created(rule))
}

pub async fn remove_policy<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
    id: Result<Path<PolicyId>, PathRejection>,
) -> Result<Json<PolicyRule>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.service.remove_policy(&ctx, id).await?))
}

pub async fn current_subject<S: DirectoryStore + 'static>(
    State(state): State<AppState<S>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Subject>, ApiError> {
    Ok(Json(state.service.current_subject(&ctx).await?))
}
