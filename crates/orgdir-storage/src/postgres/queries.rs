use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;

use orgdir_core::directory::{
    Department, NewPolicyRule, PolicyRule, Role, User, UserRole, UserStatus,
};
use orgdir_core::engine::RoleGrant;
use orgdir_core::ids::{DepartmentId, GrantId, PolicyId, RoleId, TenantId, UserId};
use orgdir_core::tenant::{Tenant, TenantType};

use crate::traits::StorageError;

/// Advisory lock key taken while a ROOT tenant is being created.
const ROOT_LOCK_KEY: i64 = 0x6f72_6764_6972_0001;

const TENANT_COLUMNS: &str = "id, name, owner_id, type, parent_id, path, level, status, \
     expired_at, attributes, created_by, updated_by, created_at, updated_at, deleted_at";

const DEPARTMENT_COLUMNS: &str =
    "id, tenant_id, parent_id, name, path, attributes, created_by, created_at, updated_at, deleted_at";

const USER_COLUMNS: &str = "id, username, full_name, status, created_at, updated_at";

const ROLE_COLUMNS: &str =
    "id, code, name, tenant_id, is_system, description, is_active, created_at, updated_at";

const GRANT_COLUMNS: &str = "id, user_id, role_id, tenant_id, granted_at, expires_at";

const POLICY_COLUMNS: &str = "id, role_code, domain, operation, method";

pub(super) fn to_storage_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("42501") => {
            StorageError::ScopeViolation
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(e.to_string())
        }
        _ => StorageError::Internal(e.to_string()),
    }
}

fn write_error(e: sqlx::Error, kind: &'static str, key: impl Into<String>) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        if db_err.constraint() == Some("tenants_single_root") {
            return StorageError::DuplicateRoot;
        }
        return StorageError::Duplicate {
            kind,
            key: key.into(),
        };
    }
    to_storage_error(e)
}

/// Row isolation drops update and delete targets silently. Callers read the
/// row first, so a write that touched nothing was outside the scope.
fn ensure_written(result: sqlx::postgres::PgQueryResult) -> Result<(), StorageError> {
    if result.rows_affected() == 0 {
        Err(StorageError::ScopeViolation)
    } else {
        Ok(())
    }
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Internal(format!("unreadable {column}: {err}"))
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: i64,
    name: String,
    owner_id: i64,
    #[sqlx(rename = "type")]
    tenant_type: String,
    parent_id: Option<i64>,
    path: String,
    level: i32,
    status: String,
    expired_at: Option<DateTime<Utc>>,
    attributes: Json<Map<String, Value>>,
    created_by: i64,
    updated_by: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = StorageError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Tenant {
            id: TenantId::new(row.id),
            name: row.name,
            owner_id: UserId::new(row.owner_id),
            tenant_type: row.tenant_type.parse().map_err(|e| corrupt("type", e))?,
            parent_id: row.parent_id.map(TenantId::new),
            path: row.path,
            level: row.level,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            expired_at: row.expired_at,
            attributes: row.attributes.0,
            created_by: UserId::new(row.created_by),
            updated_by: UserId::new(row.updated_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DepartmentRow {
    id: i64,
    tenant_id: i64,
    parent_id: Option<i64>,
    name: String,
    path: String,
    attributes: Json<Map<String, Value>>,
    created_by: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<DepartmentRow> for Department {
    fn from(row: DepartmentRow) -> Self {
        Department {
            id: DepartmentId::new(row.id),
            tenant_id: TenantId::new(row.tenant_id),
            parent_id: row.parent_id.map(DepartmentId::new),
            name: row.name,
            path: row.path,
            attributes: row.attributes.0,
            created_by: UserId::new(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    full_name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId::new(row.id),
            username: row.username,
            full_name: row.full_name,
            status: row
                .status
                .parse::<UserStatus>()
                .map_err(|e| corrupt("status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: i64,
    code: String,
    name: String,
    tenant_id: Option<i64>,
    is_system: bool,
    description: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::new(row.id),
            code: row.code,
            name: row.name,
            tenant_id: row.tenant_id.map(TenantId::new),
            is_system: row.is_system,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GrantRow {
    id: i64,
    user_id: i64,
    role_id: i64,
    tenant_id: Option<i64>,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<GrantRow> for UserRole {
    fn from(row: GrantRow) -> Self {
        UserRole {
            id: GrantId::new(row.id),
            user_id: UserId::new(row.user_id),
            role_id: RoleId::new(row.role_id),
            tenant_id: row.tenant_id.map(TenantId::new),
            granted_at: row.granted_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: i64,
    role_code: String,
    domain: String,
    operation: String,
    method: String,
}

impl TryFrom<PolicyRow> for PolicyRule {
    type Error = StorageError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        Ok(PolicyRule {
            id: PolicyId::new(row.id),
            role_code: row.role_code,
            domain: row.domain.parse().map_err(|e| corrupt("domain", e))?,
            operation: row.operation,
            method: row.method.parse().map_err(|e| corrupt("method", e))?,
        })
    }
}

fn tenants_from(rows: Vec<TenantRow>) -> Result<Vec<Tenant>, StorageError> {
    rows.into_iter().map(Tenant::try_from).collect()
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

pub async fn set_scope<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    value: &str,
) -> Result<(), StorageError> {
    sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
        .bind(value)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

pub async fn lock_root_creation<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<(), StorageError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ROOT_LOCK_KEY)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(())
}

pub async fn find_root<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Option<Tenant>, StorageError> {
    let query = format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE type = 'ROOT' AND deleted_at IS NULL"
    );
    let row: Option<TenantRow> = sqlx::query_as(&query)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(Tenant::try_from).transpose()
}

pub async fn get_tenant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: TenantId,
    for_update: bool,
) -> Result<Option<Tenant>, StorageError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let query = format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1 AND deleted_at IS NULL{lock}"
    );
    let row: Option<TenantRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(Tenant::try_from).transpose()
}

pub async fn insert_tenant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    tenant: &Tenant,
) -> Result<(), StorageError> {
    let query = format!(
        "INSERT INTO tenants ({TENANT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    );
    sqlx::query(&query)
        .bind(tenant.id.value())
        .bind(&tenant.name)
        .bind(tenant.owner_id.value())
        .bind(tenant.tenant_type.as_str())
        .bind(tenant.parent_id.map(|p| p.value()))
        .bind(&tenant.path)
        .bind(tenant.level)
        .bind(tenant.status.as_str())
        .bind(tenant.expired_at)
        .bind(Json(&tenant.attributes))
        .bind(tenant.created_by.value())
        .bind(tenant.updated_by.value())
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .bind(tenant.deleted_at)
        .execute(executor)
        .await
        .map_err(|e| write_error(e, "tenant", tenant.id.to_string()))?;
    Ok(())
}

/// Writes the whitelisted columns only. Structural columns are never updated.
pub async fn update_tenant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    tenant: &Tenant,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        UPDATE tenants
        SET name = $2, owner_id = $3, status = $4, expired_at = $5, attributes = $6,
            updated_by = $7, updated_at = $8
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(tenant.id.value())
    .bind(&tenant.name)
    .bind(tenant.owner_id.value())
    .bind(tenant.status.as_str())
    .bind(tenant.expired_at)
    .bind(Json(&tenant.attributes))
    .bind(tenant.updated_by.value())
    .bind(tenant.updated_at)
    .execute(executor)
    .await
    .map_err(to_storage_error)?;
    Ok(())
}

pub async fn count_children<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: TenantId,
) -> Result<u64, StorageError> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM tenants WHERE parent_id = $1 AND deleted_at IS NULL")
            .bind(id.value())
            .fetch_one(executor)
            .await
            .map_err(to_storage_error)?;
    Ok(count(row.0))
}

pub async fn list_children<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: TenantId,
) -> Result<Vec<Tenant>, StorageError> {
    let query = format!(
        "SELECT {TENANT_COLUMNS} FROM tenants \
         WHERE parent_id = $1 AND deleted_at IS NULL ORDER BY id"
    );
    let rows: Vec<TenantRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;
    tenants_from(rows)
}

pub async fn soft_delete_tenant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: TenantId,
    actor: UserId,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE tenants SET deleted_at = $2, updated_at = $2, updated_by = $3 \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id.value())
    .bind(at)
    .bind(actor.value())
    .execute(executor)
    .await
    .map_err(to_storage_error)?;
    Ok(())
}

pub async fn count_by_type<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<(TenantType, u64)>, StorageError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT type, COUNT(*) FROM tenants WHERE deleted_at IS NULL GROUP BY type",
    )
    .fetch_all(executor)
    .await
    .map_err(to_storage_error)?;

    let mut counts = rows
        .into_iter()
        .map(|(ty, n)| {
            ty.parse::<TenantType>()
                .map(|ty| (ty, count(n)))
                .map_err(|e| corrupt("type", e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    counts.sort_by_key(|(ty, _)| *ty);
    Ok(counts)
}

pub async fn find_top_department<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    tenant_id: TenantId,
) -> Result<Option<Department>, StorageError> {
    let query = format!(
        "SELECT {DEPARTMENT_COLUMNS} FROM departments \
         WHERE tenant_id = $1 AND parent_id IS NULL AND deleted_at IS NULL"
    );
    let row: Option<DepartmentRow> = sqlx::query_as(&query)
        .bind(tenant_id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(Department::from))
}

pub async fn lock_department<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: DepartmentId,
) -> Result<Option<Department>, StorageError> {
    let query = format!(
        "SELECT {DEPARTMENT_COLUMNS} FROM departments \
         WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    );
    let row: Option<DepartmentRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(Department::from))
}

pub async fn insert_department<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    department: &Department,
) -> Result<(), StorageError> {
    let query = format!(
        "INSERT INTO departments ({DEPARTMENT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    );
    sqlx::query(&query)
        .bind(department.id.value())
        .bind(department.tenant_id.value())
        .bind(department.parent_id.map(|p| p.value()))
        .bind(&department.name)
        .bind(&department.path)
        .bind(Json(&department.attributes))
        .bind(department.created_by.value())
        .bind(department.created_at)
        .bind(department.updated_at)
        .bind(department.deleted_at)
        .execute(executor)
        .await
        .map_err(|e| write_error(e, "top department", department.tenant_id.to_string()))?;
    Ok(())
}

pub async fn count_child_departments<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: DepartmentId,
) -> Result<u64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM departments WHERE parent_id = $1 AND deleted_at IS NULL",
    )
    .bind(id.value())
    .fetch_one(executor)
    .await
    .map_err(to_storage_error)?;
    Ok(count(row.0))
}

pub async fn list_departments<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    tenant_id: TenantId,
) -> Result<Vec<Department>, StorageError> {
    let query = format!(
        "SELECT {DEPARTMENT_COLUMNS} FROM departments \
         WHERE tenant_id = $1 AND deleted_at IS NULL ORDER BY path"
    );
    let rows: Vec<DepartmentRow> = sqlx::query_as(&query)
        .bind(tenant_id.value())
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(rows.into_iter().map(Department::from).collect())
}

pub async fn soft_delete_department<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: DepartmentId,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE departments SET deleted_at = $2, updated_at = $2 \
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id.value())
    .bind(at)
    .execute(executor)
    .await
    .map_err(to_storage_error)?;
    Ok(())
}

pub async fn insert_user<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    user: &User,
) -> Result<(), StorageError> {
    let query = format!("INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)");
    sqlx::query(&query)
        .bind(user.id.value())
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(user.status.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(executor)
        .await
        .map_err(|e| write_error(e, "user", user.username.clone()))?;
    Ok(())
}

pub async fn find_user<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: UserId,
) -> Result<Option<User>, StorageError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row: Option<UserRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(User::try_from).transpose()
}

pub async fn find_user_by_username<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    username: &str,
) -> Result<Option<User>, StorageError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
    let row: Option<UserRow> = sqlx::query_as(&query)
        .bind(username)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(User::try_from).transpose()
}

/// Grants of the user that are platform-wide or scoped to `tenant_id`,
/// joined with their role.
pub async fn grants_for<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    user_id: UserId,
    tenant_id: Option<TenantId>,
) -> Result<Vec<RoleGrant>, StorageError> {
    let rows: Vec<(String, bool, Option<i64>, Option<DateTime<Utc>>)> = sqlx::query_as(
        r#"
        SELECT r.code, r.is_active, ur.tenant_id, ur.expires_at
        FROM user_roles ur
        JOIN roles r ON r.id = ur.role_id
        WHERE ur.user_id = $1 AND (ur.tenant_id IS NULL OR ur.tenant_id = $2)
        ORDER BY ur.id
        "#,
    )
    .bind(user_id.value())
    .bind(tenant_id.map(|t| t.value()))
    .fetch_all(executor)
    .await
    .map_err(to_storage_error)?;

    Ok(rows
        .into_iter()
        .map(|(role_code, role_active, tenant_id, expires_at)| RoleGrant {
            role_code,
            role_active,
            tenant_id: tenant_id.map(TenantId::new),
            expires_at,
        })
        .collect())
}

pub async fn rules_for_roles<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    role_codes: &[String],
) -> Result<Vec<PolicyRule>, StorageError> {
    let query = format!(
        "SELECT {POLICY_COLUMNS} FROM policies WHERE role_code = ANY($1) ORDER BY id"
    );
    let rows: Vec<PolicyRow> = sqlx::query_as(&query)
        .bind(role_codes)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;
    rows.into_iter().map(PolicyRule::try_from).collect()
}

pub async fn insert_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    role: &Role,
) -> Result<(), StorageError> {
    let query =
        format!("INSERT INTO roles ({ROLE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)");
    sqlx::query(&query)
        .bind(role.id.value())
        .bind(&role.code)
        .bind(&role.name)
        .bind(role.tenant_id.map(|t| t.value()))
        .bind(role.is_system)
        .bind(&role.description)
        .bind(role.is_active)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(executor)
        .await
        .map_err(|e| write_error(e, "role", role.code.clone()))?;
    Ok(())
}

pub async fn get_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: RoleId,
) -> Result<Option<Role>, StorageError> {
    let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
    let row: Option<RoleRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(Role::from))
}

pub async fn find_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    code: &str,
    tenant_id: Option<TenantId>,
) -> Result<Option<Role>, StorageError> {
    let query = format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE code = $1 AND tenant_id IS NOT DISTINCT FROM $2"
    );
    let row: Option<RoleRow> = sqlx::query_as(&query)
        .bind(code)
        .bind(tenant_id.map(|t| t.value()))
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(Role::from))
}

pub async fn update_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    role: &Role,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE roles SET name = $2, description = $3, is_active = $4, updated_at = $5 \
         WHERE id = $1",
    )
    .bind(role.id.value())
    .bind(&role.name)
    .bind(&role.description)
    .bind(role.is_active)
    .bind(role.updated_at)
    .execute(executor)
    .await
    .map_err(to_storage_error)
    .and_then(ensure_written)
}

pub async fn delete_role<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: RoleId,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(id.value())
        .execute(executor)
        .await
        .map_err(to_storage_error)
        .and_then(ensure_written)
}

pub async fn insert_grant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    grant: &UserRole,
) -> Result<(), StorageError> {
    let query = format!("INSERT INTO user_roles ({GRANT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)");
    sqlx::query(&query)
        .bind(grant.id.value())
        .bind(grant.user_id.value())
        .bind(grant.role_id.value())
        .bind(grant.tenant_id.map(|t| t.value()))
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .execute(executor)
        .await
        .map_err(|e| {
            write_error(
                e,
                "user role",
                format!("{}:{}", grant.user_id, grant.role_id),
            )
        })?;
    Ok(())
}

pub async fn get_grant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: GrantId,
) -> Result<Option<UserRole>, StorageError> {
    let query = format!("SELECT {GRANT_COLUMNS} FROM user_roles WHERE id = $1");
    let row: Option<GrantRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(UserRole::from))
}

pub async fn find_grant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    user_id: UserId,
    role_id: RoleId,
    tenant_id: Option<TenantId>,
) -> Result<Option<UserRole>, StorageError> {
    let query = format!(
        "SELECT {GRANT_COLUMNS} FROM user_roles \
         WHERE user_id = $1 AND role_id = $2 AND tenant_id IS NOT DISTINCT FROM $3"
    );
    let row: Option<GrantRow> = sqlx::query_as(&query)
        .bind(user_id.value())
        .bind(role_id.value())
        .bind(tenant_id.map(|t| t.value()))
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(UserRole::from))
}

pub async fn delete_grant<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: GrantId,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM user_roles WHERE id = $1")
        .bind(id.value())
        .execute(executor)
        .await
        .map_err(to_storage_error)
        .and_then(ensure_written)
}

pub async fn insert_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    rule: &PolicyRule,
) -> Result<(), StorageError> {
    let query = format!("INSERT INTO policies ({POLICY_COLUMNS}) VALUES ($1, $2, $3, $4, $5)");
    sqlx::query(&query)
        .bind(rule.id.value())
        .bind(&rule.role_code)
        .bind(rule.domain.to_string())
        .bind(&rule.operation)
        .bind(rule.method.to_string())
        .execute(executor)
        .await
        .map_err(|e| write_error(e, "policy", rule.to_string()))?;
    Ok(())
}

pub async fn find_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    rule: &NewPolicyRule,
) -> Result<Option<PolicyRule>, StorageError> {
    let query = format!(
        "SELECT {POLICY_COLUMNS} FROM policies \
         WHERE role_code = $1 AND domain = $2 AND operation = $3 AND method = $4"
    );
    let row: Option<PolicyRow> = sqlx::query_as(&query)
        .bind(&rule.role_code)
        .bind(rule.domain.to_string())
        .bind(&rule.operation)
        .bind(rule.method.to_string())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(PolicyRule::try_from).transpose()
}

pub async fn get_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: PolicyId,
) -> Result<Option<PolicyRule>, StorageError> {
    let query = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1");
    let row: Option<PolicyRow> = sqlx::query_as(&query)
        .bind(id.value())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(PolicyRule::try_from).transpose()
}

pub async fn delete_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: PolicyId,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM policies WHERE id = $1")
        .bind(id.value())
        .execute(executor)
        .await
        .map_err(to_storage_error)
        .and_then(ensure_written)
}
