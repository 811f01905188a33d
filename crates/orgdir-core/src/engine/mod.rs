mod access;
mod hierarchy;
mod policy;
mod subject;

pub use access::AccessAdmin;

pub use hierarchy::{
    HierarchyEngine, TenantStatistics, check_delete, plan_child, plan_department, plan_root,
    plan_update,
};
pub use policy::{Decision, Domain, PolicyDecisionPoint, Verb};
pub use subject::{RoleGrant, Subject, SubjectResolver};

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::directory::{Department, NewPolicyRule, PolicyRule, Role, User, UserRole};
use crate::ids::{DepartmentId, GrantId, IdError, PolicyId, RoleId, TenantId, UserId};
use crate::tenant::{Tenant, TenantType};

/// A structural rule of the directory was broken. Every variant has a stable
/// code that callers can match on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantError {
    #[error("a ROOT tenant already exists")]
    DuplicateRoot,

    #[error("{0} tenant requires a parent")]
    MissingParent(TenantType),

    #[error("parent {kind} {id} not found")]
    ParentNotFound { kind: &'static str, id: i64 },

    #[error("{child} tenant cannot be placed under a {parent} tenant")]
    InvalidParentType {
        child: TenantType,
        parent: TenantType,
    },

    #[error("field '{0}' cannot be changed after creation")]
    ImmutableField(&'static str),

    #[error("the ROOT tenant cannot be modified or deleted")]
    ForbiddenOnRoot,

    #[error("{kind} {id} still has {count} child(ren)")]
    HasChildren {
        kind: &'static str,
        id: i64,
        count: u64,
    },

    #[error("tenant {0} already has a top department")]
    DuplicateTopDepartment(TenantId),

    #[error("department {department} belongs to tenant {actual}, not {expected}")]
    DepartmentTenantMismatch {
        department: DepartmentId,
        expected: TenantId,
        actual: TenantId,
    },

    #[error("role '{0}' is a system role")]
    SystemRole(String),

    #[error("role '{role}' cannot be granted in {scope}")]
    RoleTenantMismatch { role: String, scope: String },

    #[error("{kind} '{key}' already exists")]
    Duplicate { kind: &'static str, key: String },
}

impl InvariantError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateRoot => "DUPLICATE_ROOT",
            Self::MissingParent(_) => "MISSING_PARENT",
            Self::ParentNotFound { .. } => "PARENT_NOT_FOUND",
            Self::InvalidParentType { .. } => "INVALID_PARENT_TYPE",
            Self::ImmutableField(_) => "IMMUTABLE_FIELD",
            Self::ForbiddenOnRoot => "FORBIDDEN_ON_ROOT",
            Self::HasChildren { .. } => "HAS_CHILDREN",
            Self::DuplicateTopDepartment(_) => "DUPLICATE_TOP_DEPARTMENT",
            Self::DepartmentTenantMismatch { .. } => "DEPARTMENT_TENANT_MISMATCH",
            Self::SystemRole(_) => "SYSTEM_ROLE",
            Self::RoleTenantMismatch { .. } => "ROLE_TENANT_MISMATCH",
            Self::Duplicate { .. } => "DUPLICATE",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("user {0} is disabled")]
    DisabledUser(UserId),

    #[error("id generation failed: {0}")]
    Id(#[from] IdError),

    /// The row is outside what the current scope may write.
    #[error("row is outside the current tenant scope")]
    ScopeViolation,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

macro_rules! impl_into_i64 {
    ($($t:ty),*) => {
        $(impl From<$t> for i64 {
            fn from(id: $t) -> Self {
                id.value()
            }
        })*
    };
}

impl_into_i64!(TenantId, DepartmentId, UserId, RoleId, GrantId, PolicyId);

/// Tenant rows as seen through the current scope. Deleted rows are never
/// returned by reads.
pub trait TenantStore: Send {
    /// Serializes ROOT creation for the rest of the transaction.
    fn lock_root_creation(&mut self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn find_root(&mut self) -> impl Future<Output = Result<Option<Tenant>, EngineError>> + Send;

    fn get_tenant(
        &mut self,
        id: TenantId,
    ) -> impl Future<Output = Result<Option<Tenant>, EngineError>> + Send;

    /// Like [`get_tenant`](Self::get_tenant) but holds a row lock until the
    /// transaction ends.
    fn lock_tenant(
        &mut self,
        id: TenantId,
    ) -> impl Future<Output = Result<Option<Tenant>, EngineError>> + Send;

    fn insert_tenant(
        &mut self,
        tenant: &Tenant,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn update_tenant(
        &mut self,
        tenant: &Tenant,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn count_children(
        &mut self,
        id: TenantId,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn list_children(
        &mut self,
        id: TenantId,
    ) -> impl Future<Output = Result<Vec<Tenant>, EngineError>> + Send;

    fn soft_delete_tenant(
        &mut self,
        id: TenantId,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn count_by_type(
        &mut self,
    ) -> impl Future<Output = Result<Vec<(TenantType, u64)>, EngineError>> + Send;
}

pub trait DepartmentStore: Send {
    fn find_top_department(
        &mut self,
        tenant_id: TenantId,
    ) -> impl Future<Output = Result<Option<Department>, EngineError>> + Send;

    fn lock_department(
        &mut self,
        id: DepartmentId,
    ) -> impl Future<Output = Result<Option<Department>, EngineError>> + Send;

    fn insert_department(
        &mut self,
        department: &Department,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn count_child_departments(
        &mut self,
        id: DepartmentId,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn list_departments(
        &mut self,
        tenant_id: TenantId,
    ) -> impl Future<Output = Result<Vec<Department>, EngineError>> + Send;

    fn soft_delete_department(
        &mut self,
        id: DepartmentId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}

pub trait GrantReader: Send {
    fn find_user(
        &mut self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, EngineError>> + Send;

    /// Platform grants of the user, plus grants scoped to exactly `tenant_id`
    /// when one is given. Inactive and expired grants are included.
    fn grants_for(
        &mut self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> impl Future<Output = Result<Vec<RoleGrant>, EngineError>> + Send;
}

pub trait PolicyReader: Send {
    fn rules_for_roles(
        &mut self,
        role_codes: &[String],
    ) -> impl Future<Output = Result<Vec<PolicyRule>, EngineError>> + Send;
}

/// Writes and lookups behind the administrative surface: users, roles,
/// grants and policy rules.
pub trait AccessStore: Send {
    fn insert_user(&mut self, user: &User) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn find_user_by_username(
        &mut self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, EngineError>> + Send;

    fn insert_role(&mut self, role: &Role) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn get_role(
        &mut self,
        id: RoleId,
    ) -> impl Future<Output = Result<Option<Role>, EngineError>> + Send;

    fn find_role(
        &mut self,
        code: &str,
        tenant_id: Option<TenantId>,
    ) -> impl Future<Output = Result<Option<Role>, EngineError>> + Send;

    fn update_role(&mut self, role: &Role) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Removes the role together with every grant of it.
    fn delete_role(&mut self, id: RoleId) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn insert_grant(
        &mut self,
        grant: &UserRole,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn get_grant(
        &mut self,
        id: GrantId,
    ) -> impl Future<Output = Result<Option<UserRole>, EngineError>> + Send;

    fn find_grant(
        &mut self,
        user_id: UserId,
        role_id: RoleId,
        tenant_id: Option<TenantId>,
    ) -> impl Future<Output = Result<Option<UserRole>, EngineError>> + Send;

    fn delete_grant(&mut self, id: GrantId)
    -> impl Future<Output = Result<(), EngineError>> + Send;

    fn insert_policy(
        &mut self,
        rule: &PolicyRule,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn find_policy(
        &mut self,
        rule: &NewPolicyRule,
    ) -> impl Future<Output = Result<Option<PolicyRule>, EngineError>> + Send;

    fn get_policy(
        &mut self,
        id: PolicyId,
    ) -> impl Future<Output = Result<Option<PolicyRule>, EngineError>> + Send;

    fn delete_policy(
        &mut self,
        id: PolicyId,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}

#[cfg(test)]
pub(crate) mod testing;
