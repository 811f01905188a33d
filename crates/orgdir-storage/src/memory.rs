use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use orgdir_core::directory::{Department, NewPolicyRule, PolicyRule, Role, User, UserRole};
use orgdir_core::engine::{
    AccessStore, DepartmentStore, EngineError, GrantReader, PolicyReader, RoleGrant, TenantStore,
};
use orgdir_core::ids::{DepartmentId, GrantId, PolicyId, RoleId, TenantId, UserId};
use orgdir_core::scope::TenantScope;
use orgdir_core::tenant::{Tenant, TenantType};

use crate::traits::{DirectoryStore, DirectoryTx, StorageError};

#[derive(Debug, Clone, Default)]
struct InnerState {
    tenants: BTreeMap<TenantId, Tenant>,
    departments: BTreeMap<DepartmentId, Department>,
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    user_roles: BTreeMap<GrantId, UserRole>,
    policies: BTreeMap<PolicyId, PolicyRule>,
}

/// Row filters equivalent to the PostgreSQL isolation policies.
#[derive(Debug, Clone, Copy)]
struct RowFilter(TenantScope);

impl RowFilter {
    /// A tenant scope sees its own tenant and everything below it.
    fn tenant(&self, tenant: &Tenant) -> bool {
        match self.0 {
            TenantScope::Platform => true,
            TenantScope::Tenant(id) => tenant.is_within(id),
        }
    }

    fn department(&self, department: &Department) -> bool {
        match self.0 {
            TenantScope::Platform => true,
            TenantScope::Tenant(id) => department.tenant_id == id,
        }
    }

    /// Roles and grants: platform rows plus rows of the scoped tenant.
    fn readable(&self, owner: Option<TenantId>) -> bool {
        match self.0 {
            TenantScope::Platform => true,
            TenantScope::Tenant(id) => owner.is_none_or(|t| t == id),
        }
    }

    /// Roles, grants and policy rules: a tenant scope writes only its own.
    fn check_write(&self, owner: Option<TenantId>) -> Result<(), StorageError> {
        if self.0.can_write(owner) {
            Ok(())
        } else {
            Err(StorageError::ScopeViolation)
        }
    }
}

/// In-process backend. Transactions are serialized: `begin` waits for the
/// previous transaction to finish and works on a private copy of the state
/// that replaces the shared state only on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DirectoryStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self, scope: TenantScope) -> Result<InMemoryTx, StorageError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx {
            guard,
            working,
            filter: RowFilter(scope),
            scope,
        })
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<InnerState>,
    working: InnerState,
    filter: RowFilter,
    scope: TenantScope,
}

impl InMemoryTx {
    fn visible_tenant(&self, id: TenantId) -> Option<&Tenant> {
        self.working
            .tenants
            .get(&id)
            .filter(|t| !t.is_deleted() && self.filter.tenant(t))
    }

    fn visible_department(&self, id: DepartmentId) -> Option<&Department> {
        self.working
            .departments
            .get(&id)
            .filter(|d| d.deleted_at.is_none() && self.filter.department(d))
    }

    fn check_tenant_row(&self, tenant: &Tenant) -> Result<(), StorageError> {
        if self.filter.tenant(tenant) {
            Ok(())
        } else {
            Err(StorageError::ScopeViolation)
        }
    }
}

impl TenantStore for InMemoryTx {
    async fn lock_root_creation(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn find_root(&mut self) -> Result<Option<Tenant>, EngineError> {
        Ok(self
            .working
            .tenants
            .values()
            .find(|t| t.is_root() && !t.is_deleted() && self.filter.tenant(t))
            .cloned())
    }

    async fn get_tenant(&mut self, id: TenantId) -> Result<Option<Tenant>, EngineError> {
        Ok(self.visible_tenant(id).cloned())
    }

    async fn lock_tenant(&mut self, id: TenantId) -> Result<Option<Tenant>, EngineError> {
        Ok(self.visible_tenant(id).cloned())
    }

    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), EngineError> {
        self.check_tenant_row(tenant)?;
        if tenant.is_root()
            && self
                .working
                .tenants
                .values()
                .any(|t| t.is_root() && !t.is_deleted())
        {
            return Err(StorageError::DuplicateRoot.into());
        }
        if self.working.tenants.contains_key(&tenant.id) {
            return Err(StorageError::Internal(format!("tenant id {} reused", tenant.id)).into());
        }
        self.working.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), EngineError> {
        if self.visible_tenant(tenant.id).is_none() {
            return Ok(());
        }
        self.check_tenant_row(tenant)?;
        self.working.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn count_children(&mut self, id: TenantId) -> Result<u64, EngineError> {
        Ok(self
            .working
            .tenants
            .values()
            .filter(|t| t.parent_id == Some(id) && !t.is_deleted() && self.filter.tenant(t))
            .count() as u64)
    }

    async fn list_children(&mut self, id: TenantId) -> Result<Vec<Tenant>, EngineError> {
        Ok(self
            .working
            .tenants
            .values()
            .filter(|t| t.parent_id == Some(id) && !t.is_deleted() && self.filter.tenant(t))
            .cloned()
            .collect())
    }

    async fn soft_delete_tenant(
        &mut self,
        id: TenantId,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.visible_tenant(id).is_none() {
            return Ok(());
        }
        if let Some(tenant) = self.working.tenants.get_mut(&id) {
            tenant.deleted_at = Some(at);
            tenant.updated_at = at;
            tenant.updated_by = actor;
        }
        Ok(())
    }

    async fn count_by_type(&mut self) -> Result<Vec<(TenantType, u64)>, EngineError> {
        let mut counts: BTreeMap<TenantType, u64> = BTreeMap::new();
        for tenant in self.working.tenants.values() {
            if !tenant.is_deleted() && self.filter.tenant(tenant) {
                *counts.entry(tenant.tenant_type).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

impl DepartmentStore for InMemoryTx {
    async fn find_top_department(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Option<Department>, EngineError> {
        Ok(self
            .working
            .departments
            .values()
            .find(|d| {
                d.tenant_id == tenant_id
                    && d.is_top()
                    && d.deleted_at.is_none()
                    && self.filter.department(d)
            })
            .cloned())
    }

    async fn lock_department(
        &mut self,
        id: DepartmentId,
    ) -> Result<Option<Department>, EngineError> {
        Ok(self.visible_department(id).cloned())
    }

    async fn insert_department(&mut self, department: &Department) -> Result<(), EngineError> {
        if !self.filter.department(department) {
            return Err(StorageError::ScopeViolation.into());
        }
        if department.is_top()
            && self.working.departments.values().any(|d| {
                d.tenant_id == department.tenant_id && d.is_top() && d.deleted_at.is_none()
            })
        {
            return Err(StorageError::Duplicate {
                kind: "top department",
                key: department.tenant_id.to_string(),
            }
            .into());
        }
        self.working
            .departments
            .insert(department.id, department.clone());
        Ok(())
    }

    async fn count_child_departments(&mut self, id: DepartmentId) -> Result<u64, EngineError> {
        Ok(self
            .working
            .departments
            .values()
            .filter(|d| {
                d.parent_id == Some(id) && d.deleted_at.is_none() && self.filter.department(d)
            })
            .count() as u64)
    }

    async fn list_departments(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Vec<Department>, EngineError> {
        Ok(self
            .working
            .departments
            .values()
            .filter(|d| {
                d.tenant_id == tenant_id && d.deleted_at.is_none() && self.filter.department(d)
            })
            .cloned()
            .collect())
    }

    async fn soft_delete_department(
        &mut self,
        id: DepartmentId,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.visible_department(id).is_none() {
            return Ok(());
        }
        if let Some(department) = self.working.departments.get_mut(&id) {
            department.deleted_at = Some(at);
            department.updated_at = at;
        }
        Ok(())
    }
}

impl GrantReader for InMemoryTx {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, EngineError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn grants_for(
        &mut self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<RoleGrant>, EngineError> {
        let filter = self.filter;
        Ok(self
            .working
            .user_roles
            .values()
            .filter(|g| g.user_id == user_id && filter.readable(g.tenant_id))
            .filter(|g| g.tenant_id.is_none() || g.tenant_id == tenant_id)
            .filter_map(|g| {
                let role = self
                    .working
                    .roles
                    .get(&g.role_id)
                    .filter(|r| filter.readable(r.tenant_id))?;
                Some(RoleGrant {
                    role_code: role.code.clone(),
                    role_active: role.is_active,
                    tenant_id: g.tenant_id,
                    expires_at: g.expires_at,
                })
            })
            .collect())
    }
}

impl PolicyReader for InMemoryTx {
    async fn rules_for_roles(
        &mut self,
        role_codes: &[String],
    ) -> Result<Vec<PolicyRule>, EngineError> {
        Ok(self
            .working
            .policies
            .values()
            .filter(|r| role_codes.contains(&r.role_code))
            .cloned()
            .collect())
    }
}

impl AccessStore for InMemoryTx {
    async fn insert_user(&mut self, user: &User) -> Result<(), EngineError> {
        if self
            .working
            .users
            .values()
            .any(|u| u.username == user.username)
        {
            return Err(StorageError::Duplicate {
                kind: "user",
                key: user.username.clone(),
            }
            .into());
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>, EngineError> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_role(&mut self, role: &Role) -> Result<(), EngineError> {
        self.filter.check_write(role.tenant_id)?;
        if self
            .working
            .roles
            .values()
            .any(|r| r.code == role.code && r.tenant_id == role.tenant_id)
        {
            return Err(StorageError::Duplicate {
                kind: "role",
                key: role.code.clone(),
            }
            .into());
        }
        self.working.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn get_role(&mut self, id: RoleId) -> Result<Option<Role>, EngineError> {
        Ok(self
            .working
            .roles
            .get(&id)
            .filter(|r| self.filter.readable(r.tenant_id))
            .cloned())
    }

    async fn find_role(
        &mut self,
        code: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<Role>, EngineError> {
        Ok(self
            .working
            .roles
            .values()
            .find(|r| {
                r.code == code && r.tenant_id == tenant_id && self.filter.readable(r.tenant_id)
            })
            .cloned())
    }

    async fn update_role(&mut self, role: &Role) -> Result<(), EngineError> {
        let Some(current) = self
            .working
            .roles
            .get(&role.id)
            .filter(|r| self.filter.readable(r.tenant_id))
        else {
            return Ok(());
        };
        self.filter.check_write(current.tenant_id)?;
        self.filter.check_write(role.tenant_id)?;
        self.working.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&mut self, id: RoleId) -> Result<(), EngineError> {
        let Some(current) = self
            .working
            .roles
            .get(&id)
            .filter(|r| self.filter.readable(r.tenant_id))
        else {
            return Ok(());
        };
        self.filter.check_write(current.tenant_id)?;
        self.working.roles.remove(&id);
        self.working.user_roles.retain(|_, g| g.role_id != id);
        Ok(())
    }

    async fn insert_grant(&mut self, grant: &UserRole) -> Result<(), EngineError> {
        self.filter.check_write(grant.tenant_id)?;
        if self.working.user_roles.values().any(|g| {
            g.user_id == grant.user_id && g.role_id == grant.role_id && g.tenant_id == grant.tenant_id
        }) {
            return Err(StorageError::Duplicate {
                kind: "user role",
                key: format!("{}:{}", grant.user_id, grant.role_id),
            }
            .into());
        }
        self.working.user_roles.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn get_grant(&mut self, id: GrantId) -> Result<Option<UserRole>, EngineError> {
        Ok(self
            .working
            .user_roles
            .get(&id)
            .filter(|g| self.filter.readable(g.tenant_id))
            .cloned())
    }

    async fn find_grant(
        &mut self,
        user_id: UserId,
        role_id: RoleId,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<UserRole>, EngineError> {
        Ok(self
            .working
            .user_roles
            .values()
            .find(|g| {
                g.user_id == user_id
                    && g.role_id == role_id
                    && g.tenant_id == tenant_id
                    && self.filter.readable(g.tenant_id)
            })
            .cloned())
    }

    async fn delete_grant(&mut self, id: GrantId) -> Result<(), EngineError> {
        let Some(current) = self
            .working
            .user_roles
            .get(&id)
            .filter(|g| self.filter.readable(g.tenant_id))
        else {
            return Ok(());
        };
        self.filter.check_write(current.tenant_id)?;
        self.working.user_roles.remove(&id);
        Ok(())
    }

    async fn insert_policy(&mut self, rule: &PolicyRule) -> Result<(), EngineError> {
        self.filter.check_write(rule.domain.tenant_id())?;
        if self.working.policies.values().any(|r| {
            r.role_code == rule.role_code
                && r.domain == rule.domain
                && r.operation == rule.operation
                && r.method == rule.method
        }) {
            return Err(StorageError::Duplicate {
                kind: "policy",
                key: rule.to_string(),
            }
            .into());
        }
        self.working.policies.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn find_policy(
        &mut self,
        rule: &NewPolicyRule,
    ) -> Result<Option<PolicyRule>, EngineError> {
        Ok(self
            .working
            .policies
            .values()
            .find(|r| {
                r.role_code == rule.role_code
                    && r.domain == rule.domain
                    && r.operation == rule.operation
                    && r.method == rule.method
            })
            .cloned())
    }

    async fn get_policy(&mut self, id: PolicyId) -> Result<Option<PolicyRule>, EngineError> {
        Ok(self.working.policies.get(&id).cloned())
    }

    async fn delete_policy(&mut self, id: PolicyId) -> Result<(), EngineError> {
        let owner = self.working.policies.get(&id).map(|r| r.domain.tenant_id());
        if let Some(owner) = owner {
            self.filter.check_write(owner)?;
            self.working.policies.remove(&id);
        }
        Ok(())
    }
}

impl DirectoryTx for InMemoryTx {
    fn scope(&self) -> TenantScope {
        self.scope
    }

    async fn commit(self) -> Result<(), StorageError> {
        let InMemoryTx {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        Ok(())
    }
}
