use chrono::{DateTime, Utc};

use crate::directory::{Department, NewPolicyRule, PolicyRule, Role, User, UserRole};
use crate::ids::{DepartmentId, GrantId, PolicyId, RoleId, TenantId, UserId};
use crate::tenant::{Tenant, TenantType};

use super::{
    AccessStore, DepartmentStore, EngineError, GrantReader, PolicyReader, RoleGrant, TenantStore,
};

/// Unscoped fixture store used by the engine unit tests.
#[derive(Default)]
pub(crate) struct TestStore {
    pub tenants: Vec<Tenant>,
    pub departments: Vec<Department>,
    pub users: Vec<User>,
    pub grants: Vec<(UserId, RoleGrant)>,
    pub rules: Vec<PolicyRule>,
    pub roles: Vec<Role>,
    pub user_roles: Vec<UserRole>,
    pub root_locks: usize,
}

impl TestStore {
    fn live_tenant(&self, id: TenantId) -> Option<Tenant> {
        self.tenants
            .iter()
            .find(|t| t.id == id && !t.is_deleted())
            .cloned()
    }
}

impl TenantStore for TestStore {
    async fn lock_root_creation(&mut self) -> Result<(), EngineError> {
        self.root_locks += 1;
        Ok(())
    }

    async fn find_root(&mut self) -> Result<Option<Tenant>, EngineError> {
        Ok(self
            .tenants
            .iter()
            .find(|t| t.is_root() && !t.is_deleted())
            .cloned())
    }

    async fn get_tenant(&mut self, id: TenantId) -> Result<Option<Tenant>, EngineError> {
        Ok(self.live_tenant(id))
    }

    async fn lock_tenant(&mut self, id: TenantId) -> Result<Option<Tenant>, EngineError> {
        Ok(self.live_tenant(id))
    }

    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), EngineError> {
        self.tenants.push(tenant.clone());
        Ok(())
    }

    async fn update_tenant(&mut self, tenant: &Tenant) -> Result<(), EngineError> {
        if let Some(slot) = self.tenants.iter_mut().find(|t| t.id == tenant.id) {
            *slot = tenant.clone();
        }
        Ok(())
    }

    async fn count_children(&mut self, id: TenantId) -> Result<u64, EngineError> {
        Ok(self
            .tenants
            .iter()
            .filter(|t| t.parent_id == Some(id) && !t.is_deleted())
            .count() as u64)
    }

    async fn list_children(&mut self, id: TenantId) -> Result<Vec<Tenant>, EngineError> {
        Ok(self
            .tenants
            .iter()
            .filter(|t| t.parent_id == Some(id) && !t.is_deleted())
            .cloned()
            .collect())
    }

    async fn soft_delete_tenant(
        &mut self,
        id: TenantId,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if let Some(t) = self.tenants.iter_mut().find(|t| t.id == id) {
            t.deleted_at = Some(at);
            t.updated_by = actor;
        }
        Ok(())
    }

    async fn count_by_type(&mut self) -> Result<Vec<(TenantType, u64)>, EngineError> {
        Ok(TenantType::ALL
            .iter()
            .map(|ty| {
                let n = self
                    .tenants
                    .iter()
                    .filter(|t| t.tenant_type == *ty && !t.is_deleted())
                    .count();
                (*ty, n as u64)
            })
            .filter(|(_, n)| *n > 0)
            .collect())
    }
}

impl DepartmentStore for TestStore {
    async fn find_top_department(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Option<Department>, EngineError> {
        Ok(self
            .departments
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.is_top() && d.deleted_at.is_none())
            .cloned())
    }

    async fn lock_department(
        &mut self,
        id: DepartmentId,
    ) -> Result<Option<Department>, EngineError> {
        Ok(self
            .departments
            .iter()
            .find(|d| d.id == id && d.deleted_at.is_none())
            .cloned())
    }

    async fn insert_department(&mut self, department: &Department) -> Result<(), EngineError> {
        self.departments.push(department.clone());
        Ok(())
    }

    async fn count_child_departments(&mut self, id: DepartmentId) -> Result<u64, EngineError> {
        Ok(self
            .departments
            .iter()
            .filter(|d| d.parent_id == Some(id) && d.deleted_at.is_none())
            .count() as u64)
    }

    async fn list_departments(
        &mut self,
        tenant_id: TenantId,
    ) -> Result<Vec<Department>, EngineError> {
        Ok(self
            .departments
            .iter()
            .filter(|d| d.tenant_id == tenant_id && d.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn soft_delete_department(
        &mut self,
        id: DepartmentId,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if let Some(d) = self.departments.iter_mut().find(|d| d.id == id) {
            d.deleted_at = Some(at);
        }
        Ok(())
    }
}

impl GrantReader for TestStore {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, EngineError> {
        Ok(self.users.iter().find(|u| u.id == id).cloned())
    }

    async fn grants_for(
        &mut self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<RoleGrant>, EngineError> {
        Ok(self
            .grants
            .iter()
            .filter(|(u, g)| {
                *u == user_id && (g.tenant_id.is_none() || g.tenant_id == tenant_id)
            })
            .map(|(_, g)| g.clone())
            .collect())
    }
}

impl PolicyReader for TestStore {
    async fn rules_for_roles(
        &mut self,
        role_codes: &[String],
    ) -> Result<Vec<PolicyRule>, EngineError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| role_codes.contains(&r.role_code))
            .cloned()
            .collect())
    }
}

impl AccessStore for TestStore {
    async fn insert_user(&mut self, user: &User) -> Result<(), EngineError> {
        self.users.push(user.clone());
        Ok(())
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>, EngineError> {
        Ok(self.users.iter().find(|u| u.username == username).cloned())
    }

    async fn insert_role(&mut self, role: &Role) -> Result<(), EngineError> {
        self.roles.push(role.clone());
        Ok(())
    }

    async fn get_role(&mut self, id: RoleId) -> Result<Option<Role>, EngineError> {
        Ok(self.roles.iter().find(|r| r.id == id).cloned())
    }

    async fn find_role(
        &mut self,
        code: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<Role>, EngineError> {
        Ok(self
            .roles
            .iter()
            .find(|r| r.code == code && r.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_role(&mut self, role: &Role) -> Result<(), EngineError> {
        if let Some(slot) = self.roles.iter_mut().find(|r| r.id == role.id) {
            *slot = role.clone();
        }
        Ok(())
    }

    async fn delete_role(&mut self, id: RoleId) -> Result<(), EngineError> {
        self.roles.retain(|r| r.id != id);
        self.user_roles.retain(|g| g.role_id != id);
        Ok(())
    }

    async fn insert_grant(&mut self, grant: &UserRole) -> Result<(), EngineError> {
        self.user_roles.push(grant.clone());
        Ok(())
    }

    async fn get_grant(&mut self, id: GrantId) -> Result<Option<UserRole>, EngineError> {
        Ok(self.user_roles.iter().find(|g| g.id == id).cloned())
    }

    async fn find_grant(
        &mut self,
        user_id: UserId,
        role_id: RoleId,
        tenant_id: Option<TenantId>,
    ) -> Result<Option<UserRole>, EngineError> {
        Ok(self
            .user_roles
            .iter()
            .find(|g| g.user_id == user_id && g.role_id == role_id && g.tenant_id == tenant_id)
            .cloned())
    }

    async fn delete_grant(&mut self, id: GrantId) -> Result<(), EngineError> {
        self.user_roles.retain(|g| g.id != id);
        Ok(())
    }

    async fn insert_policy(&mut self, rule: &PolicyRule) -> Result<(), EngineError> {
        self.rules.push(rule.clone());
        Ok(())
    }

    async fn find_policy(
        &mut self,
        rule: &NewPolicyRule,
    ) -> Result<Option<PolicyRule>, EngineError> {
        Ok(self
            .rules
            .iter()
            .find(|r| {
                r.role_code == rule.role_code
                    && r.domain == rule.domain
                    && r.operation == rule.operation
                    && r.method == rule.method
            })
            .cloned())
    }

    async fn get_policy(&mut self, id: PolicyId) -> Result<Option<PolicyRule>, EngineError> {
        Ok(self.rules.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_policy(&mut self, id: PolicyId) -> Result<(), EngineError> {
        self.rules.retain(|r| r.id != id);
        Ok(())
    }
}
