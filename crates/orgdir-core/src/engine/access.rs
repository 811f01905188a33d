use std::sync::Arc;

use chrono::Utc;

use crate::directory::{
    NewPolicyRule, NewRole, NewUser, NewUserRole, PolicyRule, Role, RoleUpdate, User, UserRole,
};
use crate::ids::{GrantId, IdGenerator, PolicyId, RoleId, TenantId, UserId};
use crate::scope::TenantScope;

use super::{AccessStore, EngineError, GrantReader, InvariantError};

fn ensure_writable(scope: TenantScope, owner: Option<TenantId>) -> Result<(), EngineError> {
    if scope.can_write(owner) {
        Ok(())
    } else {
        Err(EngineError::ScopeViolation)
    }
}

/// Administrative writes to users, roles, grants and policy rules. Runs inside
/// the caller's transaction like [`HierarchyEngine`](super::HierarchyEngine).
///
/// Roles, grants and rules owned by the platform are written only from the
/// platform scope. A tenant scope administers the rows of its own tenant.
#[derive(Clone)]
pub struct AccessAdmin {
    ids: Arc<dyn IdGenerator>,
}

impl AccessAdmin {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub async fn create_user<S: AccessStore>(
        &self,
        store: &mut S,
        new: NewUser,
    ) -> Result<User, EngineError> {
        if store.find_user_by_username(&new.username).await?.is_some() {
            return Err(InvariantError::Duplicate {
                kind: "user",
                key: new.username,
            }
            .into());
        }

        let now = Utc::now();
        let user = User {
            id: UserId::new(self.ids.next_id()?),
            username: new.username,
            full_name: new.full_name,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).await?;
        Ok(user)
    }

    pub async fn create_role<S: AccessStore>(
        &self,
        store: &mut S,
        scope: TenantScope,
        new: NewRole,
    ) -> Result<Role, EngineError> {
        ensure_writable(scope, new.tenant_id)?;
        if store.find_role(&new.code, new.tenant_id).await?.is_some() {
            return Err(InvariantError::Duplicate {
                kind: "role",
                key: new.code,
            }
            .into());
        }

        let now = Utc::now();
        let role = Role {
            id: RoleId::new(self.ids.next_id()?),
            code: new.code,
            name: new.name,
            tenant_id: new.tenant_id,
            is_system: new.is_system,
            description: new.description,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_role(&role).await?;
        Ok(role)
    }

    pub async fn update_role<S: AccessStore>(
        &self,
        store: &mut S,
        scope: TenantScope,
        id: RoleId,
        update: &RoleUpdate,
    ) -> Result<Role, EngineError> {
        let mut role = store
            .get_role(id)
            .await?
            .ok_or(EngineError::not_found("role", id))?;
        ensure_writable(scope, role.tenant_id)?;
        role.ensure_mutable()?;
        if update.is_empty() {
            return Ok(role);
        }
        update.apply(&mut role, Utc::now());
        store.update_role(&role).await?;
        Ok(role)
    }

    pub async fn delete_role<S: AccessStore>(
        &self,
        store: &mut S,
        scope: TenantScope,
        id: RoleId,
    ) -> Result<Role, EngineError> {
        let role = store
            .get_role(id)
            .await?
            .ok_or(EngineError::not_found("role", id))?;
        ensure_writable(scope, role.tenant_id)?;
        role.ensure_mutable()?;
        store.delete_role(id).await?;
        Ok(role)
    }

    /// Grants a role. A tenant role can only be granted inside its own tenant.
    /// A platform role can be granted platform-wide or in a single tenant, but
    /// only from the platform scope.
    pub async fn grant_role<S: AccessStore + GrantReader>(
        &self,
        store: &mut S,
        scope: TenantScope,
        new: NewUserRole,
    ) -> Result<UserRole, EngineError> {
        ensure_writable(scope, new.tenant_id)?;
        store
            .find_user(new.user_id)
            .await?
            .ok_or(EngineError::not_found("user", new.user_id))?;
        let role = store
            .get_role(new.role_id)
            .await?
            .ok_or(EngineError::not_found("role", new.role_id))?;
        ensure_writable(scope, role.tenant_id)?;

        if let Some(role_tenant) = role.tenant_id
            && new.tenant_id != Some(role_tenant)
        {
            return Err(InvariantError::RoleTenantMismatch {
                role: role.code,
                scope: new
                    .tenant_id
                    .map_or_else(|| "the platform".to_string(), |t| format!("tenant {t}")),
            }
            .into());
        }

        if store
            .find_grant(new.user_id, new.role_id, new.tenant_id)
            .await?
            .is_some()
        {
            return Err(InvariantError::Duplicate {
                kind: "user role",
                key: format!("{}:{}", new.user_id, role.code),
            }
            .into());
        }

        let grant = UserRole {
            id: GrantId::new(self.ids.next_id()?),
            user_id: new.user_id,
            role_id: new.role_id,
            tenant_id: new.tenant_id,
            granted_at: Utc::now(),
            expires_at: new.expires_at,
        };
        store.insert_grant(&grant).await?;
        Ok(grant)
    }

    pub async fn revoke_role<S: AccessStore>(
        &self,
        store: &mut S,
        scope: TenantScope,
        id: GrantId,
    ) -> Result<UserRole, EngineError> {
        let grant = store
            .get_grant(id)
            .await?
            .ok_or(EngineError::not_found("user role", id))?;
        ensure_writable(scope, grant.tenant_id)?;
        store.delete_grant(id).await?;
        Ok(grant)
    }

    /// Adds a rule. From a tenant scope the rule must be for that tenant's
    /// domain and name one of that tenant's roles.
    pub async fn add_policy<S: AccessStore>(
        &self,
        store: &mut S,
        scope: TenantScope,
        new: NewPolicyRule,
    ) -> Result<PolicyRule, EngineError> {
        ensure_writable(scope, new.domain.tenant_id())?;
        if let Some(tenant) = scope.tenant_id()
            && store.find_role(&new.role_code, Some(tenant)).await?.is_none()
        {
            return Err(EngineError::ScopeViolation);
        }
        if let Some(existing) = store.find_policy(&new).await? {
            return Err(InvariantError::Duplicate {
                kind: "policy",
                key: existing.to_string(),
            }
            .into());
        }
        let rule = new.with_id(PolicyId::new(self.ids.next_id()?));
        store.insert_policy(&rule).await?;
        Ok(rule)
    }

    pub async fn remove_policy<S: AccessStore>(
        &self,
        store: &mut S,
        scope: TenantScope,
        id: PolicyId,
    ) -> Result<PolicyRule, EngineError> {
        let rule = store
            .get_policy(id)
            .await?
            .ok_or(EngineError::not_found("policy", id))?;
        ensure_writable(scope, rule.domain.tenant_id())?;
        store.delete_policy(id).await?;
        Ok(rule)
    }
}
