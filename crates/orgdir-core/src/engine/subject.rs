use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::UserStatus;
use crate::ids::{TenantId, UserId};
use crate::scope::TenantScope;

use super::{Domain, EngineError, GrantReader};

/// A role assignment joined with the state of its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub role_code: String,
    pub role_active: bool,
    pub tenant_id: Option<TenantId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleGrant {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.role_active && self.expires_at.is_none_or(|at| at > now)
    }
}

/// The caller as seen by authorization for one request. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub user_id: UserId,
    pub username: String,
    #[serde(rename = "tenant_id")]
    pub scope: TenantScope,
    pub is_platform: bool,
    pub platform_roles: BTreeSet<String>,
    pub tenant_roles: BTreeSet<String>,
}

impl Subject {
    pub fn new(user_id: UserId, username: impl Into<String>, scope: TenantScope) -> Self {
        Self {
            user_id,
            username: username.into(),
            scope,
            is_platform: false,
            platform_roles: BTreeSet::new(),
            tenant_roles: BTreeSet::new(),
        }
    }

    pub fn with_platform_role(mut self, code: impl Into<String>) -> Self {
        self.platform_roles.insert(code.into());
        self.is_platform = true;
        self
    }

    pub fn with_tenant_role(mut self, code: impl Into<String>) -> Self {
        self.tenant_roles.insert(code.into());
        self
    }

    pub fn role_codes(&self) -> BTreeSet<&str> {
        self.platform_roles
            .iter()
            .chain(&self.tenant_roles)
            .map(String::as_str)
            .collect()
    }

    pub fn has_role(&self, code: &str) -> bool {
        self.platform_roles.contains(code) || self.tenant_roles.contains(code)
    }

    /// Role codes that may take part in a decision for `domain`: platform roles
    /// always, tenant roles only inside the subject's own tenant.
    pub fn roles_for_domain(&self, domain: Domain) -> BTreeSet<&str> {
        let mut roles: BTreeSet<&str> = self.platform_roles.iter().map(String::as_str).collect();
        if let (Domain::Tenant(requested), Some(own)) = (domain, self.scope.tenant_id()) {
            if requested == own {
                roles.extend(self.tenant_roles.iter().map(String::as_str));
            }
        }
        roles
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectResolver;

impl SubjectResolver {
    pub fn new() -> Self {
        Self
    }

    pub async fn resolve<S: GrantReader>(
        &self,
        store: &mut S,
        user_id: UserId,
        scope: TenantScope,
    ) -> Result<Subject, EngineError> {
        self.resolve_at(store, user_id, scope, Utc::now()).await
    }

    pub async fn resolve_at<S: GrantReader>(
        &self,
        store: &mut S,
        user_id: UserId,
        scope: TenantScope,
        now: DateTime<Utc>,
    ) -> Result<Subject, EngineError> {
        let user = store
            .find_user(user_id)
            .await?
            .ok_or(EngineError::UnknownUser(user_id))?;
        if user.status == UserStatus::Disabled {
            return Err(EngineError::DisabledUser(user_id));
        }

        let mut subject = Subject::new(user_id, user.username, scope);
        let active_tenant = scope.tenant_id();
        for grant in store.grants_for(user_id, active_tenant).await? {
            if !grant.is_effective(now) {
                continue;
            }
            match grant.tenant_id {
                None => subject = subject.with_platform_role(grant.role_code),
                Some(t) if Some(t) == active_tenant => {
                    subject = subject.with_tenant_role(grant.role_code)
                }
                Some(_) => {}
            }
        }
        Ok(subject)
    }
}
