use orgdir_core::directory::{
    MethodPattern, NewDepartment, NewPolicyRule, NewRole, NewUser, NewUserRole,
};
use orgdir_core::engine::{AccessStore, DepartmentStore, Domain, EngineError, TenantStore};
use orgdir_core::ids::{DepartmentId, RoleId, TenantId, UserId};
use orgdir_core::scope::TenantScope;
use orgdir_core::tenant::{NewTenant, TenantStatus, TenantType};
use orgdir_storage::DirectoryStore;

use crate::config::BootstrapConfig;
use crate::error::ApiError;
use crate::service::DirectoryService;

/// Actor recorded on rows written during initialization.
pub const SYSTEM_ACTOR: UserId = UserId::new(0);

pub const SUPER_ADMIN_ROLE: &str = "super_admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub root_tenant: TenantId,
    pub root_department: DepartmentId,
    pub admin_user: UserId,
    pub super_admin_role: RoleId,
    /// Names of the records this run had to create.
    pub created: Vec<&'static str>,
}

impl<S: DirectoryStore> DirectoryService<S> {
    /// Ensures the platform's built-in records exist. Safe to run on every
    /// start: records already present are left untouched.
    pub async fn bootstrap(&self, config: &BootstrapConfig) -> Result<BootstrapReport, ApiError> {
        let mut scoped = self.binder.bind_scope(TenantScope::Platform).await?;
        let result = self.ensure_builtins(scoped.tx_mut(), config).await;
        let report = scoped.finish(result.map_err(ApiError::from)).await?;

        if report.created.is_empty() {
            tracing::info!(root_tenant = %report.root_tenant, "bootstrap: nothing to do");
        } else {
            tracing::info!(
                root_tenant = %report.root_tenant,
                admin_user = %report.admin_user,
                created = report.created.join(",").as_str(),
                "bootstrap completed"
            );
        }
        Ok(report)
    }

    async fn ensure_builtins(
        &self,
        tx: &mut S::Tx,
        config: &BootstrapConfig,
    ) -> Result<BootstrapReport, EngineError> {
        let mut created = Vec::new();

        let root = match tx.find_root().await? {
            Some(root) => root,
            None => {
                created.push("root_tenant");
                let new = NewTenant::new(
                    TenantType::Root,
                    config.root_tenant_name.as_str(),
                    UserId::new(config.root_owner_id),
                )
                .with_status(TenantStatus::Active);
                self.hierarchy.create_tenant(tx, SYSTEM_ACTOR, new).await?
            }
        };

        let department = match tx.find_top_department(root.id).await? {
            Some(department) => department,
            None => {
                created.push("root_department");
                let new = NewDepartment::top(root.id, config.root_department_name.as_str());
                self.hierarchy
                    .create_department(tx, SYSTEM_ACTOR, new)
                    .await?
            }
        };

        let admin = match tx.find_user_by_username(&config.admin_username).await? {
            Some(user) => user,
            None => {
                created.push("admin_user");
                let new = NewUser::new(
                    config.admin_username.as_str(),
                    config.admin_full_name.as_str(),
                );
                self.access.create_user(tx, new).await?
            }
        };

        let role = match tx.find_role(SUPER_ADMIN_ROLE, None).await? {
            Some(role) => role,
            None => {
                created.push("super_admin_role");
                let new = NewRole::platform(SUPER_ADMIN_ROLE, "Super Administrator").system();
                self.access.create_role(tx, TenantScope::Platform, new).await?
            }
        };

        let rule = NewPolicyRule::new(SUPER_ADMIN_ROLE, Domain::Any, "*", MethodPattern::Any);
        if tx.find_policy(&rule).await?.is_none() {
            created.push("super_admin_policy");
            self.access.add_policy(tx, TenantScope::Platform, rule).await?;
        }

        if tx.find_grant(admin.id, role.id, None).await?.is_none() {
            created.push("admin_grant");
            let grant = NewUserRole {
                user_id: admin.id,
                role_id: role.id,
                tenant_id: None,
                expires_at: None,
            };
            self.access.grant_role(tx, TenantScope::Platform, grant).await?;
        }

        Ok(BootstrapReport {
            root_tenant: root.id,
            root_department: department.id,
            admin_user: admin.id,
            super_admin_role: role.id,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use orgdir_core::engine::Verb;
    use orgdir_core::ids::{IdGenerator, SequentialIds};
    use orgdir_storage::InMemoryStore;

    use crate::service::RequestContext;

    fn service() -> DirectoryService<InMemoryStore> {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::starting_at(100));
        DirectoryService::new(InMemoryStore::new(), ids, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn first_run_creates_every_builtin() {
        let service = service();
        let report = service
            .bootstrap(&BootstrapConfig::default())
            .await
            .unwrap();

        assert_eq!(
            report.created,
            vec![
                "root_tenant",
                "root_department",
                "admin_user",
                "super_admin_role",
                "super_admin_policy",
                "admin_grant",
            ]
        );
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let service = service();
        let first = service
            .bootstrap(&BootstrapConfig::default())
            .await
            .unwrap();
        let second = service
            .bootstrap(&BootstrapConfig::default())
            .await
            .unwrap();

        assert!(second.created.is_empty());
        assert_eq!(first.root_tenant, second.root_tenant);
        assert_eq!(first.admin_user, second.admin_user);
        assert_eq!(first.super_admin_role, second.super_admin_role);
    }

    #[tokio::test]
    async fn admin_can_act_after_bootstrap() {
        let service = service();
        let report = service
            .bootstrap(&BootstrapConfig::default())
            .await
            .unwrap();

        let ctx = RequestContext::new(
            report.admin_user,
            Some("0"),
            "/v1/tenants/{id}",
            Verb::Read,
        );
        let root = service.get_tenant(&ctx, report.root_tenant).await.unwrap();
        assert_eq!(root.tenant_type, TenantType::Root);
        assert_eq!(root.status, TenantStatus::Active);
        assert_eq!(root.name, BootstrapConfig::default().root_tenant_name);
    }
}
