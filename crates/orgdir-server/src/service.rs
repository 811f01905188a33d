use std::sync::Arc;
use std::time::Duration;

use orgdir_core::directory::{
    Department, NewDepartment, NewPolicyRule, NewRole, NewUser, NewUserRole, PolicyRule, Role,
    RoleUpdate, User, UserRole,
};
use orgdir_core::engine::{
    AccessAdmin, Domain, HierarchyEngine, PolicyDecisionPoint, Subject, SubjectResolver,
    TenantStatistics, Verb,
};
use orgdir_core::ids::{DepartmentId, GrantId, IdGenerator, PolicyId, RoleId, TenantId, UserId};
use orgdir_core::tenant::{NewTenant, Tenant, TenantUpdate};
use orgdir_storage::{DirectoryStore, ScopedTransaction, TenantBinder};

use crate::audit;
use crate::error::ApiError;

/// Who is calling and what they call, as declared by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    /// Raw tenant identity; parsed when the transaction is bound.
    pub tenant: Option<String>,
    pub operation: String,
    pub verb: Verb,
}

impl RequestContext {
    pub fn new(
        user_id: UserId,
        tenant: Option<&str>,
        operation: impl Into<String>,
        verb: Verb,
    ) -> Self {
        Self {
            user_id,
            tenant: tenant.map(str::to_string),
            operation: operation.into(),
            verb,
        }
    }
}

/// Runs every directory operation as: bind the caller's scope, resolve the
/// subject, enforce policy, apply the engine operation, then commit or roll
/// back. Each call is bounded by the request deadline.
pub struct DirectoryService<S: DirectoryStore> {
    pub(crate) binder: TenantBinder<S>,
    pub(crate) hierarchy: HierarchyEngine,
    pub(crate) access: AccessAdmin,
    resolver: SubjectResolver,
    pdp: PolicyDecisionPoint,
    timeout: Duration,
}

impl<S: DirectoryStore> DirectoryService<S> {
    pub fn new(store: S, ids: Arc<dyn IdGenerator>, timeout: Duration) -> Self {
        Self {
            binder: TenantBinder::new(store),
            hierarchy: HierarchyEngine::new(Arc::clone(&ids)),
            access: AccessAdmin::new(ids),
            resolver: SubjectResolver::new(),
            pdp: PolicyDecisionPoint::new(),
            timeout,
        }
    }

    pub fn store(&self) -> &S {
        self.binder.store()
    }

    async fn within_deadline<R>(
        &self,
        fut: impl Future<Output = Result<R, ApiError>>,
    ) -> Result<R, ApiError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::DeadlineExceeded),
        }
    }

    /// Binds the scope and checks the caller may run `ctx.operation`. The
    /// returned transaction is rolled back if dropped.
    async fn authorize(
        &self,
        ctx: &RequestContext,
    ) -> Result<(ScopedTransaction<S::Tx>, Subject), ApiError> {
        let mut scoped = self.binder.bind(ctx.tenant.as_deref()).await?;
        let scope = scoped.scope();

        let subject = self
            .resolver
            .resolve(scoped.tx_mut(), ctx.user_id, scope)
            .await?;

        let domain = Domain::from(scope);
        let decision = self
            .pdp
            .enforce(scoped.tx_mut(), &subject, domain, &ctx.operation, ctx.verb)
            .await?;
        if !decision.is_allowed() {
            audit::audit_access_denied(ctx.user_id, domain, &ctx.operation, ctx.verb);
            return Err(ApiError::Denied);
        }

        Ok((scoped, subject))
    }

    pub async fn create_tenant(
        &self,
        ctx: &RequestContext,
        new: NewTenant,
    ) -> Result<Tenant, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self
                .hierarchy
                .create_tenant(scoped.tx_mut(), ctx.user_id, new)
                .await;
            let tenant = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_tenant_created(ctx.user_id, &tenant);
            Ok(tenant)
        })
        .await
    }

    pub async fn get_tenant(&self, ctx: &RequestContext, id: TenantId) -> Result<Tenant, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self.hierarchy.get_tenant(scoped.tx_mut(), id).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn update_tenant(
        &self,
        ctx: &RequestContext,
        id: TenantId,
        update: TenantUpdate,
    ) -> Result<Tenant, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self
                .hierarchy
                .update_tenant(scoped.tx_mut(), ctx.user_id, id, &update)
                .await;
            let tenant = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_tenant_updated(ctx.user_id, &tenant, &update.field_names());
            Ok(tenant)
        })
        .await
    }

    pub async fn delete_tenant(
        &self,
        ctx: &RequestContext,
        id: TenantId,
    ) -> Result<Tenant, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self
                .hierarchy
                .delete_tenant(scoped.tx_mut(), ctx.user_id, id)
                .await;
            let tenant = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_tenant_deleted(ctx.user_id, &tenant);
            Ok(tenant)
        })
        .await
    }

    pub async fn list_children(
        &self,
        ctx: &RequestContext,
        id: TenantId,
    ) -> Result<Vec<Tenant>, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self.hierarchy.list_children(scoped.tx_mut(), id).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn ancestors(
        &self,
        ctx: &RequestContext,
        id: TenantId,
    ) -> Result<Vec<Tenant>, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self.hierarchy.ancestors(scoped.tx_mut(), id).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn statistics(&self, ctx: &RequestContext) -> Result<TenantStatistics, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self.hierarchy.statistics(scoped.tx_mut()).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn create_department(
        &self,
        ctx: &RequestContext,
        new: NewDepartment,
    ) -> Result<Department, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self
                .hierarchy
                .create_department(scoped.tx_mut(), ctx.user_id, new)
                .await;
            let department = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_department_created(ctx.user_id, &department);
            Ok(department)
        })
        .await
    }

    pub async fn list_departments(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
    ) -> Result<Vec<Department>, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self
                .hierarchy
                .list_departments(scoped.tx_mut(), tenant_id)
                .await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn delete_department(
        &self,
        ctx: &RequestContext,
        id: DepartmentId,
    ) -> Result<Department, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self.hierarchy.delete_department(scoped.tx_mut(), id).await;
            let department = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_department_deleted(ctx.user_id, &department);
            Ok(department)
        })
        .await
    }

    pub async fn create_user(&self, ctx: &RequestContext, new: NewUser) -> Result<User, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let result = self.access.create_user(scoped.tx_mut(), new).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn create_role(&self, ctx: &RequestContext, new: NewRole) -> Result<Role, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.create_role(scoped.tx_mut(), scope, new).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn update_role(
        &self,
        ctx: &RequestContext,
        id: RoleId,
        update: RoleUpdate,
    ) -> Result<Role, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.update_role(scoped.tx_mut(), scope, id, &update).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn delete_role(&self, ctx: &RequestContext, id: RoleId) -> Result<Role, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.delete_role(scoped.tx_mut(), scope, id).await;
            scoped.finish(result.map_err(ApiError::from)).await
        })
        .await
    }

    pub async fn grant_role(
        &self,
        ctx: &RequestContext,
        new: NewUserRole,
    ) -> Result<UserRole, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.grant_role(scoped.tx_mut(), scope, new).await;
            let grant = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_role_granted(ctx.user_id, &grant);
            Ok(grant)
        })
        .await
    }

    pub async fn revoke_role(
        &self,
        ctx: &RequestContext,
        id: GrantId,
    ) -> Result<UserRole, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.revoke_role(scoped.tx_mut(), scope, id).await;
            let grant = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_role_revoked(ctx.user_id, &grant);
            Ok(grant)
        })
        .await
    }

    pub async fn add_policy(
        &self,
        ctx: &RequestContext,
        new: NewPolicyRule,
    ) -> Result<PolicyRule, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.add_policy(scoped.tx_mut(), scope, new).await;
            let rule = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_policy_changed(ctx.user_id, &rule, "added");
            Ok(rule)
        })
        .await
    }

    pub async fn remove_policy(
        &self,
        ctx: &RequestContext,
        id: PolicyId,
    ) -> Result<PolicyRule, ApiError> {
        self.within_deadline(async {
            let (mut scoped, _) = self.authorize(ctx).await?;
            let scope = scoped.scope();
            let result = self.access.remove_policy(scoped.tx_mut(), scope, id).await;
            let rule = scoped.finish(result.map_err(ApiError::from)).await?;
            audit::audit_policy_changed(ctx.user_id, &rule, "removed");
            Ok(rule)
        })
        .await
    }

    /// The caller's resolved subject for the declared scope.
    pub async fn current_subject(&self, ctx: &RequestContext) -> Result<Subject, ApiError> {
        self.within_deadline(async {
            let (scoped, subject) = self.authorize(ctx).await?;
            scoped.commit().await?;
            Ok(subject)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgdir_core::directory::MethodPattern;
    use orgdir_core::ids::SequentialIds;
    use orgdir_core::scope::TenantScope;
    use orgdir_core::tenant::TenantType;
    use orgdir_storage::{DirectoryTx, InMemoryStore};

    const ADMIN: UserId = UserId::new(1);

    fn ctx(user: UserId, tenant: &str, operation: &str, verb: Verb) -> RequestContext {
        RequestContext::new(user, Some(tenant), operation, verb)
    }

    /// A store holding one platform admin with a wildcard rule.
    async fn service() -> DirectoryService<InMemoryStore> {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::starting_at(1));
        let service = DirectoryService::new(InMemoryStore::new(), ids, Duration::from_secs(1));

        let mut scoped = service.binder.bind(Some("0")).await.unwrap();
        let tx = scoped.tx_mut();
        let admin = service
            .access
            .create_user(tx, NewUser::new("admin", "Admin"))
            .await
            .unwrap();
        assert_eq!(admin.id, ADMIN);
        let role = service
            .access
            .create_role(
                tx,
                TenantScope::Platform,
                NewRole::platform("super_admin", "Super").system(),
            )
            .await
            .unwrap();
        service
            .access
            .add_policy(
                tx,
                TenantScope::Platform,
                NewPolicyRule::new("super_admin", Domain::Any, "*", MethodPattern::Any),
            )
            .await
            .unwrap();
        service
            .access
            .grant_role(
                tx,
                TenantScope::Platform,
                NewUserRole {
                    user_id: admin.id,
                    role_id: role.id,
                    tenant_id: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        scoped.commit().await.unwrap();
        service
    }

    #[tokio::test]
    async fn allowed_operation_commits() {
        let service = service().await;
        let create = ctx(ADMIN, "0", "/v1/tenants", Verb::Create);
        let root = service
            .create_tenant(&create, NewTenant::new(TenantType::Root, "root", ADMIN))
            .await
            .unwrap();

        let get = ctx(ADMIN, "0", "/v1/tenants/{id}", Verb::Read);
        let found = service.get_tenant(&get, root.id).await.unwrap();
        assert_eq!(found.id, root.id);
    }

    #[tokio::test]
    async fn caller_without_rules_is_denied() {
        let service = service().await;
        let user = service
            .create_user(
                &ctx(ADMIN, "0", "/v1/users", Verb::Create),
                NewUser::new("bob", "Bob"),
            )
            .await
            .unwrap();

        let err = service
            .statistics(&ctx(user.id, "0", "/v1/tenant-statistics", Verb::Read))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Denied));
    }

    #[tokio::test]
    async fn unknown_caller_is_unauthenticated() {
        let service = service().await;
        let err = service
            .statistics(&ctx(UserId::new(999), "0", "/v1/tenant-statistics", Verb::Read))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
    }

    #[tokio::test]
    async fn missing_tenant_identity_is_rejected() {
        let service = service().await;
        let request = RequestContext::new(ADMIN, None, "/v1/tenant-statistics", Verb::Read);
        let err = service.statistics(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn invariant_failure_rolls_back() {
        let service = service().await;
        let create = ctx(ADMIN, "0", "/v1/tenants", Verb::Create);
        service
            .create_tenant(&create, NewTenant::new(TenantType::Root, "root", ADMIN))
            .await
            .unwrap();

        let err = service
            .create_tenant(&create, NewTenant::new(TenantType::Root, "again", ADMIN))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_ROOT");

        let stats = service
            .statistics(&ctx(ADMIN, "0", "/v1/tenant-statistics", Verb::Read))
            .await
            .unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn deadline_expiry_is_reported() {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::starting_at(1));
        let store = InMemoryStore::new();
        let service = DirectoryService::new(store.clone(), ids, Duration::from_millis(50));

        let held = store
            .begin(TenantScope::Platform)
            .await
            .unwrap();
        let err = service
            .statistics(&ctx(ADMIN, "0", "/v1/tenant-statistics", Verb::Read))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DeadlineExceeded));
        held.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn current_subject_reports_platform_roles() {
        let service = service().await;
        let subject = service
            .current_subject(&ctx(ADMIN, "0", "/v1/subject", Verb::Read))
            .await
            .unwrap();
        assert!(subject.is_platform);
        assert!(subject.has_role("super_admin"));
    }
}
