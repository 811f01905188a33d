use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::directory::{Department, NewDepartment};
use crate::ids::{DepartmentId, IdGenerator, TenantId, UserId};
use crate::tenant::{NewTenant, Tenant, TenantField, TenantType, TenantUpdate};

use super::{DepartmentStore, EngineError, InvariantError, TenantStore};

/// Builds the ROOT row. The caller has already established that no ROOT exists.
pub fn plan_root(id: TenantId, new: NewTenant, actor: UserId, now: DateTime<Utc>) -> Tenant {
    Tenant {
        id,
        name: new.name,
        owner_id: new.owner_id,
        tenant_type: TenantType::Root,
        parent_id: None,
        path: id.to_string(),
        level: 0,
        status: new.status.unwrap_or_default(),
        expired_at: new.expired_at,
        attributes: new.attributes,
        created_by: actor,
        updated_by: actor,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// Builds a non-ROOT row under `parent`, checking the parent's type.
pub fn plan_child(
    id: TenantId,
    parent: &Tenant,
    new: NewTenant,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Tenant, InvariantError> {
    let Some(required) = new.tenant_type.required_parent() else {
        return Err(InvariantError::DuplicateRoot);
    };
    if parent.tenant_type != required {
        return Err(InvariantError::InvalidParentType {
            child: new.tenant_type,
            parent: parent.tenant_type,
        });
    }

    Ok(Tenant {
        id,
        name: new.name,
        owner_id: new.owner_id,
        tenant_type: new.tenant_type,
        parent_id: Some(parent.id),
        path: format!("{}.{}", parent.path, id),
        level: parent.level + 1,
        status: new.status.unwrap_or_default(),
        expired_at: new.expired_at,
        attributes: new.attributes,
        created_by: actor,
        updated_by: actor,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

/// Applies whitelisted fields to a copy of `current`. Structural fields are
/// refused for every tenant before the ROOT check runs.
pub fn plan_update(
    current: &Tenant,
    update: &TenantUpdate,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Tenant, InvariantError> {
    if let Some(field) = update.protected_field() {
        return Err(InvariantError::ImmutableField(field.name()));
    }
    if current.is_root() && !update.is_empty() {
        return Err(InvariantError::ForbiddenOnRoot);
    }

    let mut next = current.clone();
    for field in &update.fields {
        match field {
            TenantField::Name(name) => next.name = name.clone(),
            TenantField::OwnerId(owner) => next.owner_id = *owner,
            TenantField::Status(status) => next.status = *status,
            TenantField::ExpiredAt(at) => next.expired_at = *at,
            TenantField::Attributes(attrs) => next.attributes = attrs.clone(),
            TenantField::Level | TenantField::Path | TenantField::ParentId | TenantField::Type => {
                return Err(InvariantError::ImmutableField(field.name()));
            }
        }
    }
    if !update.is_empty() {
        next.updated_by = actor;
        next.updated_at = now;
    }
    Ok(next)
}

pub fn check_delete(tenant: &Tenant, live_children: u64) -> Result<(), InvariantError> {
    if tenant.is_root() {
        return Err(InvariantError::ForbiddenOnRoot);
    }
    if live_children > 0 {
        return Err(InvariantError::HasChildren {
            kind: "tenant",
            id: tenant.id.value(),
            count: live_children,
        });
    }
    Ok(())
}

/// Builds a department row. `parent` is `None` for the tenant's top department.
pub fn plan_department(
    id: DepartmentId,
    parent: Option<&Department>,
    new: NewDepartment,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Department, InvariantError> {
    let path = match parent {
        None => id.to_string(),
        Some(parent) => {
            if parent.tenant_id != new.tenant_id {
                return Err(InvariantError::DepartmentTenantMismatch {
                    department: parent.id,
                    expected: new.tenant_id,
                    actual: parent.tenant_id,
                });
            }
            format!("{}.{}", parent.path, id)
        }
    };

    Ok(Department {
        id,
        tenant_id: new.tenant_id,
        parent_id: parent.map(|p| p.id),
        name: new.name,
        path,
        attributes: new.attributes,
        created_by: actor,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantStatistics {
    pub total: u64,
    pub by_type: BTreeMap<TenantType, u64>,
}

/// Owns every write to tenant structure. All methods run inside the caller's
/// transaction and never commit on their own.
#[derive(Clone)]
pub struct HierarchyEngine {
    ids: Arc<dyn IdGenerator>,
}

impl HierarchyEngine {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub async fn create_tenant<S: TenantStore>(
        &self,
        store: &mut S,
        actor: UserId,
        new: NewTenant,
    ) -> Result<Tenant, EngineError> {
        let id = TenantId::new(self.ids.next_id()?);
        let now = Utc::now();

        let tenant = if new.tenant_type == TenantType::Root {
            store.lock_root_creation().await?;
            // A tenant scope cannot see ROOT, but any visible tenant lies under it.
            if store.find_root().await?.is_some()
                || store.count_by_type().await?.iter().any(|(_, n)| *n > 0)
            {
                return Err(InvariantError::DuplicateRoot.into());
            }
            plan_root(id, new, actor, now)
        } else {
            let parent_id = new
                .parent_id
                .ok_or(InvariantError::MissingParent(new.tenant_type))?;
            let parent = store.lock_tenant(parent_id).await?.ok_or(
                InvariantError::ParentNotFound {
                    kind: "tenant",
                    id: parent_id.value(),
                },
            )?;
            plan_child(id, &parent, new, actor, now)?
        };

        store.insert_tenant(&tenant).await?;
        tracing::debug!(tenant_id = %tenant.id, path = %tenant.path, "tenant planned and inserted");
        Ok(tenant)
    }

    pub async fn update_tenant<S: TenantStore>(
        &self,
        store: &mut S,
        actor: UserId,
        id: TenantId,
        update: &TenantUpdate,
    ) -> Result<Tenant, EngineError> {
        if let Some(field) = update.protected_field() {
            return Err(InvariantError::ImmutableField(field.name()).into());
        }

        let current = store
            .lock_tenant(id)
            .await?
            .ok_or(EngineError::not_found("tenant", id))?;
        let next = plan_update(&current, update, actor, Utc::now())?;
        if next != current {
            store.update_tenant(&next).await?;
        }
        Ok(next)
    }

    pub async fn delete_tenant<S: TenantStore>(
        &self,
        store: &mut S,
        actor: UserId,
        id: TenantId,
    ) -> Result<Tenant, EngineError> {
        let tenant = store
            .lock_tenant(id)
            .await?
            .ok_or(EngineError::not_found("tenant", id))?;
        if tenant.is_root() {
            return Err(InvariantError::ForbiddenOnRoot.into());
        }
        let children = store.count_children(id).await?;
        check_delete(&tenant, children)?;

        let at = Utc::now();
        store.soft_delete_tenant(id, actor, at).await?;
        Ok(Tenant {
            deleted_at: Some(at),
            updated_by: actor,
            updated_at: at,
            ..tenant
        })
    }

    pub async fn get_tenant<S: TenantStore>(
        &self,
        store: &mut S,
        id: TenantId,
    ) -> Result<Tenant, EngineError> {
        store
            .get_tenant(id)
            .await?
            .ok_or(EngineError::not_found("tenant", id))
    }

    pub async fn list_children<S: TenantStore>(
        &self,
        store: &mut S,
        id: TenantId,
    ) -> Result<Vec<Tenant>, EngineError> {
        self.get_tenant(store, id).await?;
        store.list_children(id).await
    }

    /// Walks the materialized path from ROOT down to `id`. Ancestors hidden by
    /// the current scope are left out.
    pub async fn ancestors<S: TenantStore>(
        &self,
        store: &mut S,
        id: TenantId,
    ) -> Result<Vec<Tenant>, EngineError> {
        let tenant = self.get_tenant(store, id).await?;
        let mut chain = Vec::new();
        for ancestor_id in tenant.path_ids() {
            if ancestor_id == tenant.id {
                continue;
            }
            if let Some(ancestor) = store.get_tenant(ancestor_id).await? {
                chain.push(ancestor);
            }
        }
        chain.push(tenant);
        Ok(chain)
    }

    pub async fn statistics<S: TenantStore>(
        &self,
        store: &mut S,
    ) -> Result<TenantStatistics, EngineError> {
        let by_type: BTreeMap<_, _> = store.count_by_type().await?.into_iter().collect();
        Ok(TenantStatistics {
            total: by_type.values().sum(),
            by_type,
        })
    }

    pub async fn create_department<S: TenantStore + DepartmentStore>(
        &self,
        store: &mut S,
        actor: UserId,
        new: NewDepartment,
    ) -> Result<Department, EngineError> {
        let id = DepartmentId::new(self.ids.next_id()?);

        store
            .lock_tenant(new.tenant_id)
            .await?
            .ok_or(InvariantError::ParentNotFound {
                kind: "tenant",
                id: new.tenant_id.value(),
            })?;

        let parent = match new.parent_id {
            None => {
                if store.find_top_department(new.tenant_id).await?.is_some() {
                    return Err(InvariantError::DuplicateTopDepartment(new.tenant_id).into());
                }
                None
            }
            Some(parent_id) => Some(store.lock_department(parent_id).await?.ok_or(
                InvariantError::ParentNotFound {
                    kind: "department",
                    id: parent_id.value(),
                },
            )?),
        };

        let department = plan_department(id, parent.as_ref(), new, actor, Utc::now())?;
        store.insert_department(&department).await?;
        Ok(department)
    }

    pub async fn delete_department<S: DepartmentStore>(
        &self,
        store: &mut S,
        id: DepartmentId,
    ) -> Result<Department, EngineError> {
        let department = store
            .lock_department(id)
            .await?
            .ok_or(EngineError::not_found("department", id))?;
        let children = store.count_child_departments(id).await?;
        if children > 0 {
            return Err(InvariantError::HasChildren {
                kind: "department",
                id: id.value(),
                count: children,
            }
            .into());
        }

        let at = Utc::now();
        store.soft_delete_department(id, at).await?;
        Ok(Department {
            deleted_at: Some(at),
            ..department
        })
    }

    pub async fn list_departments<S: TenantStore + DepartmentStore>(
        &self,
        store: &mut S,
        tenant_id: TenantId,
    ) -> Result<Vec<Department>, EngineError> {
        self.get_tenant(store, tenant_id).await?;
        store.list_departments(tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::TestStore;
    use crate::ids::SequentialIds;
    use crate::tenant::TenantStatus;

    const ACTOR: UserId = UserId::new(1);

    fn engine() -> HierarchyEngine {
        HierarchyEngine::new(Arc::new(SequentialIds::starting_at(100)))
    }

    async fn seeded() -> (HierarchyEngine, TestStore, Tenant, Tenant) {
        let engine = engine();
        let mut store = TestStore::default();
        let root = engine
            .create_tenant(&mut store, ACTOR, NewTenant::new(TenantType::Root, "root", ACTOR))
            .await
            .unwrap();
        let group = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Group, "group", ACTOR).with_parent(root.id),
            )
            .await
            .unwrap();
        (engine, store, root, group)
    }

    #[tokio::test]
    async fn root_has_level_zero_and_own_path() {
        let (_, store, root, _) = seeded().await;
        assert_eq!(root.level, 0);
        assert_eq!(root.path, root.id.to_string());
        assert_eq!(root.parent_id, None);
        assert_eq!(root.status, TenantStatus::Pending);
        assert_eq!(store.root_locks, 1);
    }

    #[tokio::test]
    async fn child_extends_parent_path_and_level() {
        let (engine, mut store, root, group) = seeded().await;
        let sub = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Sub, "sub", ACTOR).with_parent(group.id),
            )
            .await
            .unwrap();

        assert_eq!(group.level, root.level + 1);
        assert_eq!(sub.level, group.level + 1);
        assert_eq!(sub.path, format!("{}.{}", group.path, sub.id));
        assert_eq!(sub.path_ids(), vec![root.id, group.id, sub.id]);
    }

    #[tokio::test]
    async fn second_root_is_rejected() {
        let (engine, mut store, _, _) = seeded().await;
        let err = engine
            .create_tenant(&mut store, ACTOR, NewTenant::new(TenantType::Root, "again", ACTOR))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::DuplicateRoot)
        ));
        assert_eq!(store.tenants.iter().filter(|t| t.is_root()).count(), 1);
    }

    #[tokio::test]
    async fn non_root_without_parent_is_rejected() {
        let (engine, mut store, _, _) = seeded().await;
        let err = engine
            .create_tenant(&mut store, ACTOR, NewTenant::new(TenantType::Normal, "n", ACTOR))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::MissingParent(TenantType::Normal))
        ));
    }

    #[tokio::test]
    async fn missing_parent_row_is_parent_not_found() {
        let (engine, mut store, _, _) = seeded().await;
        let err = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Sub, "s", ACTOR).with_parent(TenantId::new(9_999)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::ParentNotFound { id: 9_999, .. })
        ));
    }

    #[tokio::test]
    async fn sub_under_normal_is_invalid_parent_type() {
        let (engine, mut store, root, _) = seeded().await;
        let normal = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Normal, "normal", ACTOR).with_parent(root.id),
            )
            .await
            .unwrap();
        let err = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Sub, "s", ACTOR).with_parent(normal.id),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::InvalidParentType {
                child: TenantType::Sub,
                parent: TenantType::Normal
            })
        ));
    }

    #[tokio::test]
    async fn group_under_group_is_invalid_parent_type() {
        let (engine, mut store, _, group) = seeded().await;
        let err = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Group, "g2", ACTOR).with_parent(group.id),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::InvalidParentType { .. })
        ));
    }

    #[tokio::test]
    async fn structural_fields_are_immutable_even_on_root() {
        let (engine, mut store, root, group) = seeded().await;
        for field in [
            TenantField::Type,
            TenantField::ParentId,
            TenantField::Level,
            TenantField::Path,
        ] {
            for id in [root.id, group.id] {
                let update = TenantUpdate::new().set(field.clone());
                let err = engine
                    .update_tenant(&mut store, ACTOR, id, &update)
                    .await
                    .unwrap_err();
                assert!(
                    matches!(err, EngineError::Invariant(InvariantError::ImmutableField(_))),
                    "{field:?} on {id}"
                );
            }
        }
    }

    #[tokio::test]
    async fn root_cannot_be_updated() {
        let (engine, mut store, root, _) = seeded().await;
        let update = TenantUpdate::new().set(TenantField::Name("renamed".into()));
        let err = engine
            .update_tenant(&mut store, ACTOR, root.id, &update)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::ForbiddenOnRoot)
        ));
    }

    #[tokio::test]
    async fn whitelisted_update_is_applied() {
        let (engine, mut store, _, group) = seeded().await;
        let update = TenantUpdate::new()
            .set(TenantField::Name("renamed".into()))
            .set(TenantField::Status(TenantStatus::Active));
        let updated = engine
            .update_tenant(&mut store, UserId::new(2), group.id, &update)
            .await
            .unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.status, TenantStatus::Active);
        assert_eq!(updated.updated_by, UserId::new(2));
        assert_eq!(updated.path, group.path);
        assert_eq!(store.tenants[1].name, "renamed");
    }

    #[tokio::test]
    async fn update_of_unknown_tenant_is_not_found() {
        let (engine, mut store, _, _) = seeded().await;
        let update = TenantUpdate::new().set(TenantField::Name("x".into()));
        let err = engine
            .update_tenant(&mut store, ACTOR, TenantId::new(5), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "tenant", id: 5 }));
    }

    #[tokio::test]
    async fn delete_with_live_child_fails_then_succeeds() {
        let (engine, mut store, _, group) = seeded().await;
        let sub = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Sub, "sub", ACTOR).with_parent(group.id),
            )
            .await
            .unwrap();

        let err = engine
            .delete_tenant(&mut store, ACTOR, group.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::HasChildren { count: 1, .. })
        ));

        let deleted = engine.delete_tenant(&mut store, ACTOR, sub.id).await.unwrap();
        assert!(deleted.deleted_at.is_some());
        assert_eq!(store.tenants.len(), 3, "soft delete keeps the row");
        assert!(engine.list_children(&mut store, group.id).await.unwrap().is_empty());

        engine.delete_tenant(&mut store, ACTOR, group.id).await.unwrap();
    }

    #[tokio::test]
    async fn root_cannot_be_deleted() {
        let (engine, mut store, root, _) = seeded().await;
        let err = engine
            .delete_tenant(&mut store, ACTOR, root.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::ForbiddenOnRoot)
        ));
    }

    #[tokio::test]
    async fn ancestors_run_from_root_to_tenant() {
        let (engine, mut store, root, group) = seeded().await;
        let sub = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Sub, "sub", ACTOR).with_parent(group.id),
            )
            .await
            .unwrap();

        let chain: Vec<_> = engine
            .ancestors(&mut store, sub.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(chain, vec![root.id, group.id, sub.id]);
    }

    #[tokio::test]
    async fn statistics_count_live_tenants_by_type() {
        let (engine, mut store, root, _) = seeded().await;
        let normal = engine
            .create_tenant(
                &mut store,
                ACTOR,
                NewTenant::new(TenantType::Normal, "n", ACTOR).with_parent(root.id),
            )
            .await
            .unwrap();
        engine.delete_tenant(&mut store, ACTOR, normal.id).await.unwrap();

        let stats = engine.statistics(&mut store).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.get(&TenantType::Group), Some(&1));
        assert_eq!(stats.by_type.get(&TenantType::Normal), None);
    }

    #[tokio::test]
    async fn departments_follow_tenant_rules() {
        let (engine, mut store, _, group) = seeded().await;
        let top = engine
            .create_department(&mut store, ACTOR, NewDepartment::top(group.id, "HQ"))
            .await
            .unwrap();
        assert_eq!(top.path, top.id.to_string());

        let err = engine
            .create_department(&mut store, ACTOR, NewDepartment::top(group.id, "HQ2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::DuplicateTopDepartment(_))
        ));

        let child = engine
            .create_department(
                &mut store,
                ACTOR,
                NewDepartment::under(group.id, top.id, "Sales"),
            )
            .await
            .unwrap();
        assert_eq!(child.path, format!("{}.{}", top.path, child.id));

        let err = engine
            .delete_department(&mut store, top.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::HasChildren { kind: "department", .. })
        ));

        engine.delete_department(&mut store, child.id).await.unwrap();
        let listed = engine.list_departments(&mut store, group.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn department_parent_must_share_tenant() {
        let (engine, mut store, root, group) = seeded().await;
        let root_top = engine
            .create_department(&mut store, ACTOR, NewDepartment::top(root.id, "Platform"))
            .await
            .unwrap();

        let err = engine
            .create_department(
                &mut store,
                ACTOR,
                NewDepartment::under(group.id, root_top.id, "Stray"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::DepartmentTenantMismatch { .. })
        ));
    }

    #[test]
    fn plan_update_with_no_fields_keeps_root_unchanged() {
        let now = Utc::now();
        let root = plan_root(
            TenantId::new(1),
            NewTenant::new(TenantType::Root, "root", ACTOR),
            ACTOR,
            now,
        );
        let planned = plan_update(&root, &TenantUpdate::new(), ACTOR, now).unwrap();
        assert_eq!(planned, root);
    }
}
