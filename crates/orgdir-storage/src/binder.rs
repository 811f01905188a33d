use orgdir_core::scope::{ScopeError, TenantScope};

use crate::traits::{DirectoryStore, DirectoryTx, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    Identity(#[from] ScopeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Opens one transaction per request with the caller's tenant identity
/// installed as the storage session scope.
#[derive(Debug, Clone)]
pub struct TenantBinder<S> {
    store: S,
}

impl<S: DirectoryStore> TenantBinder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Parses the declared tenant identity and opens a transaction for it.
    pub async fn bind(
        &self,
        declared: Option<&str>,
    ) -> Result<ScopedTransaction<S::Tx>, BindError> {
        let scope = TenantScope::from_declared(declared)?;
        Ok(self.bind_scope(scope).await?)
    }

    pub async fn bind_scope(
        &self,
        scope: TenantScope,
    ) -> Result<ScopedTransaction<S::Tx>, StorageError> {
        let tx = self.store.begin(scope).await?;
        tracing::debug!(%scope, "transaction bound to scope");
        Ok(ScopedTransaction { tx, scope })
    }
}

/// A transaction bound to a tenant scope. Dropped without
/// [`commit`](Self::commit), the underlying transaction rolls back, so an
/// abandoned request never leaves partial writes or a lingering scope.
pub struct ScopedTransaction<T> {
    tx: T,
    scope: TenantScope,
}

impl<T: DirectoryTx> ScopedTransaction<T> {
    pub fn scope(&self) -> TenantScope {
        self.scope
    }

    pub fn tx_mut(&mut self) -> &mut T {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback().await
    }

    /// Commits on `Ok`, rolls back on `Err`. A failed rollback is logged and
    /// the original error is returned.
    pub async fn finish<R, E>(self, result: Result<R, E>) -> Result<R, E>
    where
        E: From<StorageError>,
    {
        let scope = self.scope;
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(%scope, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use orgdir_core::directory::NewUser;
    use orgdir_core::engine::{AccessAdmin, AccessStore, EngineError};
    use orgdir_core::ids::{SequentialIds, TenantId};
    use std::sync::Arc;

    fn admin() -> AccessAdmin {
        AccessAdmin::new(Arc::new(SequentialIds::starting_at(1)))
    }

    #[tokio::test]
    async fn missing_identity_is_rejected_before_begin() {
        let binder = TenantBinder::new(InMemoryStore::new());
        let err = binder.bind(None).await.err().unwrap();
        assert!(matches!(err, BindError::Identity(ScopeError::Missing)));
    }

    #[tokio::test]
    async fn malformed_identity_is_rejected() {
        let binder = TenantBinder::new(InMemoryStore::new());
        let err = binder.bind(Some("abc")).await.err().unwrap();
        assert!(matches!(err, BindError::Identity(ScopeError::Malformed(_))));
    }

    #[tokio::test]
    async fn zero_binds_platform_scope() {
        let binder = TenantBinder::new(InMemoryStore::new());
        let scope = binder.bind(Some("0")).await.map(|s| s.scope()).unwrap();
        assert_eq!(scope, TenantScope::Platform);

        let scope = binder.bind(Some("12")).await.map(|s| s.scope()).unwrap();
        assert_eq!(scope, TenantScope::Tenant(TenantId::new(12)));
    }

    #[tokio::test]
    async fn finish_commits_on_ok() {
        let binder = TenantBinder::new(InMemoryStore::new());
        let mut scoped = binder.bind(Some("0")).await.unwrap();
        let result = admin()
            .create_user(scoped.tx_mut(), NewUser::new("alice", "Alice"))
            .await;
        scoped.finish(result).await.unwrap();

        let mut check = binder.bind(Some("0")).await.unwrap();
        let found = check
            .tx_mut()
            .find_user_by_username("alice")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn finish_rolls_back_on_err() {
        let binder = TenantBinder::new(InMemoryStore::new());
        let mut scoped = binder.bind(Some("0")).await.unwrap();
        admin()
            .create_user(scoped.tx_mut(), NewUser::new("alice", "Alice"))
            .await
            .unwrap();
        let failed: Result<(), EngineError> = Err(EngineError::Storage("boom".into()));
        assert!(scoped.finish(failed).await.is_err());

        let mut check = binder.bind(Some("0")).await.unwrap();
        assert!(
            check
                .tx_mut()
                .find_user_by_username("alice")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let binder = TenantBinder::new(InMemoryStore::new());
        {
            let mut scoped = binder.bind(Some("0")).await.unwrap();
            admin()
                .create_user(scoped.tx_mut(), NewUser::new("ghost", "Ghost"))
                .await
                .unwrap();
        }

        let mut check = binder.bind(Some("0")).await.unwrap();
        assert!(
            check
                .tx_mut()
                .find_user_by_username("ghost")
                .await
                .unwrap()
                .is_none()
        );
    }
}
