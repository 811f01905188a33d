use orgdir_core::engine::{
    AccessStore, DepartmentStore, EngineError, GrantReader, InvariantError, PolicyReader,
    TenantStore,
};
use orgdir_core::scope::TenantScope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("a ROOT tenant already exists")]
    DuplicateRoot,
    #[error("{kind} '{key}' already exists")]
    Duplicate { kind: &'static str, key: String },
    #[error("row is outside the current tenant scope")]
    ScopeViolation,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateRoot => InvariantError::DuplicateRoot.into(),
            StorageError::Duplicate { kind, key } => InvariantError::Duplicate { kind, key }.into(),
            StorageError::ScopeViolation => EngineError::ScopeViolation,
            StorageError::Unavailable(msg) => EngineError::Unavailable(msg),
            StorageError::Internal(msg) => EngineError::Storage(msg),
        }
    }
}

/// A storage backend that can open transactions bound to a tenant scope.
/// Every read and write through the returned transaction is filtered by the
/// scope's row isolation rules.
pub trait DirectoryStore: Send + Sync {
    type Tx: DirectoryTx;

    fn begin(
        &self,
        scope: TenantScope,
    ) -> impl Future<Output = Result<Self::Tx, StorageError>> + Send;
}

/// An open, scoped transaction. Dropping it without calling
/// [`commit`](Self::commit) discards every change.
pub trait DirectoryTx:
    TenantStore + DepartmentStore + GrantReader + PolicyReader + AccessStore + Send
{
    fn scope(&self) -> TenantScope;

    fn commit(self) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_become_invariant_errors() {
        let err: EngineError = StorageError::DuplicateRoot.into();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::DuplicateRoot)
        ));

        let err: EngineError = StorageError::Duplicate {
            kind: "role",
            key: "admin".into(),
        }
        .into();
        assert!(matches!(
            err,
            EngineError::Invariant(InvariantError::Duplicate { kind: "role", .. })
        ));
    }

    #[test]
    fn scope_and_availability_failures_keep_their_class() {
        let err: EngineError = StorageError::ScopeViolation.into();
        assert!(matches!(err, EngineError::ScopeViolation));

        let err: EngineError = StorageError::Unavailable("pool timed out".into()).into();
        assert!(matches!(err, EngineError::Unavailable(msg) if msg.contains("pool timed out")));

        let err: EngineError = StorageError::Internal("bad row".into()).into();
        assert!(matches!(err, EngineError::Storage(msg) if msg == "bad row"));
    }
}
