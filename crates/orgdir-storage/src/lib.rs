pub mod binder;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use binder::{BindError, ScopedTransaction, TenantBinder};
pub use memory::{InMemoryStore, InMemoryTx};
pub use postgres::{PostgresStore, PostgresTx};
pub use traits::{DirectoryStore, DirectoryTx, StorageError};
