use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{debug, trace};
use sqlx::SqlitePool;

use crate::{
    db_types::Entity,
    sqlite::{
        repository::{Repository, StagedWrites},
        StorageError,
    },
};

/// Hands out one [`Repository`] per entity type and commits everything they have staged in a single transaction.
///
/// Repositories are memoized, so every call to [`repository`](Self::repository) for the same entity type within one
/// unit of work returns the same instance and stages into the same change set. [`complete`](Self::complete) flushes
/// repositories in the order they were first requested; within a repository, changes apply in staging order.
///
/// If the commit fails, the transaction rolls back and the store is untouched. The staged changes themselves are
/// consumed either way, so a failed unit of work is discarded, not retried.
pub struct UnitOfWork {
    pool: SqlitePool,
    repositories: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    flush_order: Mutex<Vec<Arc<dyn StagedWrites>>>,
}

impl UnitOfWork {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, repositories: Mutex::new(HashMap::new()), flush_order: Mutex::new(Vec::new()) }
    }

    /// The repository for entity type `T`, created on first request.
    pub fn repository<T: Entity>(&self) -> Arc<Repository<T>> {
        let mut repositories = self.repositories.lock().expect("repository map lock poisoned");
        let entry = repositories.entry(TypeId::of::<T>()).or_insert_with(|| {
            trace!("🗂️ Creating repository for {}", T::TABLE);
            let repository = Arc::new(Repository::<T>::new(self.pool.clone()));
            self.flush_order.lock().expect("flush order lock poisoned").push(repository.clone());
            repository
        });
        entry.clone().downcast::<Repository<T>>().unwrap_or_else(|_| panic!("repository map holds mismatched types"))
    }

    /// Commit all staged changes atomically. Returns the total number of rows affected.
    pub async fn complete(&self) -> Result<u64, StorageError> {
        let repositories = self.flush_order.lock().expect("flush order lock poisoned").clone();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for repository in &repositories {
            affected += repository.flush(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!("🗂️ Unit of work committed. {affected} rows affected.");
        Ok(affected)
    }
}
