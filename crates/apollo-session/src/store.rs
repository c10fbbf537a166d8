//! The store interface the server consumes, plus an in-memory backend.
//!
//! Apollo does not own persistence. Whatever database backs a deployment
//! only has to provide get / find / save / remove-by-filter / flush over a
//! handful of record types. The server is generic over [`Store`], so tests
//! and single-process deployments use [`MemoryStore`] and a real deployment
//! plugs in its own backend.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::StoreError;

/// A record type the store can hold.
pub trait Record: Clone + Send + Sync + 'static {
    /// Primary key.
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Query type accepted by `find` and `remove`.
    type Filter: Send + Sync;
    /// Table name, for logs and errors.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// Persistence operations consumed by the server.
///
/// Methods return `impl Future + Send` so callers can use them from
/// spawned tasks. Implementations may simply write `async fn`.
pub trait Store: Send + Sync + 'static {
    /// Looks a record up by primary key.
    fn get<R: Record>(&self, id: &R::Id) -> impl Future<Output = Result<Option<R>, StoreError>> + Send;

    /// Returns every record matching `filter`.
    fn find<R: Record>(&self, filter: &R::Filter) -> impl Future<Output = Result<Vec<R>, StoreError>> + Send;

    /// Inserts or replaces a record.
    fn save<R: Record>(&self, record: R) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Changes a stored record in place and returns the result.
    ///
    /// `change` sees the current record and no other write lands between
    /// reading and writing it back. `Ok(None)` if there is no such record.
    fn update<R, F>(&self, id: &R::Id, change: F) -> impl Future<Output = Result<Option<R>, StoreError>> + Send
    where
        R: Record,
        F: FnOnce(&mut R) + Send;

    /// Deletes every record matching `filter`; returns how many went.
    fn remove<R: Record>(&self, filter: &R::Filter) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Makes previous writes visible to other processes.
    fn flush(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

type Table<R> = HashMap<<R as Record>::Id, R>;

/// An in-process [`Store`] keeping one hash map per record type.
///
/// Writes are visible immediately; `flush` only counts calls.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    flushes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `flush` calls so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

fn table<R: Record>(boxed: &(dyn Any + Send + Sync)) -> Result<&Table<R>, StoreError> {
    boxed.downcast_ref::<Table<R>>().ok_or(StoreError::Corrupt(R::KIND))
}

fn table_mut<R: Record>(boxed: &mut (dyn Any + Send + Sync)) -> Result<&mut Table<R>, StoreError> {
    boxed.downcast_mut::<Table<R>>().ok_or(StoreError::Corrupt(R::KIND))
}

impl Store for MemoryStore {
    async fn get<R: Record>(&self, id: &R::Id) -> Result<Option<R>, StoreError> {
        let tables = self.tables.read().await;
        match tables.get(&TypeId::of::<R>()) {
            Some(boxed) => Ok(table::<R>(boxed.as_ref())?.get(id).cloned()),
            None => Ok(None),
        }
    }

    async fn find<R: Record>(&self, filter: &R::Filter) -> Result<Vec<R>, StoreError> {
        let tables = self.tables.read().await;
        match tables.get(&TypeId::of::<R>()) {
            Some(boxed) => Ok(table::<R>(boxed.as_ref())?
                .values()
                .filter(|r| r.matches(filter))
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn save<R: Record>(&self, record: R) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let boxed = tables
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(Table::<R>::new()) as Box<dyn Any + Send + Sync>);
        table_mut::<R>(boxed.as_mut())?.insert(record.id(), record);
        Ok(())
    }

    async fn update<R, F>(&self, id: &R::Id, change: F) -> Result<Option<R>, StoreError>
    where
        R: Record,
        F: FnOnce(&mut R) + Send,
    {
        let mut tables = self.tables.write().await;
        let Some(boxed) = tables.get_mut(&TypeId::of::<R>()) else {
            return Ok(None);
        };
        Ok(table_mut::<R>(boxed.as_mut())?.get_mut(id).map(|record| {
            change(record);
            record.clone()
        }))
    }

    async fn remove<R: Record>(&self, filter: &R::Filter) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(boxed) = tables.get_mut(&TypeId::of::<R>()) else {
            return Ok(0);
        };
        let table = table_mut::<R>(boxed.as_mut())?;
        let before = table.len();
        table.retain(|_, r| !r.matches(filter));
        Ok(before - table.len())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use apollo_protocol::{LocationId, SessionToken, UserId};

    use super::*;
    use crate::{Session, SessionFilter, User, UserFilter};

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryStore::new();
        let found = store.get::<User>(&UserId(1)).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_save_then_get_and_replace() {
        let store = MemoryStore::new();
        let mut user = User::new(UserId(1), "alice", "pw", LocationId(1));
        store.save(user.clone()).await.unwrap();

        user.online = true;
        store.save(user.clone()).await.unwrap();

        let found = store.get::<User>(&UserId(1)).await.unwrap().unwrap();
        assert!(found.online);
        assert_eq!(store.find::<User>(&UserFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_changes_one_field_in_place() {
        let store = MemoryStore::new();
        store.save(User::new(UserId(1), "alice", "pw", LocationId(1))).await.unwrap();

        let moved = store
            .update::<User, _>(&UserId(1), |u| u.location_id = LocationId(4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.location_id, LocationId(4));

        store.update::<User, _>(&UserId(1), |u| u.online = true).await.unwrap();
        let found = store.get::<User>(&UserId(1)).await.unwrap().unwrap();
        assert!(found.online);
        assert_eq!(found.location_id, LocationId(4));
    }

    #[tokio::test]
    async fn test_update_missing_record_is_none() {
        let store = MemoryStore::new();
        let updated = store
            .update::<User, _>(&UserId(9), |u| u.online = true)
            .await
            .unwrap();
        assert!(updated.is_none());
        assert!(store.find::<User>(&UserFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tables_are_separate_per_record_type() {
        let store = MemoryStore::new();
        store.save(User::new(UserId(1), "alice", "pw", LocationId(1))).await.unwrap();
        let sessions = store.find::<Session>(&SessionFilter::all()).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_remove_by_filter_counts_removed() {
        let store = MemoryStore::new();
        store.save(Session::new(SessionToken::from("old"), at(10))).await.unwrap();
        store.save(Session::new(SessionToken::from("new"), at(500))).await.unwrap();

        let removed = store
            .remove::<Session>(&SessionFilter::inactive_since(at(100)))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let left = store.find::<Session>(&SessionFilter::all()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].token, SessionToken::from("new"));

        // Removing again is a no-op.
        assert_eq!(
            store.remove::<Session>(&SessionFilter::inactive_since(at(100))).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_flush_is_counted() {
        let store = MemoryStore::new();
        store.flush().await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.flush_count(), 2);
    }
}
