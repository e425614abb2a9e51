//! # Snapshot Persistence
//!
//! Actors that return a [`persistence_id`](crate::Actor::persistence_id) are
//! recovered from a snapshot when they start and can save or delete their
//! snapshot through the [`Context`](crate::Context). The runtime only needs the
//! small [`PersistenceService`] contract below; snapshots are JSON values so any
//! store that can keep a document per id will do.
//!
//! [`InMemoryPersistence`] is a map-backed implementation, handy in tests and for
//! state that only has to survive restarts within one process.

use crate::error::RuntimeError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[async_trait]
pub trait PersistenceService: Send + Sync + 'static {
    async fn write(&self, id: &str, snapshot: serde_json::Value) -> Result<(), RuntimeError>;

    async fn read(&self, id: &str) -> Result<Option<serde_json::Value>, RuntimeError>;

    async fn delete(&self, id: &str) -> Result<(), RuntimeError>;
}

impl dyn PersistenceService {
    /// Reads a snapshot and decodes it as `T`.
    pub async fn read_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, RuntimeError> {
        match self.read(id).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| RuntimeError::Persistence(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn write_as<T: Serialize + Sync>(&self, id: &str, state: &T) -> Result<(), RuntimeError> {
        let value =
            serde_json::to_value(state).map_err(|e| RuntimeError::Persistence(e.to_string()))?;
        self.write(id, value).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    snapshots: DashMap<String, serde_json::Value>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshots.contains_key(id)
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistence {
    async fn write(&self, id: &str, snapshot: serde_json::Value) -> Result<(), RuntimeError> {
        self.snapshots.insert(id.to_string(), snapshot);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<serde_json::Value>, RuntimeError> {
        Ok(self.snapshots.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> Result<(), RuntimeError> {
        self.snapshots.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    #[tokio::test]
    async fn test_typed_round_trip_and_delete() {
        let store: Arc<dyn PersistenceService> = Arc::new(InMemoryPersistence::new());
        store.write_as("counter-1", &Counter { count: 3 }).await.unwrap();

        let back: Option<Counter> = store.read_as("counter-1").await.unwrap();
        assert_eq!(back, Some(Counter { count: 3 }));

        store.delete("counter-1").await.unwrap();
        let gone: Option<Counter> = store.read_as("counter-1").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_read_as_wrong_type_is_an_error() {
        let store: Arc<dyn PersistenceService> = Arc::new(InMemoryPersistence::new());
        store
            .write("x", serde_json::json!({"name": "not a counter"}))
            .await
            .unwrap();
        let result = store.read_as::<Counter>("x").await;
        assert!(matches!(result, Err(RuntimeError::Persistence(_))));
    }
}
