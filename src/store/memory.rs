use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{NewObservation, Observation, RecordStore};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: Vec<Observation>,
}

/// In-memory store.
/// Used by tests and as a reference for the `RecordStore` contract.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, uploaded or not
    pub fn all(&self) -> Vec<Observation> {
        self.lock().rows.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn push(&mut self, observation: NewObservation) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.push(Observation {
            id,
            site: observation.site,
            position: observation.position,
            timestamp: observation.timestamp,
            uploaded: false,
        });
        id
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, observation: NewObservation) -> Result<i64> {
        Ok(self.lock().push(observation))
    }

    /// Whole batch under one lock, so concurrent writers never interleave with it
    async fn insert_batch(&self, observations: Vec<NewObservation>) -> Result<Vec<i64>> {
        let mut inner = self.lock();
        Ok(observations.into_iter().map(|o| inner.push(o)).collect())
    }

    async fn select_unuploaded(&self) -> Result<Vec<Observation>> {
        Ok(self.lock().rows.iter().filter(|o| !o.uploaded).cloned().collect())
    }

    async fn mark_uploaded(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.lock();
        for row in inner.rows.iter_mut().filter(|o| ids.contains(&o.id)) {
            row.uploaded = true;
        }
        Ok(())
    }
}
