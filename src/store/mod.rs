//! # Record Store
//!
//! Persistent observations awaiting upload. The coordinator writes, the uploader
//! reads and marks; both hold the same `Arc<dyn RecordStore>`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{Position, Site};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Observation before the store assigns it an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub site: Site,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

impl NewObservation {
    /// Tag `site` with `position`, stamped now
    pub fn now(site: Site, position: Position) -> Self {
        Self {
            site,
            position,
            timestamp: Utc::now(),
        }
    }
}

/// Stored observation
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: i64,
    pub site: Site,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
    pub uploaded: bool,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist one observation and return its id
    async fn insert(&self, observation: NewObservation) -> Result<i64>;

    /// Persist a batch of observations, ids returned in input order
    ///
    /// The default inserts row by row. Stores that can write the whole batch
    /// atomically override it.
    async fn insert_batch(&self, observations: Vec<NewObservation>) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(observations.len());
        for observation in observations {
            ids.push(self.insert(observation).await?);
        }
        Ok(ids)
    }

    /// Every observation not yet accepted by the collection server, oldest first
    async fn select_unuploaded(&self) -> Result<Vec<Observation>>;

    /// Flag exactly `ids` as uploaded, all or none
    async fn mark_uploaded(&self, ids: &[i64]) -> Result<()>;
}
