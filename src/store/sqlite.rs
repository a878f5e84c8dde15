use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{NewObservation, Observation, RecordStore};
use crate::error::{CellscanError, Result};
use crate::event::{Generation, Position, Site};

// Uploaded rows are kept so data can be recovered from the device if the
// collection server loses it.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cellsite (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    lat      REAL    NOT NULL,
    lon      REAL    NOT NULL,
    alt      REAL    NOT NULL,
    time     TEXT    NOT NULL,
    rx       TEXT    NOT NULL,
    mcc      TEXT    NOT NULL,
    mnc      TEXT    NOT NULL,
    lac      TEXT    NOT NULL,
    gen      TEXT    NOT NULL,
    cellid   TEXT    NOT NULL,
    uploaded INTEGER NOT NULL DEFAULT 0
)";

const INSERT: &str = "INSERT INTO cellsite (lat, lon, alt, time, rx, mcc, mnc, lac, gen, cellid) \
                      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        debug!("Record store open at {}", path.as_ref().display());

        Ok(Self { pool })
    }

    fn bind_insert<'q>(
        observation: &'q NewObservation,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        sqlx::query(INSERT)
            .bind(observation.position.lat)
            .bind(observation.position.lon)
            .bind(observation.position.alt)
            .bind(observation.timestamp)
            .bind(&observation.site.signal_level)
            .bind(&observation.site.mcc)
            .bind(&observation.site.mnc)
            .bind(&observation.site.lac)
            .bind(observation.site.generation.as_str())
            .bind(&observation.site.cell_id)
    }

    fn decode_row(row: &SqliteRow) -> Result<Observation> {
        let gen: String = row.try_get("gen")?;
        let generation = Generation::parse(&gen)
            .ok_or_else(|| CellscanError::Parse(format!("unknown generation {:?} in store", gen)))?;
        let timestamp: DateTime<Utc> = row.try_get("time")?;
        let uploaded: i64 = row.try_get("uploaded")?;

        Ok(Observation {
            id: row.try_get("id")?,
            site: Site {
                generation,
                mcc: row.try_get("mcc")?,
                mnc: row.try_get("mnc")?,
                lac: row.try_get("lac")?,
                cell_id: row.try_get("cellid")?,
                signal_level: row.try_get("rx")?,
            },
            position: Position {
                lat: row.try_get("lat")?,
                lon: row.try_get("lon")?,
                alt: row.try_get("alt")?,
            },
            timestamp,
            uploaded: uploaded != 0,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, observation: NewObservation) -> Result<i64> {
        let done = Self::bind_insert(&observation).execute(&self.pool).await?;
        Ok(done.last_insert_rowid())
    }

    async fn insert_batch(&self, observations: Vec<NewObservation>) -> Result<Vec<i64>> {
        if observations.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(observations.len());

        for observation in &observations {
            let done = Self::bind_insert(observation).execute(&mut *tx).await?;
            ids.push(done.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn select_unuploaded(&self) -> Result<Vec<Observation>> {
        let rows = sqlx::query("SELECT * FROM cellsite WHERE uploaded = 0 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::decode_row).collect()
    }

    async fn mark_uploaded(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for id in ids {
            sqlx::query("UPDATE cellsite SET uploaded = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}
