//! SQLite mirror of the interaction aggregate.
//!
//! The in-memory [`AggregationStore`](crate::AggregationStore) stays the
//! source of truth for a run; this mirror makes totals durable with a
//! single idempotent increment-or-insert per event, and seeds the
//! aggregate from prior runs at startup.

use std::path::Path;

use rapport_core::types::{AggregateEdge, InteractionEvent};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Durable edge-weight mirror keyed by `(sender_id, receiver_id)`.
pub struct Mirror {
    conn: Connection,
}

impl Mirror {
    /// Open (or create) the mirror database and its schema.
    pub fn open(path: &Path) -> Result<Self, MirrorError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory mirror, used by tests.
    pub fn open_in_memory() -> Result<Self, MirrorError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MirrorError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS interaction_edges (
                 sender_id          TEXT NOT NULL,
                 receiver_id        TEXT NOT NULL,
                 cumulative_weight  INTEGER NOT NULL,
                 PRIMARY KEY (sender_id, receiver_id)
             );",
        )?;
        Ok(Self { conn })
    }

    /// Fold one event into the durable edge total.
    pub fn record(&self, event: &InteractionEvent) -> Result<(), MirrorError> {
        self.conn.execute(
            "INSERT INTO interaction_edges (sender_id, receiver_id, cumulative_weight)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (sender_id, receiver_id)
             DO UPDATE SET cumulative_weight = cumulative_weight + excluded.cumulative_weight",
            rusqlite::params![event.sender_id, event.receiver_id, i64::from(event.weight)],
        )?;
        Ok(())
    }

    /// Read all persisted edges (used to seed the aggregate at startup).
    pub fn load_edges(&self) -> Result<Vec<AggregateEdge>, MirrorError> {
        let mut stmt = self.conn.prepare(
            "SELECT sender_id, receiver_id, cumulative_weight
             FROM interaction_edges
             ORDER BY sender_id, receiver_id",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok(AggregateEdge {
                    sender_id: row.get(0)?,
                    receiver_id: row.get(1)?,
                    cumulative_weight: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}
