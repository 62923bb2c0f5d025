//! Append-only retrieval log, written at commit time for offline retrieval
//! quality evaluation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mnemon_domain::error::Result;

use crate::store::from_sql;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalLogEntry {
    pub continuum_id: Uuid,
    pub raw_query: String,
    pub fingerprint: String,
    pub surfaced_ids: Vec<Uuid>,
    pub ts: DateTime<Utc>,
}

impl RetrievalLogEntry {
    pub fn new(
        continuum_id: Uuid,
        raw_query: impl Into<String>,
        fingerprint: impl Into<String>,
        surfaced_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            continuum_id,
            raw_query: raw_query.into(),
            fingerprint: fingerprint.into(),
            surfaced_ids,
            ts: Utc::now(),
        }
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS retrieval_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            continuum_id TEXT NOT NULL,
            raw_query TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            surfaced_ids TEXT NOT NULL,
            ts TEXT NOT NULL
        );",
    )
    .map_err(from_sql)
}

/// Insert one entry. Takes a plain connection reference so it can run
/// inside the unit-of-work transaction.
pub fn insert_entry(conn: &Connection, entry: &RetrievalLogEntry) -> Result<()> {
    let ids: Vec<String> = entry.surfaced_ids.iter().map(|id| id.to_string()).collect();
    conn.execute(
        "INSERT INTO retrieval_log (continuum_id, raw_query, fingerprint, surfaced_ids, ts)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.continuum_id.to_string(),
            entry.raw_query,
            entry.fingerprint,
            serde_json::to_string(&ids)?,
            entry.ts.to_rfc3339(),
        ],
    )
    .map_err(from_sql)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_append_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let cid = Uuid::new_v4();
        let m1 = Uuid::new_v4();
        insert_entry(&conn, &RetrievalLogEntry::new(cid, "raw", "expanded", vec![m1])).unwrap();
        insert_entry(&conn, &RetrievalLogEntry::new(cid, "raw2", "expanded2", vec![])).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM retrieval_log", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let surfaced: String = conn
            .query_row(
                "SELECT surfaced_ids FROM retrieval_log ORDER BY id LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let ids: Vec<String> = serde_json::from_str(&surfaced).unwrap();
        assert_eq!(ids, vec![m1.to_string()]);
    }
}
