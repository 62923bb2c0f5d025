//! Memory persistence over the SQL substrate.
//!
//! BM25 text relevance comes from an FTS5 shadow table kept in sync by
//! triggers; vector similarity is cosine over f32 blobs computed here.
//! Hybrid search unions both candidate sets and blends min-max normalized
//! scores with intent-dependent weights.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use mnemon_domain::error::{Error, Result};

use crate::types::{
    ExtractedMemory, LinkType, Memory, MemoryLink, MemoryPatch, SearchIntent, TraversedLink,
};

const EMBEDDING_DIM: usize = 384;

pub(crate) fn from_sql(e: rusqlite::Error) -> Error {
    Error::Sql(e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blob and score helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity of two same-length vectors. Stored vectors are unit
/// length so this is just the dot product, but the query side may not be.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Min-max normalize scores to [0, 1]. A flat set maps to all-ones so a
/// lone candidate still contributes its full weight.
fn normalize_scores(scores: &mut [(Uuid, f32)]) {
    if scores.is_empty() {
        return;
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = scores
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    for (_, s) in scores.iter_mut() {
        *s = if range > 0.0 { (*s - min) / range } else { 1.0 };
    }
}

/// Build a safe FTS5 MATCH expression: quote every alphanumeric token and
/// OR them together. Returns None when nothing is searchable.
fn fts_match_expr(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(Error::Validation(format!(
            "expected {EMBEDDING_DIM}-dim embedding, got {}",
            embedding.len()
        )));
    }
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if (norm - 1.0).abs() > 1e-4 {
        return Err(Error::Validation(format!(
            "embedding is not normalized (norm = {norm})"
        )));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_schema(&conn.lock())?;
        Ok(Self { conn })
    }

    /// Atomic batch insert. One embedding per extracted memory; mismatched
    /// lengths or malformed embeddings reject the whole batch.
    pub fn store_memories(
        &self,
        user_id: &str,
        extracted: &[ExtractedMemory],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<Uuid>> {
        if extracted.len() != embeddings.len() {
            return Err(Error::Validation(format!(
                "{} memories but {} embeddings",
                extracted.len(),
                embeddings.len()
            )));
        }
        for embedding in embeddings {
            validate_embedding(embedding)?;
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(from_sql)?;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(extracted.len());

        for (memory, embedding) in extracted.iter().zip(embeddings) {
            if memory.text.trim().is_empty() {
                return Err(Error::Validation("memory text cannot be blank".into()));
            }
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO memories
                   (id, user_id, text, embedding, importance, created_at,
                    last_accessed, access_count, happens_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
                params![
                    id.to_string(),
                    user_id,
                    memory.text,
                    embedding_to_blob(embedding),
                    memory.importance as f64,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    memory.happens_at.map(|t| t.to_rfc3339()),
                    memory.expires_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(from_sql)?;
            ids.push(id);
        }

        tx.commit().map_err(from_sql)?;
        tracing::debug!(user_id, count = ids.len(), "stored memory batch");
        Ok(ids)
    }

    /// Create a link and its inverse entry in one transaction, keeping the
    /// outbound/inbound views mutually consistent.
    pub fn add_link(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        link_type: LinkType,
        confidence: f32,
        reasoning: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(from_sql)?;
        tx.execute(
            "INSERT INTO memory_links (source_id, target_id, link_type, confidence, reasoning, direction)
             VALUES (?1, ?2, ?3, ?4, ?5, 'outbound')",
            params![
                source_id.to_string(),
                target_id.to_string(),
                link_type.as_str(),
                confidence as f64,
                reasoning
            ],
        )
        .map_err(from_sql)?;
        tx.execute(
            "INSERT INTO memory_links (source_id, target_id, link_type, confidence, reasoning, direction)
             VALUES (?1, ?2, ?3, ?4, ?5, 'inbound')",
            params![
                target_id.to_string(),
                source_id.to_string(),
                link_type.as_str(),
                confidence as f64,
                reasoning
            ],
        )
        .map_err(from_sql)?;
        tx.commit().map_err(from_sql)
    }

    pub fn get_memory(&self, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        self.load_memory(&conn, id)
    }

    pub fn update_memory(&self, id: Uuid, patch: MemoryPatch) -> Result<Memory> {
        {
            let conn = self.conn.lock();
            if let Some(text) = &patch.text {
                if text.trim().is_empty() {
                    return Err(Error::Validation("memory text cannot be blank".into()));
                }
                conn.execute(
                    "UPDATE memories SET text = ?1 WHERE id = ?2",
                    params![text, id.to_string()],
                )
                .map_err(from_sql)?;
            }
            if let Some(embedding) = &patch.embedding {
                validate_embedding(embedding)?;
                conn.execute(
                    "UPDATE memories SET embedding = ?1 WHERE id = ?2",
                    params![embedding_to_blob(embedding), id.to_string()],
                )
                .map_err(from_sql)?;
            }
            if let Some(importance) = patch.importance {
                conn.execute(
                    "UPDATE memories SET importance = ?1 WHERE id = ?2",
                    params![importance as f64, id.to_string()],
                )
                .map_err(from_sql)?;
            }
            if patch.touch {
                conn.execute(
                    "UPDATE memories
                     SET access_count = access_count + 1, last_accessed = ?1
                     WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id.to_string()],
                )
                .map_err(from_sql)?;
            }
        }
        self.get_memory(id)?
            .ok_or_else(|| Error::Validation(format!("memory {id} not found")))
    }

    /// Vector-only similarity search.
    pub fn search_similar(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
        similarity_threshold: f32,
        min_importance: f32,
    ) -> Result<Vec<Memory>> {
        let candidates =
            self.vector_candidates(user_id, embedding, similarity_threshold, min_importance)?;
        let conn = self.conn.lock();
        candidates
            .into_iter()
            .take(limit)
            .map(|(id, _)| {
                self.load_memory(&conn, id)?
                    .ok_or_else(|| Error::Sql(format!("memory {id} vanished mid-query")))
            })
            .collect()
    }

    /// Hybrid BM25 + vector search with intent-dependent weighting.
    pub fn hybrid_search(
        &self,
        user_id: &str,
        query_text: &str,
        embedding: &[f32],
        intent: SearchIntent,
        limit: usize,
        similarity_threshold: f32,
        min_importance: f32,
    ) -> Result<Vec<Memory>> {
        let (vector_weight, text_weight) = intent.weights();

        let mut vector_scores =
            self.vector_candidates(user_id, embedding, similarity_threshold, min_importance)?;
        vector_scores.truncate(limit * 4);
        let mut text_scores = self.text_candidates(user_id, query_text, min_importance, limit * 4)?;

        normalize_scores(&mut vector_scores);
        normalize_scores(&mut text_scores);

        let mut combined: std::collections::HashMap<Uuid, f32> = std::collections::HashMap::new();
        for (id, score) in vector_scores {
            *combined.entry(id).or_default() += vector_weight * score;
        }
        for (id, score) in text_scores {
            *combined.entry(id).or_default() += text_weight * score;
        }

        let mut ranked: Vec<(Uuid, f32)> = combined.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);

        let conn = self.conn.lock();
        ranked
            .into_iter()
            .map(|(id, _)| {
                self.load_memory(&conn, id)?
                    .ok_or_else(|| Error::Sql(format!("memory {id} vanished mid-query")))
            })
            .collect()
    }

    /// Breadth-first traversal of outbound links up to `depth` hops.
    /// The origin memory itself never appears in the result.
    pub fn traverse_links(&self, id: Uuid, depth: usize) -> Result<Vec<TraversedLink>> {
        let conn = self.conn.lock();
        let mut visited = std::collections::HashSet::from([id]);
        let mut frontier = vec![id];
        let mut results = Vec::new();

        for current_depth in 1..=depth {
            let mut next_frontier = Vec::new();
            for source in frontier {
                let links = self.load_links(&conn, source, "outbound")?;
                for link in links {
                    if !visited.insert(link.target_id) {
                        continue;
                    }
                    if let Some(memory) = self.load_memory(&conn, link.target_id)? {
                        next_frontier.push(memory.id);
                        results.push(TraversedLink {
                            memory,
                            link_type: link.link_type,
                            confidence: link.confidence,
                            reasoning: link.reasoning,
                            depth: current_depth,
                            linked_from_id: source,
                        });
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(results)
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Cosine scores for every live memory of this user above the
    /// thresholds, sorted descending.
    fn vector_candidates(
        &self,
        user_id: &str,
        embedding: &[f32],
        similarity_threshold: f32,
        min_importance: f32,
    ) -> Result<Vec<(Uuid, f32)>> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(Error::Validation(format!(
                "expected {EMBEDDING_DIM}-dim query embedding, got {}",
                embedding.len()
            )));
        }

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, embedding FROM memories
                 WHERE user_id = ?1 AND importance >= ?2
                   AND (expires_at IS NULL OR expires_at > ?3)",
            )
            .map_err(from_sql)?;

        let rows = stmt
            .query_map(
                params![user_id, min_importance as f64, Utc::now().to_rfc3339()],
                |row| {
                    let id: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((id, blob))
                },
            )
            .map_err(from_sql)?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(from_sql)?;
            let stored = blob_to_embedding(&blob);
            let similarity = cosine(embedding, &stored);
            if similarity >= similarity_threshold {
                let id = Uuid::parse_str(&id).map_err(|e| Error::Sql(e.to_string()))?;
                scored.push((id, similarity));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }

    /// BM25 scores from the FTS5 shadow table, sorted descending
    /// (bm25() is lower-is-better, so the sign is flipped).
    fn text_candidates(
        &self,
        user_id: &str,
        query_text: &str,
        min_importance: f32,
        limit: usize,
    ) -> Result<Vec<(Uuid, f32)>> {
        let Some(match_expr) = fts_match_expr(query_text) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT m.id, -bm25(memories_fts) AS score
                 FROM memories_fts
                 JOIN memories m ON m.rowid = memories_fts.rowid
                 WHERE memories_fts MATCH ?1
                   AND m.user_id = ?2 AND m.importance >= ?3
                   AND (m.expires_at IS NULL OR m.expires_at > ?4)
                 ORDER BY score DESC
                 LIMIT ?5",
            )
            .map_err(from_sql)?;

        let rows = stmt
            .query_map(
                params![
                    match_expr,
                    user_id,
                    min_importance as f64,
                    Utc::now().to_rfc3339(),
                    limit as i64
                ],
                |row| {
                    let id: String = row.get(0)?;
                    let score: f64 = row.get(1)?;
                    Ok((id, score as f32))
                },
            )
            .map_err(from_sql)?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, score) = row.map_err(from_sql)?;
            let id = Uuid::parse_str(&id).map_err(|e| Error::Sql(e.to_string()))?;
            scored.push((id, score));
        }
        Ok(scored)
    }

    fn load_memory(&self, conn: &Connection, id: Uuid) -> Result<Option<Memory>> {
        let row = conn
            .query_row(
                "SELECT id, user_id, text, embedding, importance, created_at,
                        last_accessed, access_count, happens_at, expires_at
                 FROM memories WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )
            .optional()
            .map_err(from_sql)?;

        let Some((id_s, user_id, text, blob, importance, created, accessed, count, happens, expires)) =
            row
        else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&id_s).map_err(|e| Error::Sql(e.to_string()))?;
        Ok(Some(Memory {
            id,
            user_id,
            text,
            embedding: blob_to_embedding(&blob),
            importance: importance as f32,
            created_at: parse_ts(&created)?,
            last_accessed: parse_ts(&accessed)?,
            access_count: count,
            happens_at: happens.as_deref().map(parse_ts).transpose()?,
            expires_at: expires.as_deref().map(parse_ts).transpose()?,
            outbound_links: self.load_links(conn, id, "outbound")?,
            inbound_links: self.load_links(conn, id, "inbound")?,
        }))
    }

    fn load_links(&self, conn: &Connection, id: Uuid, direction: &str) -> Result<Vec<MemoryLink>> {
        let mut stmt = conn
            .prepare(
                "SELECT target_id, link_type, confidence, reasoning
                 FROM memory_links WHERE source_id = ?1 AND direction = ?2",
            )
            .map_err(from_sql)?;
        let rows = stmt
            .query_map(params![id.to_string(), direction], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(from_sql)?;

        let mut links = Vec::new();
        for row in rows {
            let (target, link_type, confidence, reasoning) = row.map_err(from_sql)?;
            links.push(MemoryLink {
                target_id: Uuid::parse_str(&target).map_err(|e| Error::Sql(e.to_string()))?,
                link_type: LinkType::parse(&link_type),
                confidence: confidence as f32,
                reasoning,
            });
        }
        Ok(links)
    }
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Sql(format!("bad timestamp '{s}': {e}")))
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            importance REAL NOT NULL,
            created_at TEXT NOT NULL,
            last_accessed TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            happens_at TEXT,
            expires_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id, importance);

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            text,
            content='memories',
            content_rowid='rowid'
        );
        CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, text) VALUES (new.rowid, new.text);
        END;
        CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
        END;
        CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE OF text ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
            INSERT INTO memories_fts(rowid, text) VALUES (new.rowid, new.text);
        END;

        CREATE TABLE IF NOT EXISTS memory_links (
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            link_type TEXT NOT NULL,
            confidence REAL NOT NULL,
            reasoning TEXT NOT NULL,
            direction TEXT NOT NULL CHECK (direction IN ('outbound', 'inbound'))
        );
        CREATE INDEX IF NOT EXISTS idx_links_source ON memory_links(source_id, direction);",
    )
    .map_err(from_sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        MemoryStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn unit_embedding(seed: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[seed % EMBEDDING_DIM] = 1.0;
        v
    }

    /// A normalized embedding that leans mostly toward `seed` with a small
    /// component on axis 0, so cosine against axis 0 is nonzero.
    fn blended_embedding(seed: usize, lean: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = lean;
        v[seed % EMBEDDING_DIM] = (1.0 - lean * lean).sqrt();
        v
    }

    fn extracted(text: &str, importance: f32) -> ExtractedMemory {
        ExtractedMemory {
            text: text.into(),
            importance,
            happens_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn store_and_load_round_trip() {
        let store = test_store();
        let ids = store
            .store_memories(
                "u1",
                &[extracted("Taylor prefers PgBouncer", 0.8)],
                &[unit_embedding(3)],
            )
            .unwrap();
        assert_eq!(ids.len(), 1);

        let memory = store.get_memory(ids[0]).unwrap().unwrap();
        assert_eq!(memory.text, "Taylor prefers PgBouncer");
        assert_eq!(memory.embedding.len(), EMBEDDING_DIM);
        let norm: f32 = memory.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert_eq!(memory.access_count, 0);
    }

    #[test]
    fn batch_rejects_mismatched_embeddings() {
        let store = test_store();
        let err = store
            .store_memories("u1", &[extracted("a", 0.5), extracted("b", 0.5)], &[unit_embedding(0)])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unnormalized_embedding_rejected() {
        let store = test_store();
        let mut bad = vec![0.0f32; EMBEDDING_DIM];
        bad[0] = 2.0;
        let err = store
            .store_memories("u1", &[extracted("a", 0.5)], &[bad])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn wrong_dimension_rejected() {
        let store = test_store();
        let err = store
            .store_memories("u1", &[extracted("a", 0.5)], &[vec![1.0f32; 128]])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn links_are_mutually_consistent() {
        let store = test_store();
        let ids = store
            .store_memories(
                "u1",
                &[extracted("uses postgres", 0.7), extracted("moved to pgbouncer", 0.7)],
                &[unit_embedding(0), unit_embedding(1)],
            )
            .unwrap();

        store
            .add_link(ids[0], ids[1], LinkType::Supersedes, 0.9, "newer setup")
            .unwrap();

        let a = store.get_memory(ids[0]).unwrap().unwrap();
        let b = store.get_memory(ids[1]).unwrap().unwrap();
        assert_eq!(a.outbound_links.len(), 1);
        assert_eq!(a.outbound_links[0].target_id, ids[1]);
        assert_eq!(b.inbound_links.len(), 1);
        assert_eq!(b.inbound_links[0].target_id, ids[0]);
        assert_eq!(b.inbound_links[0].link_type, LinkType::Supersedes);
    }

    #[test]
    fn search_similar_orders_by_cosine() {
        let store = test_store();
        let ids = store
            .store_memories(
                "u1",
                &[extracted("close match", 0.9), extracted("far match", 0.9)],
                &[blended_embedding(1, 0.9), blended_embedding(2, 0.3)],
            )
            .unwrap();

        let results = store
            .search_similar("u1", &unit_embedding(0), 10, 0.1, 0.0)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, ids[0]);
        assert_eq!(results[1].id, ids[1]);
    }

    #[test]
    fn search_is_user_scoped() {
        let store = test_store();
        store
            .store_memories("u1", &[extracted("mine", 0.9)], &[unit_embedding(0)])
            .unwrap();
        store
            .store_memories("u2", &[extracted("theirs", 0.9)], &[unit_embedding(0)])
            .unwrap();

        let results = store
            .search_similar("u1", &unit_embedding(0), 10, 0.5, 0.0)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "mine");
    }

    #[test]
    fn hybrid_search_finds_text_only_match() {
        let store = test_store();
        // Memory whose embedding is orthogonal to the query but whose text
        // matches exactly: BM25 keeps it in the running.
        store
            .store_memories(
                "u1",
                &[extracted("the pgbouncer connection pool settings", 0.9)],
                &[unit_embedding(7)],
            )
            .unwrap();

        let results = store
            .hybrid_search(
                "u1",
                "pgbouncer pool",
                &unit_embedding(0),
                SearchIntent::Exact,
                5,
                0.99,
                0.0,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn hybrid_search_importance_floor() {
        let store = test_store();
        store
            .store_memories("u1", &[extracted("trivia about pgbouncer", 0.05)], &[unit_embedding(0)])
            .unwrap();
        let results = store
            .hybrid_search(
                "u1",
                "pgbouncer",
                &unit_embedding(0),
                SearchIntent::General,
                5,
                0.1,
                0.3,
            )
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn traverse_respects_depth_and_skips_origin() {
        let store = test_store();
        let ids = store
            .store_memories(
                "u1",
                &[extracted("a", 0.5), extracted("b", 0.5), extracted("c", 0.5)],
                &[unit_embedding(0), unit_embedding(1), unit_embedding(2)],
            )
            .unwrap();
        store.add_link(ids[0], ids[1], LinkType::Causes, 0.8, "").unwrap();
        store.add_link(ids[1], ids[2], LinkType::Causes, 0.8, "").unwrap();

        let depth1 = store.traverse_links(ids[0], 1).unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].memory.id, ids[1]);
        assert_eq!(depth1[0].depth, 1);
        assert_eq!(depth1[0].linked_from_id, ids[0]);

        let depth2 = store.traverse_links(ids[0], 2).unwrap();
        assert_eq!(depth2.len(), 2);
        assert!(depth2.iter().all(|t| t.memory.id != ids[0]));
        assert_eq!(depth2[1].depth, 2);
    }

    #[test]
    fn update_touch_bumps_access() {
        let store = test_store();
        let ids = store
            .store_memories("u1", &[extracted("a", 0.5)], &[unit_embedding(0)])
            .unwrap();
        let updated = store
            .update_memory(ids[0], MemoryPatch { touch: true, ..Default::default() })
            .unwrap();
        assert_eq!(updated.access_count, 1);
    }

    #[test]
    fn fts_match_expr_sanitizes_quotes() {
        let expr = fts_match_expr("what's \"pgbouncer\" doing?").unwrap();
        assert!(expr.contains("\"pgbouncer\""));
        assert!(expr.contains("\"what\""));
        assert!(fts_match_expr("  ... !!").is_none());
    }
}
