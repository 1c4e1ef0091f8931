use bytemuck::{cast_slice, pod_collect_to_vec};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid passage metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("passage {passage_id} has a corrupt embedding blob")]
    InvalidEmbedding { passage_id: i64 },
    #[error("collection '{collection}' holds {found}-dimensional embeddings, query has {expected}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed passage collections with brute-force cosine search.
#[derive(Debug, Clone)]
pub struct RagStore {
    path: PathBuf,
}

impl RagStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS passages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(collection_id, key),
                FOREIGN KEY(collection_id) REFERENCES collections(id)
            );
            CREATE INDEX IF NOT EXISTS idx_passages_collection ON passages(collection_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_collection(&self, name: &str) -> Result<i64> {
        if let Some(id) = self.collection_id(name)? {
            return Ok(id);
        }
        let conn = self.connection()?;
        conn.execute("INSERT INTO collections (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn collection_id(&self, name: &str) -> Result<Option<i64>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT id FROM collections WHERE name = ?1")?;
        Ok(stmt.query_row([name], |row| row.get(0)).optional()?)
    }

    /// Inserts passages in one transaction. A passage whose key already exists
    /// in the collection replaces the stored one.
    pub fn add_passages(&self, collection_id: i64, passages: &[PassageInsert]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for passage in passages {
            let embedding_blob = cast_slice::<f32, u8>(&passage.embedding);
            let metadata = serde_json::to_string(&passage.metadata)?;
            tx.execute(
                "INSERT INTO passages (collection_id, key, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(collection_id, key) DO UPDATE SET text = excluded.text, metadata = excluded.metadata, embedding = excluded.embedding",
                params![collection_id, passage.key, passage.text, metadata, embedding_blob],
            )?;
        }
        tx.commit()?;
        Ok(passages.len())
    }

    pub fn count_passages(&self, collection: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM passages JOIN collections ON passages.collection_id = collections.id WHERE collections.name = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn search_passages(
        &self,
        collection: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT passages.id, passages.key, passages.text, passages.metadata, passages.embedding
            FROM passages
            JOIN collections ON passages.collection_id = collections.id
            WHERE collections.name = ?1
            ORDER BY passages.id
            "#,
        )?;
        let mut rows = stmt.query([collection])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let passage_id: i64 = row.get(0)?;
            let metadata_raw: String = row.get(3)?;
            let embedding_blob: Vec<u8> = row.get(4)?;
            if embedding_blob.len() % std::mem::size_of::<f32>() != 0 {
                return Err(StoreError::InvalidEmbedding { passage_id });
            }
            let embedding: Vec<f32> = pod_collect_to_vec(&embedding_blob[..]);
            if embedding.len() != query_embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: query_embedding.len(),
                    found: embedding.len(),
                });
            }
            let score = cosine_similarity(query_embedding, &embedding);
            hits.push(ScoredPassage {
                passage_id,
                key: row.get(1)?,
                text: row.get(2)?,
                metadata: serde_json::from_str(&metadata_raw)?,
                embedding,
                score,
            });
        }
        sort_by_score(&mut hits, |hit| hit.score);
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[derive(Debug, Clone)]
pub struct PassageInsert {
    pub key: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage_id: i64,
    pub key: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
    pub score: f32,
}

/// Stable descending sort; NaN scores sink to the end.
pub(crate) fn sort_by_score<T>(items: &mut [T], score: impl Fn(&T) -> f32) {
    items.sort_by(|a, b| {
        let (a, b) = (score(a), score(b));
        b.partial_cmp(&a).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
    });
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn passage(key: &str, embedding: Vec<f32>) -> PassageInsert {
        let mut metadata = Map::new();
        metadata.insert("rule_id".to_string(), Value::String(key.to_string()));
        PassageInsert {
            key: key.to_string(),
            text: format!("{key} technique"),
            metadata,
            embedding,
        }
    }

    #[test]
    fn search_ranks_by_cosine_and_truncates() {
        let dir = tempdir().unwrap();
        let store = RagStore::open(dir.path().join("rag.db")).unwrap();
        let id = store.ensure_collection("wcag_docs").unwrap();
        assert_eq!(store.ensure_collection("wcag_docs").unwrap(), id);
        store
            .add_passages(
                id,
                &[
                    passage("F65", vec![1.0, 0.0]),
                    passage("F68", vec![0.0, 1.0]),
                    passage("F30", vec![0.7, 0.7]),
                ],
            )
            .unwrap();
        let hits = store.search_passages("wcag_docs", &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "F65");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].key, "F30");
        assert_eq!(hits[0].metadata["rule_id"], "F65");
    }

    #[test]
    fn re_adding_a_key_replaces_the_passage() {
        let dir = tempdir().unwrap();
        let store = RagStore::open(dir.path().join("rag.db")).unwrap();
        let id = store.ensure_collection("wcag_docs").unwrap();
        store.add_passages(id, &[passage("F65", vec![1.0, 0.0])]).unwrap();
        store.add_passages(id, &[passage("F65", vec![0.0, 1.0])]).unwrap();
        assert_eq!(store.count_passages("wcag_docs").unwrap(), 1);
        let hits = store.search_passages("wcag_docs", &[0.0, 1.0], 5).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        let store = RagStore::open(dir.path().join("rag.db")).unwrap();
        let id = store.ensure_collection("wcag_docs").unwrap();
        store.add_passages(id, &[passage("F65", vec![1.0, 0.0])]).unwrap();
        let err = store
            .search_passages("wcag_docs", &[1.0, 0.0, 0.0], 5)
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { found: 2, .. }));
    }

    #[test]
    fn unknown_collection_has_no_id() {
        let dir = tempdir().unwrap();
        let store = RagStore::open(dir.path().join("rag.db")).unwrap();
        assert!(store.collection_id("missing").unwrap().is_none());
    }

    #[test]
    fn nan_scores_sort_last() {
        let mut scores: Vec<f32> = vec![0.2, f32::NAN, 0.9, 0.5];
        sort_by_score(&mut scores, |s| *s);
        assert_eq!(&scores[..3], &[0.9f32, 0.5, 0.2]);
        assert!(scores[3].is_nan());
    }
}
