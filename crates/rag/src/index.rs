use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use remedy_core::RetrievalHit;

use crate::embedding::EmbeddingClient;
use crate::error::{Result, RetrievalError};
use crate::store::{cosine_similarity, sort_by_score, RagStore, ScoredPassage};

/// Nearest-passage lookup. Hits come back best first, at most `k` of them.
pub trait EmbeddingIndex: Send + Sync {
    fn search(
        &self,
        query: &str,
        k: usize,
    ) -> impl Future<Output = Result<Vec<RetrievalHit>>> + Send;
}

/// Where reference passages live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexSource {
    Collection {
        db_path: PathBuf,
        name: String,
    },
    Memory {
        #[serde(default)]
        texts: Vec<String>,
        #[serde(default)]
        file: Option<PathBuf>,
    },
}

impl Default for IndexSource {
    fn default() -> Self {
        IndexSource::Collection {
            db_path: PathBuf::from("remedy.db"),
            name: "wcag_docs".to_string(),
        }
    }
}

impl IndexSource {
    pub fn describe(&self) -> String {
        match self {
            IndexSource::Collection { db_path, name } => {
                format!("collection '{}' in {}", name, db_path.display())
            }
            IndexSource::Memory { texts, file } => match file {
                Some(path) => format!("memory passages from {}", path.display()),
                None => format!("{} in-memory passages", texts.len()),
            },
        }
    }

    pub async fn open(&self, embeddings: EmbeddingClient) -> Result<SourceIndex> {
        match self {
            IndexSource::Collection { db_path, name } => Ok(SourceIndex::Collection(
                CollectionIndex::open(db_path, name, embeddings)?,
            )),
            IndexSource::Memory { texts, file } => {
                let mut passages: Vec<MemoryPassage> =
                    texts.iter().cloned().map(MemoryPassage::Text).collect();
                if let Some(path) = file {
                    passages.extend(load_passages(path)?);
                }
                Ok(SourceIndex::Memory(
                    MemoryIndex::from_passages(passages, embeddings).await?,
                ))
            }
        }
    }
}

/// The index variants selectable from configuration.
pub enum SourceIndex {
    Collection(CollectionIndex),
    Memory(MemoryIndex),
}

impl EmbeddingIndex for SourceIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        match self {
            SourceIndex::Collection(index) => index.search(query, k).await,
            SourceIndex::Memory(index) => index.search(query, k).await,
        }
    }
}

/// A named collection in the SQLite passage store.
pub struct CollectionIndex {
    store: RagStore,
    collection: String,
    embeddings: EmbeddingClient,
}

impl CollectionIndex {
    pub fn open(db_path: &Path, collection: &str, embeddings: EmbeddingClient) -> Result<Self> {
        if !db_path.exists() {
            return Err(RetrievalError::IndexUnavailable(format!(
                "passage store {} does not exist",
                db_path.display()
            )));
        }
        let store = RagStore::open(db_path).map_err(unavailable)?;
        if store.collection_id(collection).map_err(unavailable)?.is_none() {
            return Err(RetrievalError::IndexUnavailable(format!(
                "collection '{collection}' not found in {}",
                db_path.display()
            )));
        }
        Ok(Self {
            store,
            collection: collection.to_string(),
            embeddings,
        })
    }
}

impl EmbeddingIndex for CollectionIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        let query_embedding = self.embeddings.embed(query).await?;
        let store = self.store.clone();
        let collection = self.collection.clone();
        let passages = tokio::task::spawn_blocking(move || {
            store.search_passages(&collection, &query_embedding, k)
        })
        .await
        .map_err(|err| RetrievalError::IndexUnavailable(format!("search task failed: {err}")))?
        .map_err(unavailable)?;
        debug!(collection = %self.collection, hits = passages.len(), "collection search");
        Ok(passages.into_iter().map(passage_hit).collect())
    }
}

fn passage_hit(passage: ScoredPassage) -> RetrievalHit {
    let mut hit = RetrievalHit::new(passage.text, passage.score).with_metadata(passage.metadata);
    hit.embedding = Some(passage.embedding);
    hit
}

fn unavailable(err: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::IndexUnavailable(err.to_string())
}

/// One passage of an in-memory corpus file: a bare string or text with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryPassage {
    Text(String),
    Entry {
        text: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

impl MemoryPassage {
    fn into_parts(self) -> (String, Map<String, Value>) {
        match self {
            MemoryPassage::Text(text) => (text, Map::new()),
            MemoryPassage::Entry { text, metadata } => (text, metadata),
        }
    }
}

/// Reads a JSON array of passages.
pub fn load_passages(path: &Path) -> Result<Vec<MemoryPassage>> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        RetrievalError::IndexUnavailable(format!("failed to read {}: {err}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        RetrievalError::InvalidConfig(format!("invalid passage file {}: {err}", path.display()))
    })
}

struct MemoryEntry {
    text: String,
    metadata: Map<String, Value>,
    embedding: Vec<f32>,
}

/// Passages embedded once at construction and searched by cosine similarity.
pub struct MemoryIndex {
    entries: Vec<MemoryEntry>,
    embeddings: EmbeddingClient,
}

impl MemoryIndex {
    pub async fn from_texts(texts: Vec<String>, embeddings: EmbeddingClient) -> Result<Self> {
        let passages = texts.into_iter().map(MemoryPassage::Text).collect();
        Self::from_passages(passages, embeddings).await
    }

    pub async fn from_passages(
        passages: Vec<MemoryPassage>,
        embeddings: EmbeddingClient,
    ) -> Result<Self> {
        let (texts, metadata): (Vec<String>, Vec<Map<String, Value>>) =
            passages.into_iter().map(MemoryPassage::into_parts).unzip();
        let vectors = embeddings.embed_batch(&texts).await?;
        let entries = texts
            .into_iter()
            .zip(metadata)
            .zip(vectors)
            .map(|((text, metadata), embedding)| MemoryEntry {
                text,
                metadata,
                embedding,
            })
            .collect();
        Ok(Self {
            entries,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EmbeddingIndex for MemoryIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        let query_embedding = self.embeddings.embed(query).await?;
        let mut hits: Vec<RetrievalHit> = self
            .entries
            .iter()
            .map(|entry| {
                let score = cosine_similarity(&query_embedding, &entry.embedding);
                let mut hit =
                    RetrievalHit::new(entry.text.clone(), score).with_metadata(entry.metadata.clone());
                hit.embedding = Some(entry.embedding.clone());
                hit
            })
            .collect();
        sort_by_score(&mut hits, |hit| hit.score);
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PassageInsert;
    use tempfile::tempdir;

    fn texts() -> Vec<String> {
        vec![
            "Failure of 1.1.1 due to missing alt text on an image".to_string(),
            "Failure of 1.3.1 due to form inputs without labels".to_string(),
            "Failure of 4.1.2 due to buttons without accessible names".to_string(),
        ]
    }

    #[tokio::test]
    async fn memory_index_returns_best_match_first() {
        let index = MemoryIndex::from_texts(texts(), EmbeddingClient::hash())
            .await
            .unwrap();
        assert_eq!(index.len(), 3);
        let hits = index.search("missing alt text image", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("alt text"));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn missing_store_is_unavailable() {
        let dir = tempdir().unwrap();
        let source = IndexSource::Collection {
            db_path: dir.path().join("absent.db"),
            name: "wcag_docs".to_string(),
        };
        let err = source.open(EmbeddingClient::hash()).await.err().unwrap();
        assert_eq!(err.kind(), remedy_core::ErrorKind::RetrievalUnavailable);
        assert!(!dir.path().join("absent.db").exists());
    }

    #[tokio::test]
    async fn missing_collection_is_unavailable() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("rag.db");
        RagStore::open(&db_path).unwrap();
        let err = CollectionIndex::open(&db_path, "wcag_docs", EmbeddingClient::hash())
            .err()
            .unwrap();
        assert!(matches!(err, RetrievalError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn collection_index_searches_the_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("rag.db");
        let embeddings = EmbeddingClient::hash();
        let store = RagStore::open(&db_path).unwrap();
        let id = store.ensure_collection("wcag_docs").unwrap();
        let vectors = embeddings.embed_batch(&texts()).await.unwrap();
        let passages: Vec<PassageInsert> = texts()
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(idx, (text, embedding))| PassageInsert {
                key: format!("F{idx}"),
                text,
                metadata: Map::new(),
                embedding,
            })
            .collect();
        store.add_passages(id, &passages).unwrap();

        let index = CollectionIndex::open(&db_path, "wcag_docs", embeddings).unwrap();
        let hits = index.search("form inputs without labels", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].text.contains("labels"));
        assert!(hits[0].embedding.is_some());
    }

    #[test]
    fn passage_files_accept_strings_and_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passages.json");
        std::fs::write(
            &path,
            r#"["plain passage", {"text": "with metadata", "metadata": {"rule_id": "F65"}}]"#,
        )
        .unwrap();
        let passages = load_passages(&path).unwrap();
        assert_eq!(passages[0], MemoryPassage::Text("plain passage".to_string()));
        match &passages[1] {
            MemoryPassage::Entry { metadata, .. } => assert_eq!(metadata["rule_id"], "F65"),
            other => panic!("unexpected passage {other:?}"),
        }
    }

    #[test]
    fn source_parses_from_tagged_yaml_shape() {
        let source: IndexSource =
            serde_json::from_str(r#"{"type": "memory", "texts": ["a", "b"]}"#).unwrap();
        assert_eq!(source.describe(), "2 in-memory passages");
        assert_eq!(
            IndexSource::default().describe(),
            "collection 'wcag_docs' in remedy.db"
        );
    }
}
