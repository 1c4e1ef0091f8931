pub mod config;
pub mod embedding;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod index;
pub mod judge;
pub mod query;
pub mod store;

pub use config::RetrievalConfig;
pub use embedding::{EmbeddingBackend, EmbeddingClient};
pub use engine::{build_engine, ConfiguredEngine, RetrievalEngine};
pub use enrich::enrich_elements;
pub use error::{Result, RetrievalError};
pub use index::{
    load_passages, CollectionIndex, EmbeddingIndex, IndexSource, MemoryIndex, MemoryPassage,
    SourceIndex,
};
pub use judge::{build_rerank_prompt, parse_rerank_answer, Judge, JudgedCandidate, LlmJudge};
pub use query::{build_element_query, build_query_from_profile, load_profile};
pub use remedy_llm::{LlmClient, LlmProvider};
pub use store::{PassageInsert, RagStore, ScoredPassage, StoreError};
