//! Long-term memory: persistence (hybrid BM25 + vector store over the SQL
//! substrate), the proactive retrieval engine, domain-knowledge blocks,
//! and the retrieval log.

pub mod knowledge;
pub mod log;
pub mod retrieval;
pub mod store;
pub mod types;

pub use knowledge::{KnowledgeBlock, KnowledgeStore};
pub use log::RetrievalLogEntry;
pub use retrieval::RetrievalEngine;
pub use store::MemoryStore;
pub use types::{
    ExtractedMemory, LinkMetadata, LinkType, Memory, MemoryLink, MemoryPatch, SearchIntent,
    SurfacedMemory, TraversedLink,
};
