//! surro-rag - 하이브리드 검색 RAG 백엔드
//!
//! 문서 파일을 청크로 나누고 밀집/희소 이중 벡터로 임베딩해
//! LanceDB 벡터 검색 + SQLite 역색인을 결합한 하이브리드
//! 검색을 제공합니다. 지식베이스 단위로 검색 설정을 들고 다니며,
//! 파일 단위 파티션으로 삭제/재수집 범위를 한정합니다.

pub mod chunk;
pub mod cli;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod repo;
pub mod service;
pub mod storage;
pub mod vector;

// Re-exports
pub use chunk::{Chunk, Chunker};
pub use embedding::{BgeM3Client, Embedding, EmbeddingProvider, SparseVector};
pub use error::{Error, Result};
pub use repo::{
    get_data_dir, Knowledge, KnowledgeFile, KnowledgeRepository, MetadataRepository, NewKnowledge,
};
pub use service::{IngestOutcome, KnowledgeService, RetrieveOverrides, SearchType};
pub use storage::{FsObjectStorage, ObjectStorage};
pub use vector::{HybridVectorStore, ScoredText, VectorEntry, VectorStore};
