//! 검색/수집 오케스트레이터
//!
//! 청커, 임베더, 벡터 저장소, 메타데이터 저장소, 오브젝트
//! 스토리지를 묶어 지식베이스 단위의 수집과 검색을 제공합니다.
//! 모든 협력자는 시작 시 한 번 생성되어 주입됩니다.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use uuid::Uuid;

use crate::chunk::{file_extension, Chunker};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::repo::{Knowledge, KnowledgeFile, MetadataRepository, NewKnowledge};
use crate::storage::{ObjectStorage, DEFAULT_BUCKET};
use crate::vector::{ScoredText, VectorEntry, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 검색 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// 밀집 벡터 (의미) 검색
    Semantic,
    /// 희소 벡터 (전문) 검색
    FullText,
    /// 두 검색의 가중 결합
    Hybrid,
}

impl SearchType {
    /// 숫자 id에서 변환 - 알 수 없는 값은 기본값으로 대체하지 않고 에러
    pub fn from_id(id: i32) -> Result<Self> {
        match id {
            1 => Ok(Self::Semantic),
            2 => Ok(Self::FullText),
            3 => Ok(Self::Hybrid),
            other => Err(Error::InvalidSearchType(other)),
        }
    }
}

/// 수집 결과
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub file_id: Uuid,
    pub chunk_count: usize,
}

/// 검색 시 지식베이스 설정을 덮어쓰는 옵션
#[derive(Debug, Clone, Default)]
pub struct RetrieveOverrides {
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
}

/// 파일 파티션 이름: `{컬렉션}_{파일id(하이픈 없는 형식)}`
pub fn partition_name(collection: &str, file_id: Uuid) -> String {
    format!("{}_{}", collection, file_id.simple())
}

// ============================================================================
// KnowledgeService
// ============================================================================

/// 지식베이스 서비스
pub struct KnowledgeService {
    repo: Arc<dyn MetadataRepository>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    storage: Arc<dyn ObjectStorage>,
    chunker: Chunker,
}

impl KnowledgeService {
    pub fn new(
        repo: Arc<dyn MetadataRepository>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            repo,
            vector,
            embedder,
            storage,
            chunker: Chunker::with_defaults(),
        }
    }

    // ------------------------------------------------------------------
    // 지식베이스 수명주기
    // ------------------------------------------------------------------

    /// 지식베이스 생성 - 컬렉션 먼저, 메타데이터 기록은 그 다음
    ///
    /// 컬렉션 생성이 실패하면 메타데이터는 남지 않습니다.
    pub async fn create_knowledge(&self, new: NewKnowledge) -> Result<Knowledge> {
        if self.repo.get_by_name(&new.name)?.is_some() {
            return Err(anyhow::anyhow!("knowledge '{}' already exists", new.name).into());
        }

        self.vector
            .create_collection(&new.name, self.embedder.dimension())
            .await?;

        let knowledge = self.repo.create(new)?;
        Ok(knowledge)
    }

    /// 이름으로 지식베이스 조회
    pub fn get_knowledge(&self, name: &str) -> Result<Knowledge> {
        self.repo
            .get_by_name(name)?
            .ok_or_else(|| Error::UnknownKnowledge(name.to_string()))
    }

    /// 전체 지식베이스 목록
    pub fn list_knowledges(&self) -> Result<Vec<Knowledge>> {
        Ok(self.repo.get_all()?)
    }

    /// 지식베이스의 파일 목록
    pub fn list_files(&self, name: &str) -> Result<Vec<KnowledgeFile>> {
        let knowledge = self.get_knowledge(name)?;
        Ok(self.repo.list_files(knowledge.id)?)
    }

    /// 지식베이스 삭제 - 컬렉션, 파일 기록, 메타데이터 모두 제거
    pub async fn drop_knowledge(&self, name: &str) -> Result<()> {
        let knowledge = self.get_knowledge(name)?;

        // 원본 파일도 함께 정리
        for file in self.repo.list_files(knowledge.id)? {
            if !self
                .storage
                .delete_object(DEFAULT_BUCKET, &file.path)
                .await?
            {
                tracing::warn!("Object already missing: {}", file.path);
            }
        }

        self.vector.drop_collection(&knowledge.name).await?;
        self.repo.delete(knowledge.id)?;
        tracing::info!("Dropped knowledge '{}'", name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 수집
    // ------------------------------------------------------------------

    /// 파일 수집 - 업로드, 청킹, 임베딩, 벡터 삽입, 기록 순서
    ///
    /// 벡터 삽입까지 성공한 뒤 메타데이터 기록이 실패하면
    /// `PartialIngestion`으로 보고하고 벡터는 남겨둡니다
    /// (파티션 이름으로 운영자가 정리 가능).
    pub async fn ingest(&self, knowledge_name: &str, filename: &str, data: &[u8]) -> Result<IngestOutcome> {
        let knowledge = self.get_knowledge(knowledge_name)?;

        // 벡터 쓰기 전에 파일 id를 발급해 파티션 이름을 고정
        let file_id = Uuid::new_v4();
        let partition = partition_name(&knowledge.name, file_id);
        let object_key = format!("{}/{}", knowledge.name, filename);

        self.storage
            .upload(DEFAULT_BUCKET, &object_key, data)
            .await?;

        // 문서 파싱은 CPU 바운드 - 런타임 워커 대신 블로킹 풀에서 수행
        let chunker = self.chunker.clone();
        let bytes = data.to_vec();
        let name = filename.to_string();
        let (chunk_length, overlap) = (knowledge.chunk_length, knowledge.overlap);
        let chunks =
            tokio::task::spawn_blocking(move || chunker.split(&bytes, &name, chunk_length, overlap))
                .await
                .context("chunking task failed")??;
        if chunks.is_empty() {
            tracing::warn!("No text extracted from '{}'", filename);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let entries: Vec<VectorEntry> = embeddings
            .into_iter()
            .zip(texts)
            .map(|(embedding, text)| VectorEntry {
                sparse: embedding.sparse,
                dense: embedding.dense,
                text,
            })
            .collect();

        let chunk_count = self
            .vector
            .insert(&knowledge.name, &partition, entries)
            .await?;

        let file = KnowledgeFile {
            id: file_id,
            knowledge_id: knowledge.id,
            name: filename.to_string(),
            path: object_key,
            file_type: file_extension(filename),
            chunk_count,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.create_file(&file) {
            tracing::error!(
                "Metadata write failed after vector insert into '{}': {}",
                partition,
                e
            );
            return Err(Error::PartialIngestion {
                partition,
                source: e,
            });
        }

        tracing::info!(
            "Ingested '{}' into '{}' ({} chunks)",
            filename,
            knowledge_name,
            chunk_count
        );
        Ok(IngestOutcome {
            file_id,
            chunk_count,
        })
    }

    /// 파일 삭제 - 파티션, 원본, 기록 순서로 제거
    pub async fn delete_file(&self, knowledge_name: &str, file_id: Uuid) -> Result<()> {
        let knowledge = self.get_knowledge(knowledge_name)?;
        let file = self
            .repo
            .get_file(file_id)?
            .with_context(|| format!("file record '{file_id}' not found"))?;

        let partition = partition_name(&knowledge.name, file.id);
        self.vector
            .drop_partition(&knowledge.name, &partition)
            .await?;
        self.storage
            .delete_object(DEFAULT_BUCKET, &file.path)
            .await?;
        self.repo.delete_file(file.id)?;

        tracing::info!("Deleted file '{}' from '{}'", file.name, knowledge_name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 검색
    // ------------------------------------------------------------------

    /// 지식베이스 설정에 따른 검색
    ///
    /// search_type_id 검증은 임베딩 호출보다 먼저 수행됩니다.
    /// 임계값은 strict (score > threshold)이며, 저장소가 돌려준
    /// 순서를 유지한 채 거르기만 합니다. 빈 결과는 에러가 아닙니다.
    pub async fn retrieve(
        &self,
        knowledge_name: &str,
        query: &str,
        overrides: RetrieveOverrides,
    ) -> Result<Vec<ScoredText>> {
        let knowledge = self.get_knowledge(knowledge_name)?;
        let search_type = SearchType::from_id(knowledge.search_type_id)?;

        let top_k = overrides.top_k.unwrap_or(knowledge.top_k);
        let threshold = overrides
            .score_threshold
            .unwrap_or(knowledge.score_threshold);

        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingBackend("empty embedding response".to_string()))?;

        let results = match search_type {
            SearchType::Semantic => {
                self.vector
                    .dense_search(&knowledge.name, &embedding.dense, top_k)
                    .await?
            }
            SearchType::FullText => {
                self.vector
                    .sparse_search(&knowledge.name, &embedding.sparse, top_k)
                    .await?
            }
            SearchType::Hybrid => {
                self.vector
                    .hybrid_search(
                        &knowledge.name,
                        &embedding.dense,
                        &embedding.sparse,
                        knowledge.dense_weight,
                        knowledge.sparse_weight,
                        top_k,
                    )
                    .await?
            }
        };

        // 순서는 저장소가 정한 그대로, 임계값 이하만 제거
        Ok(results
            .into_iter()
            .filter(|r| r.score > threshold)
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
