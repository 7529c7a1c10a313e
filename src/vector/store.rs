//! 이중 인덱스 하이브리드 저장소
//!
//! `DenseIndex`(LanceDB)와 `SparseIndex`(SQLite 역색인)를 하나의
//! `VectorStore`로 묶습니다. 청크 id는 희소 인덱스에서 발급받아
//! 양쪽이 공유하며, 밀집 측 삽입이 실패하면 희소 측 행을 지워
//! 보상합니다.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use lancedb::table::Table;
use tokio::sync::{Mutex, RwLock};

use super::dense::DenseIndex;
use super::sparse::SparseIndex;
use super::{weighted_fusion, ScoredText, VectorEntry, VectorStore};
use crate::embedding::SparseVector;
use crate::error::{Error, Result};

/// Lance 데이터 디렉토리 이름
const DENSE_DIR: &str = "vectors.lance";
/// 카탈로그 + 역색인 파일 이름
const SPARSE_DB: &str = "catalog.db";

// ============================================================================
// HybridVectorStore
// ============================================================================

/// 밀집 + 희소 이중 인덱스 저장소
pub struct HybridVectorStore {
    dense: DenseIndex,
    sparse: SparseIndex,
    /// loaded 상태의 컬렉션 - 열린 테이블 핸들
    loaded: RwLock<HashMap<String, Table>>,
    /// 프로비저닝 직렬화 (동시 create_collection 경합 방지)
    provision_lock: Mutex<()>,
}

impl HybridVectorStore {
    /// 데이터 디렉토리에서 저장소 열기
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let dense = DenseIndex::open(&data_dir.join(DENSE_DIR)).await?;
        let sparse = SparseIndex::open(&data_dir.join(SPARSE_DB))?;

        Ok(Self {
            dense,
            sparse,
            loaded: RwLock::new(HashMap::new()),
            provision_lock: Mutex::new(()),
        })
    }

    /// 컬렉션 테이블 핸들 조회 - loaded 캐시에 없으면 열어서 등록
    async fn table(&self, name: &str) -> Result<Table> {
        if let Some(table) = self.loaded.read().await.get(name) {
            return Ok(table.clone());
        }

        if !self.sparse.has_collection(name)? {
            return Err(Error::UnknownCollection(name.to_string()));
        }

        let table = self.dense.open_table(name).await?;
        self.loaded
            .write()
            .await
            .insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// 삽입 후 새 버전이 보이도록 핸들 갱신
    async fn refresh_table(&self, name: &str) -> Result<()> {
        let table = self.dense.open_table(name).await?;
        self.loaded.write().await.insert(name.to_string(), table);
        Ok(())
    }

    /// 밀집 측 기록 - 실패하면 호출자가 희소 행을 보상 삭제
    async fn write_dense(
        &self,
        collection: &str,
        partition: &str,
        dimension: usize,
        ids: &[i64],
        entries: &[VectorEntry],
    ) -> Result<()> {
        let table = self.table(collection).await?;
        let dense_vecs: Vec<Vec<f32>> = entries.iter().map(|e| e.dense.clone()).collect();
        let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();

        self.dense
            .insert(&table, dimension, partition, ids, &dense_vecs, &texts)
            .await?;
        Ok(())
    }

    /// 데이터 디렉토리 보장 후 열기
    pub async fn open_in(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            tokio::fs::create_dir_all(data_dir)
                .await
                .context("Failed to create vector data directory")?;
        }
        Self::open(data_dir).await
    }
}

#[async_trait]
impl VectorStore for HybridVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<String> {
        let _guard = self.provision_lock.lock().await;

        if self.sparse.has_collection(name)? {
            // 멱등 - 이미 있으면 로드만 보장
            let table = self.dense.open_table(name).await?;
            self.loaded
                .write()
                .await
                .insert(name.to_string(), table);
            return Ok(name.to_string());
        }

        // 밀집 스키마 먼저, 카탈로그 등록은 그 다음.
        // 중간에 실패하면 부분 생성 상태가 남으며 롤백하지 않습니다.
        let table = self
            .dense
            .create_table(name, dimension)
            .await
            .map_err(|e| Error::CollectionProvisioning {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        self.sparse
            .register_collection(name, dimension)
            .map_err(|e| Error::CollectionProvisioning {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        self.loaded.write().await.insert(name.to_string(), table);
        tracing::info!("Created collection '{}' (dim {})", name, dimension);

        Ok(name.to_string())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        self.sparse.has_collection(name)
    }

    async fn create_partition(&self, collection: &str, partition: &str) -> Result<String> {
        if !self.sparse.has_collection(collection)? {
            return Err(Error::UnknownCollection(collection.to_string()));
        }
        self.sparse.create_partition(collection, partition)?;
        Ok(partition.to_string())
    }

    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let dimension = self
            .sparse
            .collection_dimension(collection)?
            .ok_or_else(|| Error::UnknownCollection(collection.to_string()))?;

        // 어느 쪽에도 쓰기 전에 전체 배치의 차원을 검증
        for entry in &entries {
            if entry.dense.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: entry.dense.len(),
                });
            }
        }

        self.sparse.create_partition(collection, partition)?;

        // 희소 측이 청크 id를 발급하고, 같은 id로 밀집 측에 기록
        let ids = self.sparse.insert_entries(collection, partition, &entries)?;

        // 테이블 열기를 포함한 밀집 측 실패 전체가 보상 대상
        if let Err(e) = self
            .write_dense(collection, partition, dimension, &ids, &entries)
            .await
        {
            // 희소 측 행을 지워 0건 삽입으로 되돌림
            if let Err(comp) = self.sparse.delete_entries(&ids) {
                tracing::error!(
                    "Compensation failed after dense insert error on '{}': {}",
                    collection,
                    comp
                );
            }
            return Err(e);
        }

        self.refresh_table(collection).await?;

        if !self.sparse.is_indexed(collection)? {
            let table = self.table(collection).await?;
            if self.dense.maybe_create_index(&table).await? {
                self.sparse.mark_indexed(collection)?;
            }
        }

        Ok(ids.len())
    }

    async fn dense_search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredText>> {
        let table = self.table(collection).await?;
        self.dense.search(&table, query, top_k).await
    }

    async fn sparse_search(
        &self,
        collection: &str,
        query: &SparseVector,
        top_k: usize,
    ) -> Result<Vec<ScoredText>> {
        if !self.sparse.has_collection(collection)? {
            return Err(Error::UnknownCollection(collection.to_string()));
        }
        self.sparse.search(collection, query, top_k)
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        dense_query: &[f32],
        sparse_query: &SparseVector,
        dense_weight: f32,
        sparse_weight: f32,
        top_k: usize,
    ) -> Result<Vec<ScoredText>> {
        let (dense, sparse) = tokio::join!(
            self.dense_search(collection, dense_query, top_k),
            self.sparse_search(collection, sparse_query, top_k),
        );
        let (dense, sparse) = (dense?, sparse?);

        Ok(weighted_fusion(
            &dense,
            &sparse,
            dense_weight,
            sparse_weight,
            top_k,
        ))
    }

    async fn drop_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        if !self.sparse.has_collection(collection)? {
            return Ok(false);
        }

        let existed = self.sparse.drop_partition(collection, partition)?;
        let table = self.table(collection).await?;
        self.dense.delete_partition(&table, partition).await?;
        self.refresh_table(collection).await?;

        Ok(existed)
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        let _guard = self.provision_lock.lock().await;

        if !self.sparse.has_collection(name)? {
            return Ok(false);
        }

        self.loaded.write().await.remove(name);
        self.dense.drop_table(name).await?;
        self.sparse.drop_collection(name)?;
        tracing::info!("Dropped collection '{}'", name);

        Ok(true)
    }

    async fn load_collection(&self, name: &str) -> Result<bool> {
        if !self.sparse.has_collection(name)? {
            return Ok(false);
        }

        let table = self.dense.open_table(name).await?;
        self.loaded.write().await.insert(name.to_string(), table);
        Ok(true)
    }

    async fn release_collection(&self, name: &str) -> Result<bool> {
        if !self.sparse.has_collection(name)? {
            return Ok(false);
        }

        self.loaded.write().await.remove(name);
        Ok(true)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        if !self.sparse.has_collection(collection)? {
            return Err(Error::UnknownCollection(collection.to_string()));
        }
        self.sparse.count(collection)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_test_store() -> (TempDir, HybridVectorStore) {
        let dir = TempDir::new().unwrap();
        let store = HybridVectorStore::open_in(dir.path()).await.unwrap();
        (dir, store)
    }

    fn entry(dense: Vec<f32>, terms: &[(u32, f32)], text: &str) -> VectorEntry {
        VectorEntry {
            sparse: terms.iter().copied().collect(),
            dense,
            text: text.to_string(),
        }
    }

    fn unit_vec(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_create_collection_idempotent() {
        let (_dir, store) = open_test_store().await;

        assert_eq!(store.create_collection("kb", 4).await.unwrap(), "kb");
        assert_eq!(store.create_collection("kb", 4).await.unwrap(), "kb");
        assert!(store.has_collection("kb").await.unwrap());
        assert!(!store.has_collection("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_inserts_nothing() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        let entries = vec![
            entry(unit_vec(4, 0), &[(1, 1.0)], "good"),
            entry(vec![1.0, 0.0], &[(2, 1.0)], "short vector"),
        ];
        let err = store.insert("kb", "kb_f1", entries).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert_eq!(store.count("kb").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dense_failure_compensates_sparse_rows() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        // 밀집 테이블을 뒤에서 제거해 밀집 측 기록을 강제로 실패시킴
        store.loaded.write().await.clear();
        store.dense.drop_table("kb").await.unwrap();

        let err = store
            .insert(
                "kb",
                "kb_f1",
                vec![entry(unit_vec(4, 0), &[(1, 1.0)], "a")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        // 희소 측에 썼던 행이 보상 삭제되어 0건으로 되돌아감
        assert_eq!(store.sparse.count("kb").unwrap(), 0);

        let query: SparseVector = [(1, 1.0)].into_iter().collect();
        assert!(store.sparse_search("kb", &query, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_then_search_both_sides() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        let inserted = store
            .insert(
                "kb",
                "kb_f1",
                vec![
                    entry(unit_vec(4, 0), &[(10, 1.0)], "alpha"),
                    entry(unit_vec(4, 1), &[(20, 2.0)], "beta"),
                    entry(unit_vec(4, 2), &[(30, 3.0)], "gamma"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(store.count("kb").await.unwrap(), 3);

        let dense = store.dense_search("kb", &unit_vec(4, 1), 2).await.unwrap();
        assert_eq!(dense[0].text, "beta");
        assert!((dense[0].score - 1.0).abs() < 1e-4);

        let query: SparseVector = [(20, 1.0)].into_iter().collect();
        let sparse = store.sparse_search("kb", &query, 2).await.unwrap();
        assert_eq!(sparse.len(), 1);
        assert_eq!(sparse[0].text, "beta");
    }

    #[tokio::test]
    async fn test_hybrid_degenerate_weights_match_dense() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        store
            .insert(
                "kb",
                "kb_f1",
                vec![
                    entry(unit_vec(4, 0), &[(10, 1.0)], "alpha"),
                    entry(unit_vec(4, 1), &[(10, 5.0)], "beta"),
                ],
            )
            .await
            .unwrap();

        let sparse_query: SparseVector = [(10, 1.0)].into_iter().collect();
        let dense_only = store
            .hybrid_search("kb", &unit_vec(4, 0), &sparse_query, 1.0, 0.0, 5)
            .await
            .unwrap();
        let dense = store.dense_search("kb", &unit_vec(4, 0), 5).await.unwrap();

        let hybrid_ids: Vec<i64> = dense_only.iter().map(|r| r.id).collect();
        let dense_ids: Vec<i64> = dense.iter().map(|r| r.id).collect();
        assert_eq!(hybrid_ids, dense_ids);
    }

    #[tokio::test]
    async fn test_hybrid_reranks_with_both_signals() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        // alpha: 밀집 유사 / beta: 희소 유사
        store
            .insert(
                "kb",
                "kb_f1",
                vec![
                    entry(unit_vec(4, 0), &[(99, 0.1)], "alpha"),
                    entry(unit_vec(4, 1), &[(10, 2.0)], "beta"),
                ],
            )
            .await
            .unwrap();

        let sparse_query: SparseVector = [(10, 1.0)].into_iter().collect();
        let results = store
            .hybrid_search("kb", &unit_vec(4, 0), &sparse_query, 0.6, 0.4, 5)
            .await
            .unwrap();

        // beta: 0.6*0 + 0.4*2.0 = 0.8 / alpha: 0.6*1.0 = 0.6
        assert_eq!(results[0].text, "beta");
        assert_eq!(results[1].text, "alpha");
    }

    #[tokio::test]
    async fn test_drop_partition_scopes_to_one_file() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        store
            .insert(
                "kb",
                "kb_f1",
                vec![entry(unit_vec(4, 0), &[(1, 1.0)], "a")],
            )
            .await
            .unwrap();
        store
            .insert(
                "kb",
                "kb_f2",
                vec![entry(unit_vec(4, 1), &[(2, 1.0)], "b")],
            )
            .await
            .unwrap();

        assert!(store.drop_partition("kb", "kb_f1").await.unwrap());
        assert_eq!(store.count("kb").await.unwrap(), 1);

        let remaining = store.dense_search("kb", &unit_vec(4, 1), 5).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "b");

        assert!(!store.drop_partition("kb", "kb_f1").await.unwrap());
    }

    #[tokio::test]
    async fn test_lifecycle_bools_for_missing_collection() {
        let (_dir, store) = open_test_store().await;

        assert!(!store.drop_collection("ghost").await.unwrap());
        assert!(!store.load_collection("ghost").await.unwrap());
        assert!(!store.release_collection("ghost").await.unwrap());
        assert!(!store.drop_partition("ghost", "p").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_collection_removes_everything() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();
        store
            .insert(
                "kb",
                "kb_f1",
                vec![entry(unit_vec(4, 0), &[(1, 1.0)], "a")],
            )
            .await
            .unwrap();

        assert!(store.drop_collection("kb").await.unwrap());
        assert!(!store.has_collection("kb").await.unwrap());

        // 같은 이름으로 재생성 가능
        store.create_collection("kb", 4).await.unwrap();
        assert_eq!(store.count("kb").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_and_release_roundtrip() {
        let (_dir, store) = open_test_store().await;
        store.create_collection("kb", 4).await.unwrap();

        assert!(store.release_collection("kb").await.unwrap());
        assert!(store.load_collection("kb").await.unwrap());

        // release 후에도 검색은 재로드로 동작
        assert!(store.release_collection("kb").await.unwrap());
        let results = store.dense_search("kb", &unit_vec(4, 0), 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_unknown_collection() {
        let (_dir, store) = open_test_store().await;
        let err = store
            .dense_search("ghost", &unit_vec(4, 0), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCollection(_)));
    }
}
