//! 밀집 벡터 인덱스 - LanceDB
//!
//! 컬렉션 하나당 Lance 테이블 하나를 씁니다. 스키마는 고정이며
//! (id, partition_key, text, dense_vector[dim]), 검색은 코사인
//! 유사도입니다. ANN 인덱스는 데이터가 충분히 쌓인 뒤 한 번
//! 생성합니다 (그 전에는 전수 스캔 - 순위는 동일).
//!
//! ref: https://lancedb.github.io/lancedb/

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use super::ScoredText;
use crate::error::Result;

/// ANN 인덱스를 만들기 시작하는 최소 행 수
/// (IVF 학습에 데이터가 필요 - 그 아래에서는 전수 스캔)
pub const INDEX_MIN_ROWS: usize = 256;

// ============================================================================
// DenseIndex
// ============================================================================

/// LanceDB 연결을 감싼 밀집 인덱스
pub struct DenseIndex {
    db: Connection,
}

impl DenseIndex {
    /// Lance 데이터 디렉토리 열기 (없으면 생성)
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .context("Invalid path encoding for LanceDB directory")?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 고정 스키마 생성
    fn schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("partition_key", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "dense_vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 빈 테이블 생성 (컬렉션 프로비저닝 단계)
    pub async fn create_table(&self, name: &str, dimension: usize) -> AnyResult<Table> {
        let schema = Arc::new(Self::schema(dimension));
        self.db
            .create_empty_table(name, schema)
            .execute()
            .await
            .with_context(|| format!("Failed to create lance table '{name}'"))
    }

    /// 기존 테이블 열기 (로드)
    pub async fn open_table(&self, name: &str) -> Result<Table> {
        let table = self
            .db
            .open_table(name)
            .execute()
            .await
            .with_context(|| format!("Failed to open lance table '{name}'"))?;
        Ok(table)
    }

    /// 테이블 삭제
    pub async fn drop_table(&self, name: &str) -> Result<()> {
        self.db
            .drop_table(name)
            .await
            .with_context(|| format!("Failed to drop lance table '{name}'"))?;
        Ok(())
    }

    /// 벡터 행 추가
    ///
    /// id는 희소 인덱스에서 발급된 청크 id와 공유됩니다.
    pub async fn insert(
        &self,
        table: &Table,
        dimension: usize,
        partition: &str,
        ids: &[i64],
        dense: &[Vec<f32>],
        texts: &[String],
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let batch = Self::build_batch(dimension, partition, ids, dense, texts)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(batches)
            .execute()
            .await
            .context("Failed to add vectors to lance table")?;

        Ok(ids.len())
    }

    fn build_batch(
        dimension: usize,
        partition: &str,
        ids: &[i64],
        dense: &[Vec<f32>],
        texts: &[String],
    ) -> Result<RecordBatch> {
        let partitions: Vec<&str> = std::iter::repeat(partition).take(ids.len()).collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let flat: Vec<f32> = dense.iter().flat_map(|v| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let item_field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            item_field,
            dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to build dense vector array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::schema(dimension)),
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(partitions)),
                Arc::new(StringArray::from(text_refs)),
                Arc::new(vectors),
            ],
        )
        .context("Failed to build record batch")?;

        Ok(batch)
    }

    /// 코사인 검색 - 스코어는 1 - distance, 내림차순
    pub async fn search(
        &self,
        table: &Table,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredText>> {
        let stream = table
            .vector_search(query.to_vec())
            .context("Failed to build vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut results = Vec::new();
        for batch in batches {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .context("Missing id column")?;
            let texts = batch
                .column_by_name("text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .context("Missing text column")?;
            // _distance 컬럼은 LanceDB가 자동 추가
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .context("Missing _distance column")?;

            for i in 0..batch.num_rows() {
                results.push(ScoredText {
                    id: ids.value(i),
                    score: 1.0 - distances.value(i),
                    text: texts.value(i).to_string(),
                });
            }
        }

        // 고정 데이터셋에 대해 결정적이도록 동점은 id 오름차순
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    /// 파티션 행 삭제
    pub async fn delete_partition(&self, table: &Table, partition: &str) -> Result<()> {
        let filter = format!("partition_key = '{}'", escape_literal(partition));
        table
            .delete(&filter)
            .await
            .context("Failed to delete partition rows")?;
        Ok(())
    }

    /// 행 수 조회
    pub async fn count(&self, table: &Table) -> Result<usize> {
        let count = table
            .count_rows(None)
            .await
            .context("Failed to count lance rows")?;
        Ok(count)
    }

    /// 행이 충분히 쌓였으면 코사인 ANN 인덱스 생성
    ///
    /// 반환값: 인덱스를 실제로 만들었는지 여부
    pub async fn maybe_create_index(&self, table: &Table) -> Result<bool> {
        let rows = self.count(table).await?;
        if rows < INDEX_MIN_ROWS {
            return Ok(false);
        }

        table
            .create_index(&["dense_vector"], Index::Auto)
            .execute()
            .await
            .context("Failed to create vector index")?;

        tracing::info!("Built ANN index on '{}' ({} rows)", table.name(), rows);
        Ok(true)
    }
}

/// SQL 문자열 리터럴 이스케이프
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_test_index() -> (TempDir, DenseIndex) {
        let dir = TempDir::new().unwrap();
        let index = DenseIndex::open(&dir.path().join("vectors.lance"))
            .await
            .unwrap();
        (dir, index)
    }

    fn unit_vec(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_create_insert_search() {
        let (_dir, index) = open_test_index().await;
        let table = index.create_table("kb", 4).await.unwrap();

        let ids = vec![1, 2, 3];
        let dense = vec![unit_vec(4, 0), unit_vec(4, 1), unit_vec(4, 2)];
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        index
            .insert(&table, 4, "kb_f1", &ids, &dense, &texts)
            .await
            .unwrap();

        let results = index.search(&table, &unit_vec(4, 1), 2).await.unwrap();
        assert!(results.len() <= 2);
        assert_eq!(results[0].id, 2);
        assert!((results[0].score - 1.0).abs() < 1e-4);

        // 내림차순 정렬 확인
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_delete_partition_scopes_to_one_file() {
        let (_dir, index) = open_test_index().await;
        let table = index.create_table("kb", 4).await.unwrap();

        index
            .insert(
                &table,
                4,
                "kb_f1",
                &[1, 2],
                &[unit_vec(4, 0), unit_vec(4, 1)],
                &["a".to_string(), "b".to_string()],
            )
            .await
            .unwrap();
        index
            .insert(
                &table,
                4,
                "kb_f2",
                &[3],
                &[unit_vec(4, 2)],
                &["c".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(index.count(&table).await.unwrap(), 3);
        index.delete_partition(&table, "kb_f1").await.unwrap();
        assert_eq!(index.count(&table).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_insert_is_noop() {
        let (_dir, index) = open_test_index().await;
        let table = index.create_table("kb", 4).await.unwrap();
        let inserted = index
            .insert(&table, 4, "kb_f1", &[], &[], &[])
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("it's"), "it''s");
        assert_eq!(escape_literal("plain"), "plain");
    }
}
