//! Vector Store - 지식베이스별 이중 인덱스 벡터 저장소
//!
//! 컬렉션 하나가 지식베이스 하나에 대응하며, 청크마다
//! 밀집 벡터(LanceDB, 코사인)와 희소 벡터(SQLite 역색인, 내적)를
//! 함께 보관합니다. 파일 단위 파티션으로 삭제/재수집 범위를
//! 한정합니다.
//!
//! 컬렉션 상태: absent → created → indexed → loaded

mod dense;
mod sparse;
mod store;

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::embedding::SparseVector;
use crate::error::Result;

pub use store::HybridVectorStore;

/// 하이브리드 기본 가중치 (밀집)
pub const DEFAULT_DENSE_WEIGHT: f32 = 0.6;
/// 하이브리드 기본 가중치 (희소)
pub const DEFAULT_SPARSE_WEIGHT: f32 = 0.4;

// ============================================================================
// Types
// ============================================================================

/// 삽입용 엔트리 - (희소, 밀집, 텍스트) 삼중쌍
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 희소 가중 용어 벡터
    pub sparse: SparseVector,
    /// 밀집 벡터 (컬렉션 차원과 일치해야 함)
    pub dense: Vec<f32>,
    /// 청크 텍스트
    pub text: String,
}

/// 검색 결과 한 건
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredText {
    /// 청크 id (삽입 순서로 증가)
    pub id: i64,
    /// 유사도 스코어 (높을수록 유사)
    pub score: f32,
    /// 청크 텍스트
    pub text: String,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// 벡터 저장소 공통 인터페이스
///
/// 구현체는 동시 호출에 안전해야 하며, 존재하지 않는 컬렉션에 대한
/// drop/load/release는 에러가 아니라 false를 반환합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 컬렉션 생성 (멱등) - 이미 있으면 이름만 반환
    ///
    /// 성공 시 컬렉션은 loaded 상태입니다. 부분 실패(스키마는 생겼으나
    /// 이후 단계 실패)는 `CollectionProvisioning`으로 표면화되며
    /// 자동 롤백하지 않습니다.
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<String>;

    /// 컬렉션 존재 여부
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// 파티션 생성 (멱등)
    async fn create_partition(&self, collection: &str, partition: &str) -> Result<String>;

    /// 엔트리 삽입
    ///
    /// 파티션이 없으면 자동 생성합니다. 삽입 후 컬렉션을 다시 로드해
    /// 새 벡터가 즉시 검색 가능합니다. 밀집 벡터 차원이 컬렉션 설정과
    /// 다르면 `DimensionMismatch`로 실패하고 0건 삽입됩니다.
    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<usize>;

    /// 밀집 벡터 검색 (코사인 유사도, 내림차순, 최대 top_k건)
    async fn dense_search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredText>>;

    /// 희소 벡터 검색 (가중 용어 내적, 내림차순, 최대 top_k건)
    async fn sparse_search(
        &self,
        collection: &str,
        query: &SparseVector,
        top_k: usize,
    ) -> Result<Vec<ScoredText>>;

    /// 하이브리드 검색 - 두 검색을 모두 수행한 뒤 가중 결합으로 재순위
    ///
    /// 가중치는 그대로 사용합니다 (합이 1이 되도록 정규화하지 않음 -
    /// 호출자 책임).
    async fn hybrid_search(
        &self,
        collection: &str,
        dense_query: &[f32],
        sparse_query: &SparseVector,
        dense_weight: f32,
        sparse_weight: f32,
        top_k: usize,
    ) -> Result<Vec<ScoredText>>;

    /// 파티션 삭제 (양쪽 인덱스 모두) - 없으면 false
    async fn drop_partition(&self, collection: &str, partition: &str) -> Result<bool>;

    /// 컬렉션 삭제 - 없으면 false
    async fn drop_collection(&self, name: &str) -> Result<bool>;

    /// 컬렉션을 메모리에 로드 - 없으면 false
    async fn load_collection(&self, name: &str) -> Result<bool>;

    /// 컬렉션을 메모리에서 해제 - 없으면 false
    async fn release_collection(&self, name: &str) -> Result<bool>;

    /// 컬렉션 엔트리 개수
    async fn count(&self, collection: &str) -> Result<usize>;
}

// ============================================================================
// Score Fusion
// ============================================================================

/// 가중 스코어 결합 (Milvus WeightedRanker 방식)
///
/// 청크 id 기준으로 두 결과를 합치고
/// `combined = dense_weight * dense + sparse_weight * sparse`로
/// 재순위합니다. 한쪽에만 있는 항목은 없는 쪽 기여가 0입니다.
/// 동점은 id 오름차순으로 안정적으로 깨집니다.
pub fn weighted_fusion(
    dense: &[ScoredText],
    sparse: &[ScoredText],
    dense_weight: f32,
    sparse_weight: f32,
    top_k: usize,
) -> Vec<ScoredText> {
    // id → (combined_score, text)
    let mut combined: HashMap<i64, (f32, &str)> = HashMap::new();

    for result in dense {
        let entry = combined.entry(result.id).or_insert((0.0, &result.text));
        entry.0 += dense_weight * result.score;
    }
    for result in sparse {
        let entry = combined.entry(result.id).or_insert((0.0, &result.text));
        entry.0 += sparse_weight * result.score;
    }

    let mut merged: Vec<ScoredText> = combined
        .into_iter()
        .map(|(id, (score, text))| ScoredText {
            id,
            score,
            text: text.to_string(),
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(top_k);
    merged
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// 희소 벡터 내적
pub fn sparse_inner_product(a: &SparseVector, b: &SparseVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: i64, score: f32) -> ScoredText {
        ScoredText {
            id,
            score,
            text: format!("chunk {id}"),
        }
    }

    #[test]
    fn test_cosine_similarity_basic() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_sparse_inner_product() {
        let a: SparseVector = [(1, 0.5), (2, 1.0)].into_iter().collect();
        let b: SparseVector = [(2, 2.0), (3, 4.0)].into_iter().collect();
        assert!((sparse_inner_product(&a, &b) - 2.0).abs() < 1e-6);
        assert_eq!(sparse_inner_product(&a, &SparseVector::new()), 0.0);
    }

    #[test]
    fn test_weighted_fusion_combines_both_sides() {
        let dense = vec![scored(1, 0.9), scored(2, 0.5)];
        let sparse = vec![scored(2, 1.0), scored(3, 0.8)];

        let merged = weighted_fusion(&dense, &sparse, 0.6, 0.4, 10);

        // id=2: 0.6*0.5 + 0.4*1.0 = 0.7 / id=1: 0.54 / id=3: 0.32
        assert_eq!(merged[0].id, 2);
        assert!((merged[0].score - 0.7).abs() < 1e-6);
        assert_eq!(merged[1].id, 1);
        assert_eq!(merged[2].id, 3);
    }

    #[test]
    fn test_weighted_fusion_degenerate_weights_match_dense() {
        let dense = vec![scored(5, 0.9), scored(7, 0.6), scored(2, 0.3)];
        let sparse = vec![scored(9, 10.0)];

        let merged = weighted_fusion(&dense, &sparse, 1.0, 0.0, 3);
        let ids: Vec<i64> = merged.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 7, 2]);
    }

    #[test]
    fn test_weighted_fusion_respects_top_k() {
        let dense: Vec<ScoredText> = (0..10).map(|i| scored(i, 1.0 - i as f32 * 0.05)).collect();
        let merged = weighted_fusion(&dense, &[], 1.0, 0.0, 4);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_weighted_fusion_tie_break_by_id() {
        let dense = vec![scored(8, 0.5), scored(3, 0.5)];
        let merged = weighted_fusion(&dense, &[], 1.0, 0.0, 10);
        assert_eq!(merged[0].id, 3);
        assert_eq!(merged[1].id, 8);
    }

    #[test]
    fn test_weighted_fusion_unnormalized_weights_pass_through() {
        // 합이 1이 아니어도 그대로 사용
        let dense = vec![scored(1, 1.0)];
        let merged = weighted_fusion(&dense, &[], 2.0, 3.0, 10);
        assert!((merged[0].score - 2.0).abs() < 1e-6);
    }
}
