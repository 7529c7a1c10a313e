//! 임베딩 모듈 - 밀집 + 희소 이중 벡터 생성
//!
//! BGE-M3 계열 추론 서버를 통해 텍스트 배치를
//! 밀집 벡터(코사인 유사도용)와 희소 가중 용어 벡터(내적용)로
//! 변환합니다. 출력은 입력과 같은 길이, 같은 순서입니다.
//!
//! ref: https://huggingface.co/BAAI/bge-m3

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 기본 임베딩 차원 (BGE-M3)
pub const DEFAULT_DIMENSION: usize = 1024;

/// 내부 배치 크기
pub const DEFAULT_BATCH_SIZE: usize = 12;

/// 텍스트 최대 길이 - 초과분은 거부하지 않고 잘라냄
pub const DEFAULT_MAX_LENGTH: usize = 8192;

/// 임베딩 서버 주소 환경변수
pub const EMBEDDING_URL_ENV: &str = "EMBEDDING_URL";

// ============================================================================
// Types
// ============================================================================

/// 희소 벡터 - 용어 id → 가중치 매핑
pub type SparseVector = HashMap<u32, f32>;

/// 텍스트 하나의 임베딩 쌍
#[derive(Debug, Clone)]
pub struct Embedding {
    /// 밀집 벡터 (고정 차원)
    pub dense: Vec<f32>,
    /// 희소 가중 용어 벡터
    pub sparse: SparseVector,
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 시작 시 한 번 생성되어 컴포넌트에 주입되는, 동시 호출에 안전한
/// 공유 인스턴스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 텍스트 배치 임베딩 (입력 순서 보존, 길이 동일)
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// 밀집 벡터 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// BgeM3Client
// ============================================================================

/// 원격 BGE-M3 추론 서버 클라이언트
///
/// 백엔드 장애는 `EmbeddingBackend` 에러로 그대로 표면화합니다.
/// 내부 재시도는 하지 않습니다 - 백엔드 복구 후 호출자가 재시도합니다.
#[derive(Debug)]
pub struct BgeM3Client {
    endpoint: String,
    client: reqwest::Client,
    dimension: usize,
    batch_size: usize,
    max_length: usize,
}

/// 추론 서버 요청 본문 (FlagEmbedding encode 호환)
#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    texts: &'a [String],
    return_dense: bool,
    return_sparse: bool,
}

/// 추론 서버 응답
#[derive(Debug, Deserialize)]
struct EncodeResponse {
    dense_vecs: Vec<Vec<f32>>,
    lexical_weights: Vec<SparseVector>,
}

impl BgeM3Client {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `endpoint` - 추론 서버 베이스 URL (예: http://localhost:8080)
    pub fn new(endpoint: String) -> Result<Self> {
        Self::with_dimension(endpoint, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성
    pub fn with_dimension(endpoint: String, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            dimension,
            batch_size: DEFAULT_BATCH_SIZE,
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// 환경변수(EMBEDDING_URL)에서 주소를 읽어 생성
    ///
    /// 설정 오류는 첫 호출이 아니라 시작 시점에 드러납니다.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var(EMBEDDING_URL_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .with_context(|| {
                format!(
                    "{EMBEDDING_URL_ENV} not set. Set: export {EMBEDDING_URL_ENV}=http://host:port"
                )
            })?;
        Self::new(endpoint)
    }

    /// 배치 하나를 서버에 전송
    async fn encode_batch(&self, batch: &[String]) -> Result<Vec<Embedding>> {
        let request = EncodeRequest {
            texts: batch,
            return_dense: true,
            return_sparse: true,
        };

        let url = format!("{}/encode", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingBackend(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingBackend(format!(
                "server returned {status}: {body}"
            )));
        }

        let parsed: EncodeResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingBackend(format!("invalid response body: {e}")))?;

        if parsed.dense_vecs.len() != batch.len() || parsed.lexical_weights.len() != batch.len() {
            return Err(Error::EmbeddingBackend(format!(
                "response length mismatch: sent {}, got {} dense / {} sparse",
                batch.len(),
                parsed.dense_vecs.len(),
                parsed.lexical_weights.len()
            )));
        }

        let embeddings = parsed
            .dense_vecs
            .into_iter()
            .zip(parsed.lexical_weights)
            .map(|(dense, sparse)| {
                if dense.len() != self.dimension {
                    return Err(Error::EmbeddingBackend(format!(
                        "server dimension {} does not match configured {}",
                        dense.len(),
                        self.dimension
                    )));
                }
                Ok(Embedding { dense, sparse })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for BgeM3Client {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // 최대 길이 초과 텍스트는 잘라냄 (거부하지 않음)
        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t, self.max_length))
            .collect();

        let mut results = Vec::with_capacity(texts.len());
        for batch in truncated.chunks(self.batch_size) {
            tracing::debug!("Embedding batch of {} texts", batch.len());
            results.extend(self.encode_batch(batch).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "bge-m3"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 단위 잘라내기 (UTF-8 경계 안전)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("가나다라", 2), "가나");
    }

    #[test]
    fn test_client_normalizes_endpoint() {
        let client = BgeM3Client::new("http://localhost:8080/".to_string()).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8080");
        assert_eq!(client.dimension(), DEFAULT_DIMENSION);
    }

    #[test]
    fn test_from_env_missing_is_startup_error() {
        std::env::remove_var(EMBEDDING_URL_ENV);
        assert!(BgeM3Client::from_env().is_err());
    }

    #[tokio::test]
    async fn test_embed_empty_input() {
        let client = BgeM3Client::new("http://localhost:9".to_string()).unwrap();
        let result = client.embed(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_backend_error() {
        // 연결 불가능한 주소 - 전송 실패가 EmbeddingBackend로 표면화
        let client = BgeM3Client::new("http://127.0.0.1:1".to_string()).unwrap();
        let err = client.embed(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingBackend(_)));
    }

    #[test]
    fn test_sparse_vector_json_keys() {
        // 추론 서버의 lexical_weights는 문자열 키 JSON 객체로 도착
        let json = r#"{"100": 0.5, "2043": 0.25}"#;
        let sparse: SparseVector = serde_json::from_str(json).unwrap();
        assert_eq!(sparse.get(&100), Some(&0.5));
        assert_eq!(sparse.get(&2043), Some(&0.25));
    }
}
