//! 에러 타입 정의
//!
//! 검색/수집 파이프라인에서 발생하는 에러를 종류별로 구분합니다.
//! 호출자는 "임계값에 걸러져 결과가 없음"과 "검색 실패"를
//! 항상 구분할 수 있어야 합니다.

use thiserror::Error;

/// surro-rag 공통 Result 타입
pub type Result<T> = std::result::Result<T, Error>;

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum Error {
    /// 지원하지 않는 파일 확장자
    #[error("unsupported file extension: .{0}")]
    UnsupportedFormat(String),

    /// 청킹 설정 오류 (overlap은 chunk_length보다 작아야 함)
    #[error("invalid chunk config: overlap({overlap}) must be less than chunk_length({chunk_length})")]
    InvalidChunkConfig { chunk_length: usize, overlap: usize },

    /// 파일에서 텍스트 추출 실패
    #[error("failed to extract text from {format}: {reason}")]
    Extraction { format: &'static str, reason: String },

    /// 임베딩 백엔드 호출 실패 (내부 재시도 없이 그대로 표면화)
    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    /// 밀집 벡터 차원 불일치 (삽입 전 검증, 0건 삽입 보장)
    #[error("dense vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 컬렉션 프로비저닝 실패 (부분 생성 상태는 롤백하지 않음)
    #[error("failed to provision collection '{name}': {reason}")]
    CollectionProvisioning { name: String, reason: String },

    /// 알 수 없는 search_type_id
    #[error("unknown search type id: {0}")]
    InvalidSearchType(i32),

    /// 벡터 삽입은 성공했으나 메타데이터 기록이 실패한 경우.
    /// 고아 파티션을 운영자가 정리할 수 있도록 별도 종류로 보고합니다.
    #[error("vectors were inserted into partition '{partition}' but metadata write failed")]
    PartialIngestion {
        partition: String,
        #[source]
        source: anyhow::Error,
    },

    /// 존재하지 않는 컬렉션
    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),

    /// 존재하지 않는 지식베이스
    #[error("knowledge '{0}' does not exist")]
    UnknownKnowledge(String),

    /// 내부 처리 오류 (DB, 파일 I/O 등)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = Error::DimensionMismatch {
            expected: 1024,
            actual: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));

        let err = Error::InvalidChunkConfig {
            chunk_length: 100,
            overlap: 100,
        };
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_invalid_search_type_message() {
        let err = Error::InvalidSearchType(99);
        assert!(err.to_string().contains("99"));
    }
}
