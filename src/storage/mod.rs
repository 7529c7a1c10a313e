//! 오브젝트 스토리지 - 원본 파일 보관
//!
//! 수집된 원본 파일을 버킷/키 구조로 보관합니다. 청크와 벡터는
//! 원본을 복원할 수 없으므로, 재수집과 감사를 위해 원본을
//! 그대로 남겨둡니다.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// 기본 버킷 이름
pub const DEFAULT_BUCKET: &str = "ai-paas";

// ============================================================================
// Types
// ============================================================================

/// 업로드된 오브젝트 메타데이터
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub key: String,
    pub size: usize,
    pub uploaded_at: DateTime<Utc>,
}

// ============================================================================
// ObjectStorage Trait
// ============================================================================

/// 오브젝트 스토리지 인터페이스
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// 오브젝트 업로드 (같은 키면 덮어씀)
    async fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<ObjectMetadata>;

    /// 오브젝트 조회 - 없으면 None
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// 오브젝트 삭제 - 있었는지 반환
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<bool>;
}

// ============================================================================
// FsObjectStorage
// ============================================================================

/// 로컬 파일시스템 기반 구현 - 버킷은 디렉토리, 키는 상대 경로
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    /// 루트 디렉토리 지정 생성
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// 버킷/키를 루트 아래 경로로 변환
    ///
    /// 루트 밖으로 나가는 키(.. 세그먼트, 절대 경로)는 거부합니다.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_segment(bucket)?;
        let mut path = self.root.join(bucket);
        for segment in key.split('/') {
            validate_segment(segment)?;
            path.push(segment);
        }
        Ok(path)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('\\')
        || Path::new(segment).is_absolute()
    {
        return Err(anyhow::anyhow!("invalid object key segment: '{segment}'").into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<ObjectMetadata> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create object directory")?;
        }

        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write object '{bucket}/{key}'"))?;

        tracing::debug!("Stored object {}/{} ({} bytes)", bucket, key, data.len());
        Ok(ObjectMetadata {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len(),
            uploaded_at: Utc::now(),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("Failed to read object '{bucket}/{key}'"))
                .into()),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::Error::from(e)
                .context(format!("Failed to delete object '{bucket}/{key}'"))
                .into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
