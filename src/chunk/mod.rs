//! 청킹 파이프라인 - 문서를 검색 단위 세그먼트로 분할
//!
//! 파일 바이트에서 텍스트를 추출하고, 공백을 정규화한 뒤
//! 고정 길이 문자 윈도우(chunk_length, overlap)로 분할합니다.
//! 같은 입력에 대해 항상 같은 청크 목록이 나옵니다 (결정적).

use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};
use crate::extract::{ExtractorRegistry, TextExtractor};

// ============================================================================
// Types
// ============================================================================

/// 원본 파일의 연속 구간 하나
///
/// 한 번의 파일 수집에서 생성되면 이후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 청크 텍스트
    pub text: String,
    /// 원본 파일 내 순서 (0-based)
    pub index: usize,
}

// ============================================================================
// ChunkWindows Iterator
// ============================================================================

/// 문자 단위 슬라이딩 윈도우 이터레이터
///
/// 최대 `chunk_length` 문자 길이의 세그먼트를 내놓으며,
/// 인접한 세그먼트는 경계에서 정확히 `overlap` 문자를 공유합니다.
/// Clone으로 같은 시퀀스를 처음부터 다시 순회할 수 있습니다.
#[derive(Debug, Clone)]
pub struct ChunkWindows {
    chars: Vec<char>,
    chunk_length: usize,
    step: usize,
    pos: usize,
    done: bool,
}

impl ChunkWindows {
    /// 새 윈도우 이터레이터 생성
    ///
    /// 전제조건: `overlap < chunk_length` (Chunker::split에서 검증됨)
    pub fn new(text: &str, chunk_length: usize, overlap: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let done = chars.is_empty();
        Self {
            chars,
            chunk_length,
            step: chunk_length - overlap,
            pos: 0,
            done,
        }
    }
}

impl Iterator for ChunkWindows {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done || self.pos >= self.chars.len() {
            return None;
        }

        let end = (self.pos + self.chunk_length).min(self.chars.len());
        let segment: String = self.chars[self.pos..end].iter().collect();

        if end >= self.chars.len() {
            self.done = true;
        } else {
            self.pos += self.step;
        }

        Some(segment)
    }
}

// ============================================================================
// Chunker
// ============================================================================

/// 청커 - 확장자별 추출기 디스패치 + 윈도우 분할
#[derive(Clone)]
pub struct Chunker {
    registry: ExtractorRegistry,
}

impl Chunker {
    /// 추출기 레지스트리를 지정하여 생성
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self { registry }
    }

    /// 기본 추출기 구성으로 생성 (csv/xls/xlsx/pdf/ppt/pptx/doc/docx)
    pub fn with_defaults() -> Self {
        Self::new(ExtractorRegistry::with_defaults())
    }

    /// 파일 바이트를 순서 있는 청크 목록으로 분할
    ///
    /// # Arguments
    /// * `data` - 원본 파일 바이트
    /// * `filename` - 확장자 디스패치에 사용할 파일명
    /// * `chunk_length` - 청크 최대 길이 (문자 수)
    /// * `overlap` - 인접 청크 간 공유 문자 수 (`overlap < chunk_length`)
    ///
    /// # Errors
    /// * `InvalidChunkConfig` - 설정 위반 (백엔드 호출 전에 거부)
    /// * `UnsupportedFormat` - 등록되지 않은 확장자
    /// * `Extraction` - 형식별 파싱 실패
    pub fn split(
        &self,
        data: &[u8],
        filename: &str,
        chunk_length: usize,
        overlap: usize,
    ) -> Result<Vec<Chunk>> {
        if chunk_length == 0 || overlap >= chunk_length {
            return Err(Error::InvalidChunkConfig {
                chunk_length,
                overlap,
            });
        }

        let extractor = self.extractor_for(filename)?;
        let raw = extractor.extract(data)?;
        let text = normalize_whitespace(&raw);

        let chunks = ChunkWindows::new(&text, chunk_length, overlap)
            .enumerate()
            .map(|(index, text)| Chunk { text, index })
            .collect();

        Ok(chunks)
    }

    /// 파일명에서 확장자를 뽑아 추출기를 선택
    fn extractor_for(&self, filename: &str) -> Result<Arc<dyn TextExtractor>> {
        let ext = file_extension(filename);
        self.registry
            .get(&ext)
            .ok_or(Error::UnsupportedFormat(ext))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 파일명에서 소문자 확장자 추출 (점 제외)
pub fn file_extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// 공백 정규화 - 연속 공백/개행을 단일 공백으로 치환
pub fn normalize_whitespace(text: &str) -> String {
    let re = Regex::new(r"\s+").unwrap();
    re.replace_all(text.trim(), " ").into_owned()
}

// ============================================================================
// Tests
// ============================================================================
