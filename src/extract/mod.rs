//! 텍스트 추출 모듈
//!
//! 다양한 문서 형식에서 원시 텍스트를 추출합니다.
//! 확장자 → 추출기 레지스트리 방식이라 형식 추가는
//! 새 구현을 등록하는 것으로 끝납니다 (분기 추가 없음).
//!
//! - csv: csv 크레이트
//! - xls/xlsx: calamine
//! - pdf: pdf-extract (임시 파일 경유)
//! - docx/pptx: zip + quick-xml (OOXML)
//! - doc/ppt: cfb (레거시 OLE 복합 문서)

pub mod legacy;
pub mod office;
pub mod pdf;
pub mod tabular;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

// ============================================================================
// TextExtractor Trait
// ============================================================================

/// 형식별 텍스트 추출기
pub trait TextExtractor: Send + Sync {
    /// 파일 바이트에서 원시 텍스트 추출
    fn extract(&self, data: &[u8]) -> Result<String>;

    /// 추출기 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// ExtractorRegistry
// ============================================================================

/// 확장자 → 추출기 매핑
#[derive(Clone)]
pub struct ExtractorRegistry {
    map: HashMap<&'static str, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    /// 빈 레지스트리 생성
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// 기본 추출기 등록 (지원 형식 전체)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let excel: Arc<dyn TextExtractor> = Arc::new(tabular::ExcelExtractor);
        registry.register("csv", Arc::new(tabular::CsvExtractor));
        registry.register("xls", Arc::clone(&excel));
        registry.register("xlsx", excel);
        registry.register("pdf", Arc::new(pdf::PdfExtractor));
        registry.register("docx", Arc::new(office::DocxExtractor));
        registry.register("pptx", Arc::new(office::PptxExtractor));
        registry.register("doc", Arc::new(legacy::DocExtractor));
        registry.register("ppt", Arc::new(legacy::PptExtractor));

        registry
    }

    /// 추출기 등록 (같은 확장자는 덮어씀)
    pub fn register(&mut self, extension: &'static str, extractor: Arc<dyn TextExtractor>) {
        self.map.insert(extension, extractor);
    }

    /// 확장자로 추출기 조회
    pub fn get(&self, extension: &str) -> Option<Arc<dyn TextExtractor>> {
        self.map.get(extension).cloned()
    }

    /// 등록된 확장자 목록 (정렬됨)
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut exts: Vec<&'static str> = self.map.keys().copied().collect();
        exts.sort_unstable();
        exts
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_supported_formats() {
        let registry = ExtractorRegistry::with_defaults();
        for ext in ["csv", "xls", "xlsx", "pdf", "ppt", "pptx", "doc", "docx"] {
            assert!(registry.get(ext).is_some(), "missing extractor for {ext}");
        }
        assert!(registry.get("txt").is_none());
        assert!(registry.get("").is_none());

        assert_eq!(
            registry.supported_extensions(),
            vec!["csv", "doc", "docx", "pdf", "ppt", "pptx", "xls", "xlsx"]
        );
    }

    #[test]
    fn test_register_overrides() {
        struct Fixed;
        impl TextExtractor for Fixed {
            fn extract(&self, _data: &[u8]) -> Result<String> {
                Ok("fixed".to_string())
            }
            fn name(&self) -> &'static str {
                "Fixed"
            }
        }

        let mut registry = ExtractorRegistry::with_defaults();
        registry.register("csv", Arc::new(Fixed));
        let extractor = registry.get("csv").unwrap();
        assert_eq!(extractor.extract(b"ignored").unwrap(), "fixed");
    }
}
