//! PDF 텍스트 추출
//!
//! pdf-extract는 경로 기반 파서이므로 업로드 바이트를
//! 스코프 임시 파일로 내려놓고 추출합니다. 임시 파일은
//! 파싱 실패 여부와 무관하게 drop 시점에 해제됩니다.

use std::io::Write;

use crate::error::{Error, Result};

use super::TextExtractor;

/// PDF 추출기
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let mut temp = tempfile::NamedTempFile::new().map_err(|e| Error::Extraction {
            format: "pdf",
            reason: format!("failed to create temp file: {e}"),
        })?;

        temp.write_all(data).map_err(|e| Error::Extraction {
            format: "pdf",
            reason: format!("failed to write temp file: {e}"),
        })?;

        let text = pdf_extract::extract_text(temp.path()).map_err(|e| Error::Extraction {
            format: "pdf",
            reason: e.to_string(),
        })?;

        Ok(text)
    }

    fn name(&self) -> &'static str {
        "PdfExtractor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pdf_is_extraction_error() {
        let err = PdfExtractor.extract(b"this is not a pdf").unwrap_err();
        assert!(matches!(err, Error::Extraction { format: "pdf", .. }));
    }
}
