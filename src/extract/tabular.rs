//! 표 형식 문서 추출 (CSV, Excel)
//!
//! 행 단위로 셀을 공백으로 이어붙여 한 줄의 텍스트로 만듭니다.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::error::{Error, Result};

use super::TextExtractor;

// ============================================================================
// CSV
// ============================================================================

/// CSV 추출기
pub struct CsvExtractor;

impl TextExtractor for CsvExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut lines = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::Extraction {
                format: "csv",
                reason: e.to_string(),
            })?;

            let line = record
                .iter()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            if !line.is_empty() {
                lines.push(line);
            }
        }

        Ok(lines.join("\n"))
    }

    fn name(&self) -> &'static str {
        "CsvExtractor"
    }
}

// ============================================================================
// Excel (xls / xlsx)
// ============================================================================

/// Excel 추출기 - calamine이 xls(OLE)와 xlsx(OOXML)를 모두 처리
pub struct ExcelExtractor;

impl TextExtractor for ExcelExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let cursor = Cursor::new(data.to_vec());
        let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| Error::Extraction {
            format: "excel",
            reason: e.to_string(),
        })?;

        let mut lines = Vec::new();
        let sheet_names = workbook.sheet_names().to_vec();

        for name in sheet_names {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| Error::Extraction {
                    format: "excel",
                    reason: format!("sheet '{name}': {e}"),
                })?;

            for row in range.rows() {
                let line = row
                    .iter()
                    .filter(|cell| !matches!(cell, Data::Empty))
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");

                if !line.trim().is_empty() {
                    lines.push(line);
                }
            }
        }

        Ok(lines.join("\n"))
    }

    fn name(&self) -> &'static str {
        "ExcelExtractor"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_rows_to_lines() {
        let data = b"name,age\nalice,30\nbob,25\n";
        let text = CsvExtractor.extract(data).unwrap();
        assert_eq!(text, "name age\nalice 30\nbob 25");
    }

    #[test]
    fn test_csv_skips_empty_fields() {
        let data = b"a,,b\n,,\n";
        let text = CsvExtractor.extract(data).unwrap();
        assert_eq!(text, "a b");
    }

    #[test]
    fn test_csv_flexible_row_widths() {
        let data = b"a,b,c\nd\n";
        let text = CsvExtractor.extract(data).unwrap();
        assert_eq!(text, "a b c\nd");
    }

    #[test]
    fn test_excel_invalid_bytes() {
        let err = ExcelExtractor.extract(b"not a workbook").unwrap_err();
        assert!(matches!(err, Error::Extraction { format: "excel", .. }));
    }
}
