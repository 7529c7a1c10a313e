//! OOXML 문서 추출 (docx, pptx)
//!
//! OOXML은 XML 파트를 담은 zip 아카이브입니다.
//! - docx: word/document.xml의 <w:t> 텍스트 런
//! - pptx: ppt/slides/slideN.xml의 <a:t> 텍스트 런
//!
//! ref: ECMA-376 (Office Open XML)

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::{Error, Result};

use super::TextExtractor;

// ============================================================================
// Docx
// ============================================================================

/// Word OOXML 추출기
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let mut archive = open_archive(data, "docx")?;

        let xml = read_zip_entry(&mut archive, "word/document.xml", "docx")?;
        collect_xml_text(&xml, b"w:t", b"w:p", "docx")
    }

    fn name(&self) -> &'static str {
        "DocxExtractor"
    }
}

// ============================================================================
// Pptx
// ============================================================================

/// PowerPoint OOXML 추출기
pub struct PptxExtractor;

impl TextExtractor for PptxExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let mut archive = open_archive(data, "pptx")?;

        // 슬라이드 파트를 번호순으로 수집
        let mut slide_names: Vec<String> = archive
            .file_names()
            .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
            .map(str::to_string)
            .collect();
        slide_names.sort_by_key(|name| slide_number(name));

        let mut slides = Vec::with_capacity(slide_names.len());
        for name in slide_names {
            let xml = read_zip_entry(&mut archive, &name, "pptx")?;
            let text = collect_xml_text(&xml, b"a:t", b"a:p", "pptx")?;
            if !text.trim().is_empty() {
                slides.push(text.trim_end().to_string());
            }
        }

        Ok(slides.join("\n"))
    }

    fn name(&self) -> &'static str {
        "PptxExtractor"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn open_archive(data: &[u8], format: &'static str) -> Result<ZipArchive<Cursor<Vec<u8>>>> {
    ZipArchive::new(Cursor::new(data.to_vec())).map_err(|e| Error::Extraction {
        format,
        reason: format!("not a zip archive: {e}"),
    })
}

fn read_zip_entry(
    archive: &mut ZipArchive<Cursor<Vec<u8>>>,
    name: &str,
    format: &'static str,
) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name).map_err(|e| Error::Extraction {
        format,
        reason: format!("missing part '{name}': {e}"),
    })?;

    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).map_err(|e| Error::Extraction {
        format,
        reason: format!("failed to read part '{name}': {e}"),
    })?;

    Ok(buf)
}

/// XML 파트에서 텍스트 런을 모읍니다.
///
/// `text_tag` 내부의 텍스트를 이어붙이고, `para_tag`가 닫힐 때 줄바꿈합니다.
fn collect_xml_text(
    xml: &[u8],
    text_tag: &[u8],
    para_tag: &[u8],
    format: &'static str,
) -> Result<String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == text_tag => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| Error::Extraction {
                    format,
                    reason: format!("invalid xml text: {e}"),
                })?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == text_tag {
                    in_text = false;
                } else if e.name().as_ref() == para_tag {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Extraction {
                    format,
                    reason: format!("xml parse error: {e}"),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// "ppt/slides/slide12.xml" → 12
fn slide_number(name: &str) -> usize {
    name.chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_paragraphs() {
        let doc = build_zip(&[(
            "word/document.xml",
            r#"<?xml version="1.0"?>
               <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
                 <w:body>
                   <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>
                   <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
                 </w:body>
               </w:document>"#,
        )]);

        let text = DocxExtractor.extract(&doc).unwrap();
        assert_eq!(text.trim(), "Hello world\nSecond paragraph");
    }

    #[test]
    fn test_pptx_slides_in_order() {
        let slide = |body: &str| {
            format!(
                r#"<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
                     <a:p><a:r><a:t>{body}</a:t></a:r></a:p>
                   </p:sld>"#
            )
        };
        let pptx = build_zip(&[
            ("ppt/slides/slide10.xml", &slide("ten")),
            ("ppt/slides/slide2.xml", &slide("two")),
            ("ppt/slides/slide1.xml", &slide("one")),
        ]);

        let text = PptxExtractor.extract(&pptx).unwrap();
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        assert_eq!(lines, vec!["one", "two", "ten"]);
    }

    #[test]
    fn test_docx_missing_part() {
        let broken = build_zip(&[("other.xml", "<x/>")]);
        let err = DocxExtractor.extract(&broken).unwrap_err();
        assert!(matches!(err, Error::Extraction { format: "docx", .. }));
    }

    #[test]
    fn test_not_a_zip() {
        let err = DocxExtractor.extract(b"plain bytes").unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }
}
