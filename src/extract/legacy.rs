//! 레거시 바이너리 문서 추출 (doc, ppt)
//!
//! 97-2003 형식은 OLE 복합 문서(CFB) 컨테이너입니다.
//! - doc: WordDocument 스트림의 FIB에서 텍스트 구간(fcMin..fcMac)을 읽음
//!   (비복잡/비암호화 문서만 지원 — piece table 재구성은 하지 않음)
//! - ppt: PowerPoint Document 스트림의 레코드를 순회하며
//!   TextCharsAtom / TextBytesAtom을 수집
//!
//! ref: MS-DOC, MS-PPT 파일 포맷 명세

use std::io::{Cursor, Read};

use crate::error::{Error, Result};

use super::TextExtractor;

// FIB 플래그 (MS-DOC 2.5.2, offset 0x0A)
const FIB_F_COMPLEX: u16 = 0x0004;
const FIB_F_ENCRYPTED: u16 = 0x0100;
const FIB_F_EXTCHAR: u16 = 0x1000;

// PPT 레코드 타입 (MS-PPT 2.13.24)
const REC_TEXT_CHARS_ATOM: u16 = 0x0FA0;
const REC_TEXT_BYTES_ATOM: u16 = 0x0FA8;

// ============================================================================
// Doc
// ============================================================================

/// Word 97-2003 추출기
pub struct DocExtractor;

impl TextExtractor for DocExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let stream = read_ole_stream(data, "/WordDocument", "doc")?;

        if stream.len() < 0x20 {
            return Err(Error::Extraction {
                format: "doc",
                reason: "WordDocument stream too short".to_string(),
            });
        }

        // FIB 검증
        let ident = u16::from_le_bytes([stream[0], stream[1]]);
        if ident != 0xA5EC {
            return Err(Error::Extraction {
                format: "doc",
                reason: format!("unexpected FIB ident 0x{ident:04X}"),
            });
        }

        let flags = u16::from_le_bytes([stream[0x0A], stream[0x0B]]);
        if flags & FIB_F_COMPLEX != 0 {
            return Err(Error::Extraction {
                format: "doc",
                reason: "complex (incrementally saved) documents are not supported".to_string(),
            });
        }
        if flags & FIB_F_ENCRYPTED != 0 {
            return Err(Error::Extraction {
                format: "doc",
                reason: "encrypted documents are not supported".to_string(),
            });
        }

        let fc_min = u32::from_le_bytes(stream[0x18..0x1C].try_into().unwrap()) as usize;
        let fc_mac = u32::from_le_bytes(stream[0x1C..0x20].try_into().unwrap()) as usize;

        if fc_min >= fc_mac || fc_mac > stream.len() {
            return Err(Error::Extraction {
                format: "doc",
                reason: format!("invalid text range {fc_min}..{fc_mac}"),
            });
        }

        let raw = &stream[fc_min..fc_mac];
        let text = if flags & FIB_F_EXTCHAR != 0 {
            decode_utf16le(raw)
        } else {
            decode_latin1(raw)
        };

        Ok(sanitize_word_text(&text))
    }

    fn name(&self) -> &'static str {
        "DocExtractor"
    }
}

// ============================================================================
// Ppt
// ============================================================================

/// PowerPoint 97-2003 추출기
pub struct PptExtractor;

impl TextExtractor for PptExtractor {
    fn extract(&self, data: &[u8]) -> Result<String> {
        let stream = read_ole_stream(data, "/PowerPoint Document", "ppt")?;

        let mut texts = Vec::new();
        walk_records(&stream, &mut texts);

        Ok(texts.join("\n"))
    }

    fn name(&self) -> &'static str {
        "PptExtractor"
    }
}

/// 레코드 스트림 순회 - 컨테이너는 재귀 진입, 텍스트 아톰은 수집
fn walk_records(data: &[u8], out: &mut Vec<String>) {
    let mut offset = 0;

    while offset + 8 <= data.len() {
        let ver_instance = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let rec_type = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
        let rec_len =
            u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;

        let body_start = offset + 8;
        let body_end = (body_start + rec_len).min(data.len());
        let body = &data[body_start..body_end];

        if ver_instance & 0x000F == 0x000F {
            // 컨테이너 레코드
            walk_records(body, out);
        } else {
            match rec_type {
                REC_TEXT_CHARS_ATOM => push_text(out, decode_utf16le(body)),
                REC_TEXT_BYTES_ATOM => push_text(out, decode_latin1(body)),
                _ => {}
            }
        }

        offset = body_end;
    }
}

fn push_text(out: &mut Vec<String>, text: String) {
    let cleaned = sanitize_word_text(&text);
    if !cleaned.trim().is_empty() {
        out.push(cleaned);
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_ole_stream(data: &[u8], path: &str, format: &'static str) -> Result<Vec<u8>> {
    let mut compound =
        cfb::CompoundFile::open(Cursor::new(data.to_vec())).map_err(|e| Error::Extraction {
            format,
            reason: format!("not an OLE compound file: {e}"),
        })?;

    let mut stream = compound.open_stream(path).map_err(|e| Error::Extraction {
        format,
        reason: format!("missing stream '{path}': {e}"),
    })?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).map_err(|e| Error::Extraction {
        format,
        reason: format!("failed to read stream '{path}': {e}"),
    })?;

    Ok(buf)
}

fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_latin1(data: &[u8]) -> String {
    data.iter().map(|&b| b as char).collect()
}

/// Word 제어 문자 정리 - 문단 마크(\r)는 줄바꿈으로, 나머지 제어는 공백으로
fn sanitize_word_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\r' => '\n',
            c if c.is_control() && c != '\n' && c != '\t' => ' ',
            c => c,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_compound(path: &str, stream_bytes: &[u8]) -> Vec<u8> {
        let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        {
            let mut stream = compound.create_stream(path).unwrap();
            stream.write_all(stream_bytes).unwrap();
        }
        compound.into_inner().into_inner()
    }

    fn build_doc(text: &str, flags: u16) -> Vec<u8> {
        let body = text.as_bytes();
        let fc_min = 0x100usize;
        let mut stream = vec![0u8; fc_min + body.len()];
        stream[0..2].copy_from_slice(&0xA5ECu16.to_le_bytes());
        stream[0x0A..0x0C].copy_from_slice(&flags.to_le_bytes());
        stream[0x18..0x1C].copy_from_slice(&(fc_min as u32).to_le_bytes());
        stream[0x1C..0x20].copy_from_slice(&((fc_min + body.len()) as u32).to_le_bytes());
        stream[fc_min..].copy_from_slice(body);
        build_compound("/WordDocument", &stream)
    }

    #[test]
    fn test_doc_ansi_text_range() {
        let doc = build_doc("Hello word binary\rnext para", 0);
        let text = DocExtractor.extract(&doc).unwrap();
        assert_eq!(text, "Hello word binary\nnext para");
    }

    #[test]
    fn test_doc_complex_rejected() {
        let doc = build_doc("whatever", FIB_F_COMPLEX);
        let err = DocExtractor.extract(&doc).unwrap_err();
        assert!(matches!(err, Error::Extraction { format: "doc", .. }));
    }

    #[test]
    fn test_doc_bad_magic_rejected() {
        let mut stream = vec![0u8; 0x40];
        stream[0..2].copy_from_slice(&0x1234u16.to_le_bytes());
        let doc = build_compound("/WordDocument", &stream);
        let err = DocExtractor.extract(&doc).unwrap_err();
        assert!(matches!(err, Error::Extraction { format: "doc", .. }));
    }

    #[test]
    fn test_ppt_text_atoms() {
        // TextBytesAtom 하나를 담은 컨테이너 레코드
        let body = b"Slide title";
        let mut atom = Vec::new();
        atom.extend_from_slice(&0x0000u16.to_le_bytes());
        atom.extend_from_slice(&REC_TEXT_BYTES_ATOM.to_le_bytes());
        atom.extend_from_slice(&(body.len() as u32).to_le_bytes());
        atom.extend_from_slice(body);

        let mut container = Vec::new();
        container.extend_from_slice(&0x000Fu16.to_le_bytes());
        container.extend_from_slice(&0x03E8u16.to_le_bytes()); // 임의 컨테이너 타입
        container.extend_from_slice(&(atom.len() as u32).to_le_bytes());
        container.extend_from_slice(&atom);

        let ppt = build_compound("/PowerPoint Document", &container);
        let text = PptExtractor.extract(&ppt).unwrap();
        assert_eq!(text, "Slide title");
    }

    #[test]
    fn test_ppt_utf16_atom() {
        let body: Vec<u8> = "유니코드"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let mut atom = Vec::new();
        atom.extend_from_slice(&0x0000u16.to_le_bytes());
        atom.extend_from_slice(&REC_TEXT_CHARS_ATOM.to_le_bytes());
        atom.extend_from_slice(&(body.len() as u32).to_le_bytes());
        atom.extend_from_slice(&body);

        let ppt = build_compound("/PowerPoint Document", &atom);
        let text = PptExtractor.extract(&ppt).unwrap();
        assert_eq!(text, "유니코드");
    }

    #[test]
    fn test_not_compound_file() {
        let err = DocExtractor.extract(b"junk").unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }
}
