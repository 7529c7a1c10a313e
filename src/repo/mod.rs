//! 지식베이스 메타데이터 저장소 - rusqlite
//!
//! 지식베이스(검색 설정 포함)와 수집된 파일의 관계형 기록을
//! 관리합니다. 벡터 데이터 자체는 `vector` 모듈이 담당하며,
//! 여기에는 이름/설정/파일 목록만 남습니다.
//! 저장 위치: ~/.surro-rag/metadata.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 환경변수 (설정 시 기본 위치를 덮어씀)
pub const DATA_DIR_ENV: &str = "SURRO_RAG_DATA_DIR";

/// 데이터 디렉토리 경로 (~/.surro-rag/ 또는 SURRO_RAG_DATA_DIR)
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".surro-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 지식베이스 - 검색 설정을 함께 들고 다니는 컬렉션 단위
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: Uuid,
    /// 컬렉션 이름으로도 쓰이는 고유 이름
    pub name: String,
    pub description: Option<String>,
    /// 1=의미 검색, 2=전문 검색, 3=하이브리드
    pub search_type_id: i32,
    pub top_k: usize,
    /// 이 값 이하의 결과는 버림 (strict)
    pub score_threshold: f32,
    pub chunk_length: usize,
    pub overlap: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub created_at: DateTime<Utc>,
}

/// 새 지식베이스 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewKnowledge {
    pub name: String,
    pub description: Option<String>,
    pub search_type_id: i32,
    pub top_k: usize,
    pub score_threshold: f32,
    pub chunk_length: usize,
    pub overlap: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
}

impl NewKnowledge {
    /// 기본 설정으로 생성 (하이브리드, 0.6/0.4)
    pub fn with_defaults(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            search_type_id: 3,
            top_k: 5,
            score_threshold: 0.0,
            chunk_length: 512,
            overlap: 50,
            dense_weight: crate::vector::DEFAULT_DENSE_WEIGHT,
            sparse_weight: crate::vector::DEFAULT_SPARSE_WEIGHT,
        }
    }
}

/// 수집된 파일 기록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFile {
    pub id: Uuid,
    pub knowledge_id: Uuid,
    /// 원본 파일명
    pub name: String,
    /// 오브젝트 스토리지 내 경로
    pub path: String,
    /// 확장자 (pdf, docx, ...)
    pub file_type: String,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct RepoStats {
    pub knowledge_count: usize,
    pub file_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// MetadataRepository Trait
// ============================================================================

/// 메타데이터 저장소 인터페이스
///
/// 서비스가 주입받는 심입니다. 벡터 삽입 이후의 기록 실패 같은
/// 경로를 테스트에서 대체 구현으로 주입할 수 있습니다.
pub trait MetadataRepository: Send + Sync {
    /// 지식베이스 생성
    fn create(&self, new: NewKnowledge) -> Result<Knowledge>;

    /// id로 조회
    fn get(&self, id: Uuid) -> Result<Option<Knowledge>>;

    /// 이름으로 조회
    fn get_by_name(&self, name: &str) -> Result<Option<Knowledge>>;

    /// 전체 목록 (이름순)
    fn get_all(&self) -> Result<Vec<Knowledge>>;

    /// 지식베이스 삭제 (파일 기록은 CASCADE) - 있었는지 반환
    fn delete(&self, id: Uuid) -> Result<bool>;

    /// 파일 기록 생성
    fn create_file(&self, file: &KnowledgeFile) -> Result<()>;

    /// 파일 기록 조회
    fn get_file(&self, id: Uuid) -> Result<Option<KnowledgeFile>>;

    /// 지식베이스의 파일 목록 (수집순)
    fn list_files(&self, knowledge_id: Uuid) -> Result<Vec<KnowledgeFile>>;

    /// 파일 기록 삭제 - 있었는지 반환
    fn delete_file(&self, id: Uuid) -> Result<bool>;
}

// ============================================================================
// KnowledgeRepository
// ============================================================================

/// 지식베이스 메타데이터 저장소
pub struct KnowledgeRepository {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeRepository {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        repo.initialize()?;
        Ok(repo)
    }

    /// 기본 위치에서 열기 (~/.surro-rag/metadata.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        }

        Self::open(&data_dir.join("metadata.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS knowledges (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                search_type_id INTEGER NOT NULL,
                top_k INTEGER NOT NULL,
                score_threshold REAL NOT NULL,
                chunk_length INTEGER NOT NULL,
                overlap INTEGER NOT NULL,
                dense_weight REAL NOT NULL,
                sparse_weight REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge_files (
                id TEXT PRIMARY KEY,
                knowledge_id TEXT NOT NULL
                    REFERENCES knowledges(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                file_type TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_files_knowledge
                ON knowledge_files(knowledge_id);
            "#,
        )
        .context("Failed to initialize metadata schema")?;

        tracing::debug!("Knowledge repository initialized at {:?}", self.db_path);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))
    }

    // ------------------------------------------------------------------
    // Knowledge
    // ------------------------------------------------------------------

    /// 지식베이스 생성
    pub fn create(&self, new: NewKnowledge) -> Result<Knowledge> {
        let knowledge = Knowledge {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            search_type_id: new.search_type_id,
            top_k: new.top_k,
            score_threshold: new.score_threshold,
            chunk_length: new.chunk_length,
            overlap: new.overlap,
            dense_weight: new.dense_weight,
            sparse_weight: new.sparse_weight,
            created_at: Utc::now(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO knowledges
                 (id, name, description, search_type_id, top_k, score_threshold,
                  chunk_length, overlap, dense_weight, sparse_weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                knowledge.id.to_string(),
                knowledge.name,
                knowledge.description,
                knowledge.search_type_id,
                knowledge.top_k as i64,
                knowledge.score_threshold as f64,
                knowledge.chunk_length as i64,
                knowledge.overlap as i64,
                knowledge.dense_weight as f64,
                knowledge.sparse_weight as f64,
                knowledge.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert knowledge")?;

        tracing::info!("Created knowledge '{}' ({})", knowledge.name, knowledge.id);
        Ok(knowledge)
    }

    /// id로 조회
    pub fn get(&self, id: Uuid) -> Result<Option<Knowledge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledges WHERE id = ?1"
        ))?;

        let knowledge = stmt
            .query_row(params![id.to_string()], knowledge_from_row)
            .optional()
            .context("Failed to query knowledge")?;
        Ok(knowledge)
    }

    /// 이름으로 조회
    pub fn get_by_name(&self, name: &str) -> Result<Option<Knowledge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledges WHERE name = ?1"
        ))?;

        let knowledge = stmt
            .query_row(params![name], knowledge_from_row)
            .optional()
            .context("Failed to query knowledge by name")?;
        Ok(knowledge)
    }

    /// 전체 목록 (이름순)
    pub fn get_all(&self) -> Result<Vec<Knowledge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM knowledges ORDER BY name"
        ))?;

        let rows = stmt
            .query_map([], knowledge_from_row)
            .context("Failed to list knowledges")?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// 검색 설정 갱신
    pub fn update(&self, knowledge: &Knowledge) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE knowledges SET
                 description = ?2, search_type_id = ?3, top_k = ?4,
                 score_threshold = ?5, chunk_length = ?6, overlap = ?7,
                 dense_weight = ?8, sparse_weight = ?9
             WHERE id = ?1",
            params![
                knowledge.id.to_string(),
                knowledge.description,
                knowledge.search_type_id,
                knowledge.top_k as i64,
                knowledge.score_threshold as f64,
                knowledge.chunk_length as i64,
                knowledge.overlap as i64,
                knowledge.dense_weight as f64,
                knowledge.sparse_weight as f64,
            ],
        )
        .context("Failed to update knowledge")?;
        Ok(())
    }

    /// 지식베이스 삭제 (파일 기록은 CASCADE) - 있었는지 반환
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM knowledges WHERE id = ?1",
                params![id.to_string()],
            )
            .context("Failed to delete knowledge")?;
        Ok(deleted > 0)
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// 파일 기록 생성
    pub fn create_file(&self, file: &KnowledgeFile) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO knowledge_files
                 (id, knowledge_id, name, path, file_type, chunk_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                file.id.to_string(),
                file.knowledge_id.to_string(),
                file.name,
                file.path,
                file.file_type,
                file.chunk_count as i64,
                file.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert file record")?;
        Ok(())
    }

    /// 파일 기록 조회
    pub fn get_file(&self, id: Uuid) -> Result<Option<KnowledgeFile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM knowledge_files WHERE id = ?1"
        ))?;

        let file = stmt
            .query_row(params![id.to_string()], file_from_row)
            .optional()
            .context("Failed to query file record")?;
        Ok(file)
    }

    /// 지식베이스의 파일 목록 (수집순)
    pub fn list_files(&self, knowledge_id: Uuid) -> Result<Vec<KnowledgeFile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM knowledge_files
             WHERE knowledge_id = ?1 ORDER BY created_at"
        ))?;

        let rows = stmt
            .query_map(params![knowledge_id.to_string()], file_from_row)
            .context("Failed to list file records")?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// 파일 기록 삭제 - 있었는지 반환
    pub fn delete_file(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM knowledge_files WHERE id = ?1",
                params![id.to_string()],
            )
            .context("Failed to delete file record")?;
        Ok(deleted > 0)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<RepoStats> {
        let conn = self.lock()?;
        let knowledge_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM knowledges", [], |row| row.get(0))
            .context("Failed to count knowledges")?;
        let file_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM knowledge_files", [], |row| row.get(0))
            .context("Failed to count files")?;

        Ok(RepoStats {
            knowledge_count: knowledge_count as usize,
            file_count: file_count as usize,
            db_path: self.db_path.clone(),
        })
    }
}

impl MetadataRepository for KnowledgeRepository {
    fn create(&self, new: NewKnowledge) -> Result<Knowledge> {
        KnowledgeRepository::create(self, new)
    }

    fn get(&self, id: Uuid) -> Result<Option<Knowledge>> {
        KnowledgeRepository::get(self, id)
    }

    fn get_by_name(&self, name: &str) -> Result<Option<Knowledge>> {
        KnowledgeRepository::get_by_name(self, name)
    }

    fn get_all(&self) -> Result<Vec<Knowledge>> {
        KnowledgeRepository::get_all(self)
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        KnowledgeRepository::delete(self, id)
    }

    fn create_file(&self, file: &KnowledgeFile) -> Result<()> {
        KnowledgeRepository::create_file(self, file)
    }

    fn get_file(&self, id: Uuid) -> Result<Option<KnowledgeFile>> {
        KnowledgeRepository::get_file(self, id)
    }

    fn list_files(&self, knowledge_id: Uuid) -> Result<Vec<KnowledgeFile>> {
        KnowledgeRepository::list_files(self, knowledge_id)
    }

    fn delete_file(&self, id: Uuid) -> Result<bool> {
        KnowledgeRepository::delete_file(self, id)
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

const KNOWLEDGE_COLUMNS: &str = "id, name, description, search_type_id, top_k, \
     score_threshold, chunk_length, overlap, dense_weight, sparse_weight, created_at";

const FILE_COLUMNS: &str = "id, knowledge_id, name, path, file_type, chunk_count, created_at";

fn knowledge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Knowledge> {
    Ok(Knowledge {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        search_type_id: row.get(3)?,
        top_k: row.get::<_, i64>(4)? as usize,
        score_threshold: row.get::<_, f64>(5)? as f32,
        chunk_length: row.get::<_, i64>(6)? as usize,
        overlap: row.get::<_, i64>(7)? as usize,
        dense_weight: row.get::<_, f64>(8)? as f32,
        sparse_weight: row.get::<_, f64>(9)? as f32,
        created_at: parse_datetime(row.get::<_, String>(10)?),
    })
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeFile> {
    Ok(KnowledgeFile {
        id: parse_uuid(row.get::<_, String>(0)?),
        knowledge_id: parse_uuid(row.get::<_, String>(1)?),
        name: row.get(2)?,
        path: row.get(3)?,
        file_type: row.get(4)?,
        chunk_count: row.get::<_, i64>(5)? as usize,
        created_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_repo() -> (TempDir, KnowledgeRepository) {
        let dir = TempDir::new().unwrap();
        let repo = KnowledgeRepository::open(&dir.path().join("metadata.db")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let (_dir, repo) = open_test_repo();

        let created = repo
            .create(NewKnowledge {
                description: Some("규정 문서".to_string()),
                score_threshold: 0.3,
                ..NewKnowledge::with_defaults("rules")
            })
            .unwrap();

        let fetched = repo.get(created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "rules");
        assert_eq!(fetched.description.as_deref(), Some("규정 문서"));
        assert_eq!(fetched.search_type_id, 3);
        assert!((fetched.score_threshold - 0.3).abs() < 1e-6);
        assert!((fetched.dense_weight - 0.6).abs() < 1e-6);

        let by_name = repo.get_by_name("rules").unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert!(repo.get_by_name("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_dir, repo) = open_test_repo();
        repo.create(NewKnowledge::with_defaults("kb")).unwrap();
        assert!(repo.create(NewKnowledge::with_defaults("kb")).is_err());
    }

    #[test]
    fn test_update_settings() {
        let (_dir, repo) = open_test_repo();
        let mut kb = repo.create(NewKnowledge::with_defaults("kb")).unwrap();

        kb.top_k = 10;
        kb.search_type_id = 1;
        repo.update(&kb).unwrap();

        let fetched = repo.get(kb.id).unwrap().unwrap();
        assert_eq!(fetched.top_k, 10);
        assert_eq!(fetched.search_type_id, 1);
    }

    #[test]
    fn test_file_records_cascade_on_delete() {
        let (_dir, repo) = open_test_repo();
        let kb = repo.create(NewKnowledge::with_defaults("kb")).unwrap();

        let file = KnowledgeFile {
            id: Uuid::new_v4(),
            knowledge_id: kb.id,
            name: "report.pdf".to_string(),
            path: "kb/report.pdf".to_string(),
            file_type: "pdf".to_string(),
            chunk_count: 12,
            created_at: Utc::now(),
        };
        repo.create_file(&file).unwrap();

        assert_eq!(repo.list_files(kb.id).unwrap().len(), 1);
        assert_eq!(
            repo.get_file(file.id).unwrap().unwrap().chunk_count,
            12
        );

        assert!(repo.delete(kb.id).unwrap());
        assert!(repo.get_file(file.id).unwrap().is_none());
        assert!(repo.list_files(kb.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_file_returns_existence() {
        let (_dir, repo) = open_test_repo();
        let kb = repo.create(NewKnowledge::with_defaults("kb")).unwrap();

        let file = KnowledgeFile {
            id: Uuid::new_v4(),
            knowledge_id: kb.id,
            name: "a.csv".to_string(),
            path: "kb/a.csv".to_string(),
            file_type: "csv".to_string(),
            chunk_count: 1,
            created_at: Utc::now(),
        };
        repo.create_file(&file).unwrap();

        assert!(repo.delete_file(file.id).unwrap());
        assert!(!repo.delete_file(file.id).unwrap());
    }

    #[test]
    fn test_stats() {
        let (_dir, repo) = open_test_repo();
        repo.create(NewKnowledge::with_defaults("a")).unwrap();
        repo.create(NewKnowledge::with_defaults("b")).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.knowledge_count, 2);
        assert_eq!(stats.file_count, 0);
    }
}
