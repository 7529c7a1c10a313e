//! 희소 벡터 역색인 + 컬렉션 카탈로그 - rusqlite
//!
//! 용어 id → (entry, weight) 포스팅을 평범한 테이블로 들고,
//! 쿼리 용어와 겹치는 포스팅만 읽어 내적을 계산합니다.
//! 컬렉션/파티션 메타데이터(이름, 차원, 인덱스 상태)도 여기서
//! 관리하며, 청크 id(AUTOINCREMENT)가 밀집 인덱스와 공유되는
//! 삽입 순서 기준입니다.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result as AnyResult};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};

use super::{ScoredText, VectorEntry};
use crate::embedding::SparseVector;
use crate::error::Result;

// ============================================================================
// SparseIndex
// ============================================================================

/// 역색인 + 카탈로그 저장소
pub struct SparseIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SparseIndex {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create index directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open sparse index database")?;

        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        index.initialize()?;
        Ok(index)
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                indexed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS partitions (
                collection TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (collection, name)
            );

            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                text TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_collection
                ON entries(collection, partition_key);

            CREATE TABLE IF NOT EXISTS terms (
                entry_id INTEGER NOT NULL,
                term_id INTEGER NOT NULL,
                weight REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_terms_term ON terms(term_id);
            CREATE INDEX IF NOT EXISTS idx_terms_entry ON terms(entry_id);
            "#,
        )
        .context("Failed to initialize sparse index schema")?;

        Ok(())
    }

    fn lock(&self) -> AnyResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))
    }

    // ------------------------------------------------------------------
    // 카탈로그
    // ------------------------------------------------------------------

    /// 컬렉션 등록 (스키마 생성 단계)
    pub fn register_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO collections (name, dimension, indexed, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![name, dimension as i64, Utc::now().to_rfc3339()],
        )
        .context("Failed to register collection")?;
        Ok(())
    }

    /// 컬렉션 존재 여부
    pub fn has_collection(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to check collection")?;
        Ok(count > 0)
    }

    /// 컬렉션의 고정 차원 조회
    pub fn collection_dimension(&self, name: &str) -> Result<Option<usize>> {
        let conn = self.lock()?;
        let dim = conn
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .ok();
        Ok(dim.map(|d| d as usize))
    }

    /// ANN 인덱스 생성 여부 기록
    pub fn mark_indexed(&self, name: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE collections SET indexed = 1 WHERE name = ?1",
            params![name],
        )
        .context("Failed to mark collection indexed")?;
        Ok(())
    }

    /// ANN 인덱스 생성 여부 조회
    pub fn is_indexed(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let indexed: Option<i64> = conn
            .query_row(
                "SELECT indexed FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .ok();
        Ok(indexed == Some(1))
    }

    /// 파티션 생성 (멱등)
    pub fn create_partition(&self, collection: &str, partition: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO partitions (collection, name, created_at)
             VALUES (?1, ?2, ?3)",
            params![collection, partition, Utc::now().to_rfc3339()],
        )
        .context("Failed to create partition")?;
        Ok(())
    }

    /// 파티션 존재 여부
    pub fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM partitions WHERE collection = ?1 AND name = ?2",
                params![collection, partition],
                |row| row.get(0),
            )
            .context("Failed to check partition")?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // 엔트리 / 포스팅
    // ------------------------------------------------------------------

    /// 엔트리 배치 삽입 (단일 트랜잭션) - 발급된 청크 id 목록 반환
    pub fn insert_entries(
        &self,
        collection: &str,
        partition: &str,
        entries: &[VectorEntry],
    ) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let mut ids = Vec::with_capacity(entries.len());
        {
            let mut insert_entry = tx
                .prepare(
                    "INSERT INTO entries (collection, partition_key, text)
                     VALUES (?1, ?2, ?3)",
                )
                .context("Failed to prepare entry insert")?;
            let mut insert_term = tx
                .prepare("INSERT INTO terms (entry_id, term_id, weight) VALUES (?1, ?2, ?3)")
                .context("Failed to prepare term insert")?;

            for entry in entries {
                insert_entry
                    .execute(params![collection, partition, entry.text])
                    .context("Failed to insert entry")?;
                let id = tx.last_insert_rowid();

                for (&term, &weight) in &entry.sparse {
                    insert_term
                        .execute(params![id, term as i64, weight as f64])
                        .context("Failed to insert term posting")?;
                }

                ids.push(id);
            }
        }

        tx.commit().context("Failed to commit entries")?;
        Ok(ids)
    }

    /// 엔트리 삭제 (밀집 측 실패 시 보상용)
    pub fn delete_entries(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let placeholders = placeholders(ids.len());

        conn.execute(
            &format!("DELETE FROM terms WHERE entry_id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )
        .context("Failed to delete term postings")?;

        let deleted = conn
            .execute(
                &format!("DELETE FROM entries WHERE id IN ({placeholders})"),
                params_from_iter(ids.iter()),
            )
            .context("Failed to delete entries")?;

        Ok(deleted)
    }

    /// 파티션 엔트리 전체 삭제 - 파티션이 있었는지 반환
    pub fn drop_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        let conn = self.lock()?;

        let existed = conn
            .execute(
                "DELETE FROM partitions WHERE collection = ?1 AND name = ?2",
                params![collection, partition],
            )
            .context("Failed to delete partition row")?
            > 0;

        conn.execute(
            "DELETE FROM terms WHERE entry_id IN
                 (SELECT id FROM entries WHERE collection = ?1 AND partition_key = ?2)",
            params![collection, partition],
        )
        .context("Failed to delete partition postings")?;
        conn.execute(
            "DELETE FROM entries WHERE collection = ?1 AND partition_key = ?2",
            params![collection, partition],
        )
        .context("Failed to delete partition entries")?;

        Ok(existed)
    }

    /// 컬렉션 관련 행 전체 삭제
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "DELETE FROM terms WHERE entry_id IN
                 (SELECT id FROM entries WHERE collection = ?1)",
            params![name],
        )
        .context("Failed to delete collection postings")?;
        conn.execute("DELETE FROM entries WHERE collection = ?1", params![name])
            .context("Failed to delete collection entries")?;
        conn.execute("DELETE FROM partitions WHERE collection = ?1", params![name])
            .context("Failed to delete collection partitions")?;
        conn.execute("DELETE FROM collections WHERE name = ?1", params![name])
            .context("Failed to delete collection row")?;

        Ok(())
    }

    /// 컬렉션 엔트리 개수
    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .context("Failed to count entries")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // 검색
    // ------------------------------------------------------------------

    /// 역색인 내적 검색
    ///
    /// 쿼리 용어와 겹치는 포스팅만 읽어
    /// score = Σ query_weight × posting_weight 를 누적합니다.
    /// 내림차순, 동점은 삽입 순서(id 오름차순)로 깨집니다.
    pub fn search(
        &self,
        collection: &str,
        query: &SparseVector,
        top_k: usize,
    ) -> Result<Vec<ScoredText>> {
        if query.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        let term_ids: Vec<i64> = query.keys().map(|&t| t as i64).collect();
        let mut scores: HashMap<i64, f32> = HashMap::new();

        {
            let conn = self.lock()?;
            let sql = format!(
                "SELECT t.entry_id, t.term_id, t.weight
                 FROM terms t
                 JOIN entries e ON e.id = t.entry_id
                 WHERE e.collection = ?1 AND t.term_id IN ({})",
                placeholders(term_ids.len())
            );
            let mut stmt = conn.prepare(&sql).context("Failed to prepare search")?;

            let mut sql_params: Vec<rusqlite::types::Value> =
                vec![rusqlite::types::Value::from(collection.to_string())];
            sql_params.extend(term_ids.iter().map(|&t| rusqlite::types::Value::from(t)));

            let rows = stmt
                .query_map(params_from_iter(sql_params), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                })
                .context("Failed to scan postings")?;

            for row in rows {
                let (entry_id, term_id, weight) = row.context("Failed to read posting")?;
                if let Some(&qw) = query.get(&(term_id as u32)) {
                    *scores.entry(entry_id).or_insert(0.0) += qw * weight as f32;
                }
            }
        }

        let mut ranked: Vec<(i64, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        if ranked.is_empty() {
            return Ok(vec![]);
        }

        // 상위 결과의 텍스트만 조회
        let texts = self.fetch_texts(ranked.iter().map(|(id, _)| *id).collect())?;
        let results = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                texts.get(&id).map(|text| ScoredText {
                    id,
                    score,
                    text: text.clone(),
                })
            })
            .collect();

        Ok(results)
    }

    fn fetch_texts(&self, ids: Vec<i64>) -> Result<HashMap<i64, String>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, text FROM entries WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare text fetch")?;

        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to fetch texts")?;

        let mut texts = HashMap::new();
        for row in rows {
            let (id, text) = row.context("Failed to read text row")?;
            texts.insert(id, text);
        }
        Ok(texts)
    }
}

/// "?,?,?" 형태의 플레이스홀더 목록
fn placeholders(count: usize) -> String {
    let mut s = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

// ============================================================================
// Tests
// ============================================================================
