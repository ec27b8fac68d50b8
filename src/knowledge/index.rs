//! Document Index - rusqlite 기반 문서 인덱스
//!
//! 문서 행(콘텐츠, 메타데이터, 임베딩, 토큰 추정치)을 저장하고
//! FTS5 키워드 검색과 집계 쿼리를 제공합니다. 벡터 최근접 검색은
//! `LanceVectorStore`가 담당합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

use crate::error::RagError;

use super::document::{Document, DocumentMetadata};

// ============================================================================
// Types
// ============================================================================

/// 검색 필터
///
/// 잘 알려진 메타데이터 필드의 동등 비교와 콘텐츠 부분 문자열
/// (함수명) 필터를 지원합니다.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub content_type: Option<String>,
    /// 콘텐츠 부분 문자열 필터 (예: 함수명 "VLOOKUP")
    pub function_name: Option<String>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_documents: usize,
    pub total_tokens: u64,
    pub average_tokens: f64,
    /// 최근 7일 내 생성된 문서 수
    pub recent_documents: usize,
    pub sources: Vec<String>,
    pub languages: Vec<String>,
}

// ============================================================================
// DocumentIndex
// ============================================================================

/// SQLite 문서 인덱스
pub struct DocumentIndex {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentIndex {
    /// 인덱스 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self, RagError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RagError::Store(format!("failed to create db directory: {}", e)))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        index.initialize()?;
        Ok(index)
    }

    /// DB 경로
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RagError> {
        self.conn
            .lock()
            .map_err(|e| RagError::Store(format!("connection lock poisoned: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<(), RagError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                source TEXT,
                language TEXT,
                category TEXT,
                difficulty TEXT,
                content_type TEXT,
                extra TEXT NOT NULL DEFAULT '{}',
                embedding TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_content_type ON documents(content_type)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at)",
            [],
        )?;

        // FTS5 가상 테이블 (키워드 검색용)
        // ref: https://www.sqlite.org/fts5.html
        let fts_result = conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                content,
                content=documents,
                content_rowid=id
            )",
            [],
        );

        if let Err(e) = fts_result {
            tracing::warn!("FTS5 not available (optional): {}", e);
        } else {
            // 문서는 생성/삭제만 일어나므로 동기화 트리거도 두 개면 충분
            let _ = conn.execute_batch(
                r#"
                CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
                    INSERT INTO documents_fts(rowid, content)
                    VALUES (new.id, new.content);
                END;

                CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
                    INSERT INTO documents_fts(documents_fts, rowid, content)
                    VALUES('delete', old.id, old.content);
                END;
                "#,
            );
        }

        tracing::debug!("Document index initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 행 삽입, 생성된 ID 반환
    pub fn insert(
        &self,
        content: &str,
        metadata: &DocumentMetadata,
        token_count: usize,
        embedding: &[f32],
        created_at: DateTime<Utc>,
    ) -> Result<i64, RagError> {
        let conn = self.lock()?;

        let extra_json = serde_json::to_string(&metadata.extra)
            .map_err(|e| RagError::Store(format!("failed to encode extra metadata: {}", e)))?;
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|e| RagError::Store(format!("failed to encode embedding: {}", e)))?;

        conn.execute(
            "INSERT INTO documents
                (content, source, language, category, difficulty, content_type,
                 extra, embedding, token_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                content,
                metadata.source,
                metadata.language,
                metadata.category,
                metadata.difficulty,
                metadata.content_type,
                extra_json,
                embedding_json,
                token_count as i64,
                created_at.to_rfc3339(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Inserted document id={}", id);
        Ok(id)
    }

    /// ID로 문서 조회
    pub fn get(&self, id: i64) -> Result<Option<Document>, RagError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE id = ?1",
            DOCUMENT_COLUMNS
        ))?;

        let doc = stmt
            .query_row(params![id], |row| row_to_document(row, 0))
            .optional()?;

        Ok(doc)
    }

    /// 문서 삭제, 존재했으면 true
    pub fn delete(&self, id: i64) -> Result<bool, RagError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 여러 문서 삭제, 제거된 행 수 반환
    pub fn delete_many(&self, ids: &[i64]) -> Result<usize, RagError> {
        let conn = self.lock()?;
        let mut removed = 0;
        for id in ids {
            removed += conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        }
        Ok(removed)
    }

    /// FTS5 키워드 검색
    ///
    /// 메타데이터 필터 + OR 결합 전문 검색. BM25 순위로 정렬하고
    /// 같은 순위에서는 최신 문서를 우선합니다. 검색어가 비거나 전부
    /// 이스케이프로 제거되면 필터 + 최신순으로 폴백합니다.
    /// ref: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(Document, Option<f64>)>, RagError> {
        let conn = self.lock()?;

        let escaped = escape_fts_query(query);
        let (filter_sql, mut filter_params) = build_filter_clauses(filters);

        let mut results = Vec::new();

        if escaped.is_empty() {
            let where_sql = if filter_sql.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", filter_sql.join(" AND "))
            };
            let sql = format!(
                "SELECT {} FROM documents d {} ORDER BY d.created_at DESC LIMIT ?",
                prefixed_columns("d"),
                where_sql
            );
            filter_params.push(Value::from(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(filter_params), |row| {
                row_to_document(row, 0).map(|d| (d, None))
            })?;
            for row in rows {
                results.push(row?);
            }
            return Ok(results);
        }

        let and_sql = if filter_sql.is_empty() {
            String::new()
        } else {
            format!("AND {}", filter_sql.join(" AND "))
        };
        let sql = format!(
            "SELECT {}, bm25(documents_fts) AS rank
             FROM documents_fts
             JOIN documents d ON d.id = documents_fts.rowid
             WHERE documents_fts MATCH ? {}
             ORDER BY rank, d.created_at DESC
             LIMIT ?",
            prefixed_columns("d"),
            and_sql
        );

        let mut query_params: Vec<Value> = vec![Value::from(escaped)];
        query_params.append(&mut filter_params);
        query_params.push(Value::from(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(query_params), |row| {
            let doc = row_to_document(row, 0)?;
            let rank: Option<f64> = row.get(COLUMN_COUNT)?;
            Ok((doc, rank))
        })?;
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats, RagError> {
        let conn = self.lock()?;

        let total_documents: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let total_tokens: i64 = conn.query_row(
            "SELECT COALESCE(SUM(token_count), 0) FROM documents",
            [],
            |row| row.get(0),
        )?;

        let average_tokens: f64 = conn.query_row(
            "SELECT COALESCE(AVG(token_count), 0.0) FROM documents",
            [],
            |row| row.get(0),
        )?;

        let week_ago = (Utc::now() - chrono::Duration::days(7)).to_rfc3339();
        let recent_documents: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE created_at >= ?1",
            params![week_ago],
            |row| row.get(0),
        )?;

        let sources = distinct_values(&conn, "source")?;
        let languages = distinct_values(&conn, "language")?;

        Ok(StoreStats {
            total_documents: total_documents as usize,
            total_tokens: total_tokens as u64,
            average_tokens,
            recent_documents: recent_documents as usize,
            sources,
            languages,
        })
    }

    /// 기준 시각보다 오래된 문서 ID 목록
    pub fn older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>, RagError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM documents WHERE created_at < ?1")?;
        let ids = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// 중복 정리를 위한 전체 목록 (최신 우선)
    pub fn list_for_dedup(&self) -> Result<Vec<(i64, String, DateTime<Utc>)>, RagError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, created_at FROM documents ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    parse_datetime(row.get::<_, String>(2)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 문서 수
    pub fn count(&self) -> Result<usize, RagError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

const DOCUMENT_COLUMNS: &str = "id, content, source, language, category, difficulty, \
                                content_type, extra, embedding, token_count, created_at";
const COLUMN_COUNT: usize = 11;

fn prefixed_columns(alias: &str) -> String {
    DOCUMENT_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 행을 Document로 변환 (`offset`부터 DOCUMENT_COLUMNS 순서)
fn row_to_document(row: &Row<'_>, offset: usize) -> rusqlite::Result<Document> {
    let extra_json: String = row.get(offset + 7)?;
    let extra: HashMap<String, serde_json::Value> =
        serde_json::from_str(&extra_json).unwrap_or_default();

    let embedding_json: String = row.get(offset + 8)?;
    let embedding: Vec<f32> = serde_json::from_str(&embedding_json).unwrap_or_default();

    Ok(Document {
        id: row.get(offset)?,
        content: row.get(offset + 1)?,
        metadata: DocumentMetadata {
            source: row.get(offset + 2)?,
            language: row.get(offset + 3)?,
            category: row.get(offset + 4)?,
            difficulty: row.get(offset + 5)?,
            content_type: row.get(offset + 6)?,
            extra,
        },
        embedding,
        token_count: row.get::<_, i64>(offset + 9)? as usize,
        created_at: parse_datetime(row.get::<_, String>(offset + 10)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// 필터를 WHERE 절 조각과 파라미터로 변환
fn build_filter_clauses(filters: &SearchFilters) -> (Vec<String>, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    let eq_fields = [
        ("source", &filters.source),
        ("language", &filters.language),
        ("category", &filters.category),
        ("difficulty", &filters.difficulty),
        ("content_type", &filters.content_type),
    ];

    for (column, value) in eq_fields {
        if let Some(v) = value {
            clauses.push(format!("d.{} = ?", column));
            params.push(Value::from(v.clone()));
        }
    }

    if let Some(name) = &filters.function_name {
        clauses.push("LOWER(d.content) LIKE ?".to_string());
        params.push(Value::from(format!("%{}%", name.to_lowercase())));
    }

    (clauses, params)
}

/// FTS5 쿼리 이스케이프
///
/// 특수 문자를 제거한 단어들을 OR로 결합합니다. AND 결합(공백)은
/// 단일 키워드만 일치하는 문서를 탈락시켜 하이브리드 병합의 키워드
/// 후보 집합이 비게 되므로 쓰지 않습니다.
/// ref: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn distinct_values(conn: &Connection, column: &str) -> Result<Vec<String>, RagError> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM documents WHERE {col} IS NOT NULL ORDER BY {col}",
        col = column
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_index() -> (TempDir, DocumentIndex) {
        let dir = TempDir::new().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let index = DocumentIndex::open(&db_path).expect("open index");
        (dir, index)
    }

    fn metadata(source: &str, difficulty: Option<&str>) -> DocumentMetadata {
        DocumentMetadata {
            source: Some(source.to_string()),
            language: Some("ko".to_string()),
            difficulty: difficulty.map(|d| d.to_string()),
            ..Default::default()
        }
    }

    fn insert_doc(index: &DocumentIndex, content: &str, meta: &DocumentMetadata) -> i64 {
        index
            .insert(content, meta, 10, &[0.1, 0.2], Utc::now())
            .expect("insert")
    }

    #[test]
    fn test_insert_and_get() {
        let (_dir, index) = create_test_index();
        let meta = metadata("manual", Some("beginner"));

        let id = insert_doc(&index, "VLOOKUP 함수는 값을 찾습니다", &meta);
        assert!(id > 0);

        let doc = index.get(id).expect("get").expect("found");
        assert_eq!(doc.content, "VLOOKUP 함수는 값을 찾습니다");
        assert_eq!(doc.metadata.source, Some("manual".to_string()));
        assert_eq!(doc.metadata.difficulty, Some("beginner".to_string()));
        assert_eq!(doc.embedding, vec![0.1, 0.2]);
        assert_eq!(doc.token_count, 10);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_dir, index) = create_test_index();
        assert!(index.get(999).expect("get").is_none());
    }

    #[test]
    fn test_delete() {
        let (_dir, index) = create_test_index();
        let id = insert_doc(&index, "to be deleted", &DocumentMetadata::default());

        assert!(index.delete(id).expect("delete"));
        assert!(!index.delete(id).expect("second delete"));
        assert!(index.get(id).expect("get").is_none());
    }

    #[test]
    fn test_keyword_search_matches_any_term() {
        let (_dir, index) = create_test_index();
        let meta = DocumentMetadata::default();

        insert_doc(&index, "VLOOKUP returns a lookup value", &meta);
        insert_doc(&index, "Fixing a common error in formulas", &meta);
        insert_doc(&index, "Chart styling tips", &meta);

        // OR 결합: 한 단어만 일치해도 후보가 됨
        let results = index
            .keyword_search("vlookup error", 10, &SearchFilters::default())
            .expect("search");
        assert_eq!(results.len(), 2);
        for (_, rank) in &results {
            assert!(rank.is_some());
        }
    }

    #[test]
    fn test_keyword_search_with_filters() {
        let (_dir, index) = create_test_index();

        insert_doc(&index, "SUMIF adds matching cells", &metadata("manual", None));
        insert_doc(&index, "SUMIF community example", &metadata("community", None));

        let filters = SearchFilters {
            source: Some("manual".to_string()),
            ..Default::default()
        };
        let results = index.keyword_search("sumif", 10, &filters).expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.metadata.source, Some("manual".to_string()));
    }

    #[test]
    fn test_keyword_search_function_name_filter() {
        let (_dir, index) = create_test_index();
        let meta = DocumentMetadata::default();

        insert_doc(&index, "Use INDEX with MATCH for lookups", &meta);
        insert_doc(&index, "Use SUMPRODUCT for weighted sums", &meta);

        let filters = SearchFilters {
            function_name: Some("index".to_string()),
            ..Default::default()
        };
        // 빈 검색어 - 필터 + 최신순 폴백
        let results = index.keyword_search("", 10, &filters).expect("search");
        assert_eq!(results.len(), 1);
        assert!(results[0].0.content.contains("INDEX"));
        assert!(results[0].1.is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, index) = create_test_index();
        index
            .insert("doc one", &metadata("manual", None), 8, &[0.0], Utc::now())
            .expect("insert");
        index
            .insert("doc two", &metadata("community", None), 12, &[0.0], Utc::now())
            .expect("insert");
        index
            .insert(
                "old doc",
                &metadata("manual", None),
                4,
                &[0.0],
                Utc::now() - chrono::Duration::days(30),
            )
            .expect("insert");

        let stats = index.stats().expect("stats");
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_tokens, 24);
        assert!((stats.average_tokens - 8.0).abs() < 1e-9);
        assert_eq!(stats.recent_documents, 2);
        assert_eq!(stats.sources, vec!["community", "manual"]);
        assert_eq!(stats.languages, vec!["ko"]);
    }

    #[test]
    fn test_older_than() {
        let (_dir, index) = create_test_index();
        let meta = DocumentMetadata::default();

        let old_id = index
            .insert("old", &meta, 1, &[0.0], Utc::now() - chrono::Duration::days(200))
            .expect("insert");
        index
            .insert("new", &meta, 1, &[0.0], Utc::now())
            .expect("insert");

        let cutoff = Utc::now() - chrono::Duration::days(180);
        let ids = index.older_than(cutoff).expect("older_than");
        assert_eq!(ids, vec![old_id]);
    }

    #[test]
    fn test_list_for_dedup_newest_first() {
        let (_dir, index) = create_test_index();
        let meta = DocumentMetadata::default();

        index
            .insert("same content", &meta, 1, &[0.0], Utc::now() - chrono::Duration::hours(2))
            .expect("insert");
        let newest = index
            .insert("same content", &meta, 1, &[0.0], Utc::now())
            .expect("insert");

        let rows = index.list_for_dedup().expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, newest);
    }

    #[test]
    fn test_escape_fts_query() {
        assert_eq!(escape_fts_query("hello world"), "hello OR world");
        assert_eq!(escape_fts_query("  "), "");
        assert_eq!(escape_fts_query("vlookup:error!"), "vlookuperror");
        assert_eq!(escape_fts_query("a_b"), "a_b");
    }
}
