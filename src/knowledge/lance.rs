//! LanceDB Vector Store - 문서 벡터 최근접 검색
//!
//! 문서당 하나의 임베딩을 저장하고 ANN (Approximate Nearest Neighbor)
//! 검색을 제공합니다. Apache Arrow 기반 columnar 포맷입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::RagError;

use super::vector::{DocumentVector, VectorHit, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "vectors";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self, RagError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RagError::Store(format!("failed to create lance dir: {}", e)))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Store("invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str).execute().await?;

        Ok(Self {
            db,
            dimension: dimension as i32,
        })
    }

    /// 벡터 테이블 스키마
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("doc_id", DataType::Int64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[DocumentVector]) -> Result<RecordBatch, RagError> {
        if entries.is_empty() {
            return Err(RagError::Store(
                "cannot create batch from empty entries".to_string(),
            ));
        }

        for entry in entries {
            if entry.embedding.len() != self.dimension as usize {
                return Err(RagError::ContractViolation {
                    expected: self.dimension as usize,
                    actual: entry.embedding.len(),
                });
            }
        }

        let doc_ids: Vec<i64> = entries.iter().map(|e| e.doc_id).collect();
        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::Store(format!("failed to build embedding array: {}", e)))?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![Arc::new(Int64Array::from(doc_ids)), Arc::new(embeddings_list)],
        )
        .map_err(|e| RagError::Store(format!("failed to build record batch: {}", e)))?;

        Ok(batch)
    }

    /// 테이블 존재 여부
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[DocumentVector]) -> Result<usize, RagError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self.db.open_table(TABLE_NAME).execute().await?;
            table.add(batches).execute().await?;
        } else {
            self.db.create_table(TABLE_NAME, batches).execute().await?;
        }

        Ok(entries.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, RagError> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.db.open_table(TABLE_NAME).execute().await?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .map_err(|e| RagError::Store(format!("failed to build vector search: {}", e)))?
            .limit(limit)
            .execute()
            .await?;

        let mut hits = Vec::new();

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RagError::Store(format!("failed to read search results: {}", e)))?;

        for batch in batches {
            let doc_ids = batch
                .column_by_name("doc_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| RagError::Store("missing doc_id column".to_string()))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RagError::Store("missing _distance column".to_string()))?;

            for i in 0..batch.num_rows() {
                let distance = distances.value(i);
                // 거리를 (0, 1] 유사도로 변환
                let similarity = 1.0 / (1.0 + distance);

                hits.push(VectorHit {
                    doc_id: doc_ids.value(i),
                    similarity,
                });
            }
        }

        Ok(hits)
    }

    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize, RagError> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.db.open_table(TABLE_NAME).execute().await?;

        let before_count = self.count().await?;

        // doc_id는 i64 - SQL 인젝션 불가
        let filter = format!("doc_id = {}", doc_id);
        table.delete(&filter).await?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn count(&self) -> Result<usize, RagError> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.db.open_table(TABLE_NAME).execute().await?;
        let count = table.count_rows(None).await?;
        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn entry(doc_id: i64, value: f32) -> DocumentVector {
        DocumentVector {
            doc_id,
            embedding: vec![value; DIM],
        }
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = LanceVectorStore::open(&temp_dir.path().join("test.lance"), DIM)
            .await
            .expect("open");

        assert_eq!(store.count().await.expect("count"), 0);

        let inserted = store
            .insert_batch(&[entry(1, 0.1), entry(2, 0.2)])
            .await
            .expect("insert");
        assert_eq!(inserted, 2);
        assert_eq!(store.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn test_search_ranks_by_distance() {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = LanceVectorStore::open(&temp_dir.path().join("search.lance"), DIM)
            .await
            .expect("open");

        store
            .insert_batch(&[entry(1, 0.1), entry(2, 0.5), entry(3, 0.9)])
            .await
            .expect("insert");

        let query = vec![0.1; DIM];
        let hits = store.search(&query, 2).await.expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, 1);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = LanceVectorStore::open(&temp_dir.path().join("empty.lance"), DIM)
            .await
            .expect("open");

        let hits = store.search(&vec![0.0; DIM], 5).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_doc_id() {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = LanceVectorStore::open(&temp_dir.path().join("delete.lance"), DIM)
            .await
            .expect("open");

        store
            .insert_batch(&[entry(1, 0.1), entry(2, 0.2)])
            .await
            .expect("insert");

        let deleted = store.delete_by_doc_id(1).await.expect("delete");
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.expect("count"), 1);

        let deleted = store.delete_by_doc_id(999).await.expect("delete missing");
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = LanceVectorStore::open(&temp_dir.path().join("dim.lance"), DIM)
            .await
            .expect("open");

        let bad = DocumentVector {
            doc_id: 1,
            embedding: vec![0.1; DIM + 1],
        };
        let err = store.insert_batch(&[bad]).await.unwrap_err();
        assert!(matches!(err, RagError::ContractViolation { .. }));
    }
}
