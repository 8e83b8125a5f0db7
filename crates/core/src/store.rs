use crate::config::IndexName;
use crate::models::{BatchFailure, IndexHandle, IndexRecord, UpsertReport};
use crate::traits::VectorIndex;
use crate::RagError;
use tracing::{info, warn};

/// Creates or reuses a named index and writes records to it in bounded batches.
pub struct IndexManager<V> {
    index: V,
    batch_size: usize,
}

impl<V: VectorIndex> IndexManager<V> {
    pub fn new(index: V, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub fn backend(&self) -> &V {
        &self.index
    }

    pub async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
        self.index.list_indexes().await
    }

    /// Reuses an existing index when its dimension matches, creates one otherwise.
    /// A dimension mismatch is an error; use [`IndexManager::recreate_index`] to
    /// replace the index.
    pub async fn ensure_index(
        &self,
        name: &IndexName,
        dimension: usize,
    ) -> Result<IndexHandle, RagError> {
        validate_dimension(dimension)?;

        match self.index.describe_index(name.as_str()).await? {
            Some(handle) if handle.dimension == dimension => {
                info!(index = %name, dimension, backend = self.index.backend(), "reusing index");
                Ok(handle)
            }
            Some(handle) => Err(RagError::Validation(format!(
                "index {name} has dimension {}, embeddings have dimension {dimension}",
                handle.dimension
            ))),
            None => {
                info!(index = %name, dimension, backend = self.index.backend(), "creating index");
                self.index.create_index(name.as_str(), dimension).await
            }
        }
    }

    /// Deletes any existing index of this name before creating a fresh one.
    /// Every vector previously stored under the name is discarded.
    pub async fn recreate_index(
        &self,
        name: &IndexName,
        dimension: usize,
    ) -> Result<IndexHandle, RagError> {
        validate_dimension(dimension)?;

        if self.index.describe_index(name.as_str()).await?.is_some() {
            warn!(index = %name, "deleting existing index; stored vectors are discarded");
            self.index.delete_index(name.as_str()).await?;
        }
        self.index.create_index(name.as_str(), dimension).await
    }

    /// Upserts `records` in batches. Every vector is checked against the handle's
    /// dimension before anything is sent. A failed batch is recorded in the report
    /// and does not stop later batches.
    pub async fn upsert(
        &self,
        handle: &IndexHandle,
        records: &[IndexRecord],
    ) -> Result<UpsertReport, RagError> {
        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != handle.dimension)
        {
            return Err(RagError::Validation(format!(
                "record {} has dimension {}, index {} expects {}",
                record.id,
                record.vector.len(),
                handle.name,
                handle.dimension
            )));
        }

        let mut report = UpsertReport::default();
        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            report.batches += 1;
            match self.index.upsert_records(handle, chunk).await {
                Ok(()) => report.stored += chunk.len(),
                Err(error) => {
                    warn!(index = %handle.name, batch, records = chunk.len(), %error, "upsert batch failed");
                    report.failed += chunk.len();
                    report.failures.push(BatchFailure {
                        batch,
                        records: chunk.len(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            index = %handle.name,
            stored = report.stored,
            failed = report.failed,
            batches = report.batches,
            "upsert finished"
        );
        Ok(report)
    }
}

fn validate_dimension(dimension: usize) -> Result<(), RagError> {
    if dimension == 0 {
        return Err(RagError::Validation(
            "index dimension must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryMatch, RecordMetadata};
    use crate::stores::InMemoryIndex;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn record(id: usize, dimension: usize) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            vector: vec![1.0; dimension],
            metadata: RecordMetadata {
                text: format!("chunk {id}"),
            },
        }
    }

    fn name(value: &str) -> IndexName {
        IndexName::parse(value).unwrap()
    }

    /// Delegates to an in-memory index but rejects the batches listed in `failing`.
    struct FlakyIndex {
        inner: InMemoryIndex,
        failing: Vec<usize>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        fn backend(&self) -> &'static str {
            "flaky"
        }

        async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
            self.inner.list_indexes().await
        }

        async fn describe_index(&self, name: &str) -> Result<Option<IndexHandle>, RagError> {
            self.inner.describe_index(name).await
        }

        async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexHandle, RagError> {
            self.inner.create_index(name, dimension).await
        }

        async fn delete_index(&self, name: &str) -> Result<(), RagError> {
            self.inner.delete_index(name).await
        }

        async fn upsert_records(
            &self,
            handle: &IndexHandle,
            records: &[IndexRecord],
        ) -> Result<(), RagError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let call = *calls;
                *calls += 1;
                call
            };
            if self.failing.contains(&call) {
                return Err(RagError::Transient {
                    backend: "flaky".to_string(),
                    details: format!("batch {call} dropped"),
                });
            }
            self.inner.upsert_records(handle, records).await
        }

        async fn query(
            &self,
            handle: &IndexHandle,
            vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<QueryMatch>, RagError> {
            self.inner.query(handle, vector, top_k).await
        }
    }

    #[tokio::test]
    async fn ensure_index_creates_then_reuses() {
        let manager = IndexManager::new(InMemoryIndex::new(), 100);
        let created = manager.ensure_index(&name("x"), 768).await.unwrap();
        let reused = manager.ensure_index(&name("x"), 768).await.unwrap();

        assert_eq!(created, reused);
        assert_eq!(manager.list_indexes().await.unwrap(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn ensure_index_rejects_dimension_mismatch() {
        let manager = IndexManager::new(InMemoryIndex::new(), 100);
        manager.ensure_index(&name("x"), 768).await.unwrap();

        assert!(matches!(
            manager.ensure_index(&name("x"), 512).await,
            Err(RagError::Validation(_))
        ));
        assert!(matches!(
            manager.ensure_index(&name("y"), 0).await,
            Err(RagError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn recreate_index_replaces_dimension_and_drops_records() {
        let manager = IndexManager::new(InMemoryIndex::new(), 100);
        let handle = manager.ensure_index(&name("x"), 4).await.unwrap();
        manager.upsert(&handle, &[record(0, 4)]).await.unwrap();

        let handle = manager.recreate_index(&name("x"), 8).await.unwrap();

        assert_eq!(handle.dimension, 8);
        assert_eq!(manager.backend().record_count("x"), 0);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_before_sending() {
        let manager = IndexManager::new(InMemoryIndex::new(), 100);
        let handle = manager.ensure_index(&name("x"), 768).await.unwrap();

        let result = manager.upsert(&handle, &[record(0, 768), record(1, 512)]).await;
        assert!(matches!(result, Err(RagError::Validation(_))));
        assert_eq!(manager.backend().record_count("x"), 0);

        let report = manager.upsert(&handle, &[record(0, 768)]).await.unwrap();
        assert_eq!(report.stored, 1);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn upsert_batches_and_reports_partial_failure() {
        let flaky = FlakyIndex {
            inner: InMemoryIndex::new(),
            failing: vec![1],
            calls: Mutex::new(0),
        };
        let manager = IndexManager::new(flaky, 100);
        let handle = manager.ensure_index(&name("x"), 3).await.unwrap();
        let records: Vec<_> = (0..250).map(|id| record(id, 3)).collect();

        let report = manager.upsert(&handle, &records).await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.stored, 150);
        assert_eq!(report.failed, 100);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].batch, 1);
        assert_eq!(report.failures[0].records, 100);
        assert!(!report.is_complete());
        assert_eq!(manager.backend().inner.record_count("x"), 150);
    }
}
