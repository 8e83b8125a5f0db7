use crate::{IndexHandle, IndexRecord, QueryMatch, RagError};
use async_trait::async_trait;

/// A vector database that stores `(id, vector, metadata)` records under named indexes.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn list_indexes(&self) -> Result<Vec<String>, RagError>;

    /// Returns the handle of an existing index, or `None` when it does not exist.
    async fn describe_index(&self, name: &str) -> Result<Option<IndexHandle>, RagError>;

    /// Creates a cosine-metric index and returns once it accepts writes.
    async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexHandle, RagError>;

    async fn delete_index(&self, name: &str) -> Result<(), RagError>;

    /// Writes one batch in a single request; ids already present are overwritten.
    async fn upsert_records(
        &self,
        handle: &IndexHandle,
        records: &[IndexRecord],
    ) -> Result<(), RagError>;

    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, RagError>;
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Box<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
        (**self).list_indexes().await
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexHandle>, RagError> {
        (**self).describe_index(name).await
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexHandle, RagError> {
        (**self).create_index(name, dimension).await
    }

    async fn delete_index(&self, name: &str) -> Result<(), RagError> {
        (**self).delete_index(name).await
    }

    async fn upsert_records(
        &self,
        handle: &IndexHandle,
        records: &[IndexRecord],
    ) -> Result<(), RagError> {
        (**self).upsert_records(handle, records).await
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, RagError> {
        (**self).query(handle, vector, top_k).await
    }
}
