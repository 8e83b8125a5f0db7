use crate::traits::VectorIndex;
use crate::{IndexHandle, IndexRecord, QueryMatch, RagError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct StoredIndex {
    dimension: usize,
    records: BTreeMap<String, IndexRecord>,
}

/// Process-local index with brute-force cosine search. Contents die with the process.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    indexes: RwLock<HashMap<String, StoredIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self, name: &str) -> usize {
        self.indexes
            .read()
            .map(|indexes| indexes.get(name).map_or(0, |index| index.records.len()))
            .unwrap_or(0)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RagError {
    RagError::Transient {
        backend: "memory".to_string(),
        details: "index lock poisoned".to_string(),
    }
}

fn handle_for(name: &str, index: &StoredIndex) -> IndexHandle {
    IndexHandle {
        name: name.to_string(),
        dimension: index.dimension,
        host: None,
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
        let indexes = self.indexes.read().map_err(poisoned)?;
        let mut names: Vec<String> = indexes.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexHandle>, RagError> {
        let indexes = self.indexes.read().map_err(poisoned)?;
        Ok(indexes.get(name).map(|index| handle_for(name, index)))
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexHandle, RagError> {
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        if indexes.contains_key(name) {
            return Err(RagError::Validation(format!("index {name} already exists")));
        }

        let index = StoredIndex {
            dimension,
            records: BTreeMap::new(),
        };
        let handle = handle_for(name, &index);
        indexes.insert(name.to_string(), index);
        Ok(handle)
    }

    async fn delete_index(&self, name: &str) -> Result<(), RagError> {
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RagError::NotFound(format!("index {name} does not exist")))
    }

    async fn upsert_records(
        &self,
        handle: &IndexHandle,
        records: &[IndexRecord],
    ) -> Result<(), RagError> {
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        let index = indexes
            .get_mut(&handle.name)
            .ok_or_else(|| RagError::NotFound(format!("index {} does not exist", handle.name)))?;

        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != index.dimension)
        {
            return Err(RagError::Validation(format!(
                "record {} has dimension {}, index {} expects {}",
                record.id,
                record.vector.len(),
                handle.name,
                index.dimension
            )));
        }

        for record in records {
            index.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, RagError> {
        let indexes = self.indexes.read().map_err(poisoned)?;
        let index = indexes
            .get(&handle.name)
            .ok_or_else(|| RagError::NotFound(format!("index {} does not exist", handle.name)))?;

        if vector.len() != index.dimension {
            return Err(RagError::Validation(format!(
                "query vector has dimension {}, index {} expects {}",
                vector.len(),
                handle.name,
                index.dimension
            )));
        }

        let mut matches: Vec<QueryMatch> = index
            .records
            .values()
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector).unwrap_or(0.0),
                metadata: record.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}
