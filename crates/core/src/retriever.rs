use crate::models::{IndexHandle, QueryMatch};
use crate::traits::VectorIndex;
use crate::RagError;
use tracing::info;

/// Runs the top-k similarity query. Scores come back highest first.
pub async fn retrieve<V: VectorIndex + ?Sized>(
    index: &V,
    handle: &IndexHandle,
    query_vector: &[f32],
    top_k: usize,
) -> Result<Vec<QueryMatch>, RagError> {
    if top_k == 0 {
        return Err(RagError::Validation("top_k must be positive".to_string()));
    }
    if query_vector.len() != handle.dimension {
        return Err(RagError::Validation(format!(
            "query vector has dimension {}, index {} expects {}",
            query_vector.len(),
            handle.name,
            handle.dimension
        )));
    }

    let mut matches = index.query(handle, query_vector, top_k).await?;
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(top_k);

    info!(index = %handle.name, top_k, returned = matches.len(), "retrieved chunks");
    Ok(matches)
}

pub fn build_context(matches: &[QueryMatch]) -> String {
    matches
        .iter()
        .map(|hit| hit.metadata.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexRecord, RecordMetadata};
    use crate::stores::InMemoryIndex;

    fn record(id: &str, vector: Vec<f32>, text: &str) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            vector,
            metadata: RecordMetadata {
                text: text.to_string(),
            },
        }
    }

    async fn populated() -> (InMemoryIndex, IndexHandle) {
        let index = InMemoryIndex::new();
        let handle = index.create_index("docs", 2).await.unwrap();
        index
            .upsert_records(
                &handle,
                &[
                    record("a", vec![1.0, 0.0], "exact"),
                    record("b", vec![0.7, 0.7], "diagonal"),
                    record("c", vec![-1.0, 0.0], "opposite"),
                ],
            )
            .await
            .unwrap();
        (index, handle)
    }

    #[tokio::test]
    async fn returns_the_two_most_similar_in_descending_order() {
        let (index, handle) = populated().await;
        let matches = retrieve(&index, &handle, &[1.0, 0.0], 2).await.unwrap();

        let ids: Vec<_> = matches.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(matches[0].score >= matches[1].score);
    }

    #[tokio::test]
    async fn zero_top_k_and_wrong_dimension_are_rejected() {
        let (index, handle) = populated().await;
        assert!(matches!(
            retrieve(&index, &handle, &[1.0, 0.0], 0).await,
            Err(RagError::Validation(_))
        ));
        assert!(matches!(
            retrieve(&index, &handle, &[1.0, 0.0, 0.0], 1).await,
            Err(RagError::Validation(_))
        ));
    }

    #[test]
    fn context_joins_texts_in_retrieval_order() {
        let matches = vec![
            QueryMatch {
                id: "2".to_string(),
                score: 0.9,
                metadata: RecordMetadata {
                    text: "second chunk".to_string(),
                },
            },
            QueryMatch {
                id: "0".to_string(),
                score: 0.5,
                metadata: RecordMetadata {
                    text: "first chunk".to_string(),
                },
            },
        ];
        assert_eq!(build_context(&matches), "second chunk\nfirst chunk");
        assert_eq!(build_context(&[]), "");
    }
}
