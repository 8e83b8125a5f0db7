use crate::models::{
    ConversationMessage, DocumentFingerprint, Embedding, IndexHandle, TextChunk, UpsertReport,
};
use crate::RagError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Empty,
    Uploaded,
    Extracted,
    /// Chunked and embedded, not yet fully stored.
    Embedded,
    Stored,
}

/// Everything one chat session knows. Passed by `&mut` into each orchestrator call.
#[derive(Debug, Default)]
pub struct SessionState {
    stage: PipelineStage,
    document: Option<DocumentFingerprint>,
    text: Option<String>,
    chunks: Vec<TextChunk>,
    embeddings: Vec<Embedding>,
    chunk_count: usize,
    index: Option<IndexHandle>,
    messages: Vec<ConversationMessage>,
    last_upsert: Option<UpsertReport>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn document(&self) -> Option<&DocumentFingerprint> {
        self.document.as_ref()
    }

    pub fn index(&self) -> Option<&IndexHandle> {
        self.index.as_ref()
    }

    pub fn is_queryable(&self) -> bool {
        self.index.is_some()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn last_upsert(&self) -> Option<&UpsertReport> {
        self.last_upsert.as_ref()
    }

    pub(crate) fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub(crate) fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    pub(crate) fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub(crate) fn set_index(&mut self, handle: Option<IndexHandle>) {
        self.index = handle;
    }

    pub(crate) fn mark_uploaded(&mut self, fingerprint: DocumentFingerprint) -> Result<(), RagError> {
        self.expect_stage(PipelineStage::Empty)?;
        self.document = Some(fingerprint);
        self.stage = PipelineStage::Uploaded;
        Ok(())
    }

    pub(crate) fn mark_extracted(&mut self, text: String) -> Result<(), RagError> {
        self.expect_stage(PipelineStage::Uploaded)?;
        self.text = Some(text);
        self.stage = PipelineStage::Extracted;
        Ok(())
    }

    pub(crate) fn mark_embedded(
        &mut self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<(), RagError> {
        self.expect_stage(PipelineStage::Extracted)?;
        if chunks.len() != embeddings.len() {
            return Err(RagError::Validation(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }
        self.chunk_count = chunks.len();
        self.chunks = chunks;
        self.embeddings = embeddings;
        self.stage = PipelineStage::Embedded;
        Ok(())
    }

    /// Records an upsert attempt. Only a complete report advances to `Stored`, at
    /// which point the pending text, chunks and vectors are released.
    pub(crate) fn record_upsert(&mut self, report: UpsertReport) -> Result<(), RagError> {
        self.expect_stage(PipelineStage::Embedded)?;
        if report.is_complete() {
            self.text = None;
            self.chunks = Vec::new();
            self.embeddings = Vec::new();
            self.stage = PipelineStage::Stored;
        }
        self.last_upsert = Some(report);
        Ok(())
    }

    pub(crate) fn push_message(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    /// Forgets the document and the transcript. The active index stays selected.
    pub fn reset(&mut self) {
        let index = self.index.take();
        *self = Self {
            index,
            ..Self::default()
        };
    }

    fn expect_stage(&self, expected: PipelineStage) -> Result<(), RagError> {
        if self.stage != expected {
            return Err(RagError::Validation(format!(
                "cannot leave stage {:?}: session is at {:?}",
                expected, self.stage
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchFailure, Document};

    fn chunk(id: u64) -> TextChunk {
        TextChunk {
            id,
            text: format!("chunk {id}"),
        }
    }

    #[test]
    fn stages_advance_in_order_only() {
        let mut state = SessionState::new();
        assert!(state.mark_extracted("text".to_string()).is_err());

        state
            .mark_uploaded(Document::new("a.pdf", vec![1]).fingerprint())
            .unwrap();
        assert!(state
            .mark_uploaded(Document::new("a.pdf", vec![1]).fingerprint())
            .is_err());
        state.mark_extracted("text".to_string()).unwrap();
        state
            .mark_embedded(vec![chunk(0)], vec![vec![1.0]])
            .unwrap();
        assert_eq!(state.stage(), PipelineStage::Embedded);

        state
            .record_upsert(UpsertReport {
                stored: 1,
                batches: 1,
                ..UpsertReport::default()
            })
            .unwrap();
        assert_eq!(state.stage(), PipelineStage::Stored);
        assert_eq!(state.chunk_count(), 1);
        assert!(state.chunks().is_empty());
        assert!(state.embeddings().is_empty());
        assert!(state.text().is_none());
    }

    #[test]
    fn partial_upsert_stays_embedded() {
        let mut state = SessionState::new();
        state
            .mark_uploaded(Document::new("a.pdf", vec![1]).fingerprint())
            .unwrap();
        state.mark_extracted("text".to_string()).unwrap();
        state
            .mark_embedded(vec![chunk(0), chunk(1)], vec![vec![1.0], vec![0.5]])
            .unwrap();

        state
            .record_upsert(UpsertReport {
                stored: 1,
                failed: 1,
                batches: 2,
                failures: vec![BatchFailure {
                    batch: 1,
                    records: 1,
                    reason: "boom".to_string(),
                }],
            })
            .unwrap();

        assert_eq!(state.stage(), PipelineStage::Embedded);
        assert_eq!(state.embeddings().len(), 2);
        assert_eq!(state.last_upsert().map(|report| report.failed), Some(1));
    }

    #[test]
    fn mismatched_embeddings_are_rejected() {
        let mut state = SessionState::new();
        state
            .mark_uploaded(Document::new("a.pdf", vec![1]).fingerprint())
            .unwrap();
        state.mark_extracted("text".to_string()).unwrap();
        assert!(state.mark_embedded(vec![chunk(0)], Vec::new()).is_err());
        assert_eq!(state.stage(), PipelineStage::Extracted);
    }

    #[test]
    fn reset_keeps_index_and_clears_everything_else() {
        let mut state = SessionState::new();
        state.set_index(Some(IndexHandle {
            name: "docs".to_string(),
            dimension: 3,
            host: None,
        }));
        state
            .mark_uploaded(Document::new("a.pdf", vec![1]).fingerprint())
            .unwrap();
        state.push_message(ConversationMessage::user("hello"));

        state.reset();

        assert_eq!(state.stage(), PipelineStage::Empty);
        assert!(state.messages().is_empty());
        assert!(state.document().is_none());
        assert!(state.is_queryable());
    }
}
