use crate::chunking::split_text;
use crate::config::{IndexName, PulseConfig};
use crate::embeddings::Embedder;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::generation::{Generator, Responder};
use crate::models::{
    ConversationMessage, Document, IndexHandle, IndexRecord, QueryMatch, UpsertReport,
};
use crate::retriever::{build_context, retrieve};
use crate::session::{PipelineStage, SessionState};
use crate::store::IndexManager;
use crate::traits::VectorIndex;
use crate::RagError;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Stored(UpsertReport),
    /// Some batches failed; the session stays at `Embedded` so the upsert can be retried.
    PartiallyStored(UpsertReport),
    AlreadyStored,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<QueryMatch>,
}

/// Sequences extraction, chunking, embedding and storage for an uploaded document,
/// and retrieval plus generation for each question.
pub struct ChatOrchestrator<E, V, G> {
    embedder: E,
    indexes: IndexManager<V>,
    responder: Responder<G>,
    extractor: Box<dyn PdfExtractor + Send + Sync>,
    config: PulseConfig,
}

impl<E, V, G> ChatOrchestrator<E, V, G>
where
    E: Embedder,
    V: VectorIndex,
    G: Generator,
{
    pub fn new(embedder: E, index: V, generator: G, config: PulseConfig) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self {
            embedder,
            indexes: IndexManager::new(index, config.upsert_batch_size),
            responder: Responder::new(generator),
            extractor: Box::new(LopdfExtractor),
            config,
        })
    }

    pub fn with_extractor(mut self, extractor: impl PdfExtractor + Send + Sync + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    pub fn index_manager(&self) -> &IndexManager<V> {
        &self.indexes
    }

    pub async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
        self.indexes.list_indexes().await
    }

    /// Probes the embedding dimension and opens (or creates) the named index. On any
    /// failure the session is left without an index and cannot be queried.
    pub async fn connect_index(
        &self,
        state: &mut SessionState,
        name: &IndexName,
    ) -> Result<IndexHandle, RagError> {
        let connected = self.open_index(name, false).await;
        state.set_index(connected.as_ref().ok().cloned());
        connected
    }

    /// Like [`ChatOrchestrator::connect_index`] but drops any existing index first.
    pub async fn recreate_index(
        &self,
        state: &mut SessionState,
        name: &IndexName,
    ) -> Result<IndexHandle, RagError> {
        let connected = self.open_index(name, true).await;
        state.set_index(connected.as_ref().ok().cloned());
        connected
    }

    async fn open_index(&self, name: &IndexName, recreate: bool) -> Result<IndexHandle, RagError> {
        let dimension = self.embedder.probe_dimension().await?;
        info!(index = %name, dimension, recreate, "opening index");
        if recreate {
            self.indexes.recreate_index(name, dimension).await
        } else {
            self.indexes.ensure_index(name, dimension).await
        }
    }

    /// Runs the document through the remaining pipeline stages. Completed stages are
    /// never repeated, and a stored document is a no-op.
    pub async fn process_document(
        &self,
        state: &mut SessionState,
        document: Document,
    ) -> Result<PipelineOutcome, RagError> {
        let fingerprint = document.fingerprint();
        if let Some(current) = state.document() {
            if current.checksum != fingerprint.checksum {
                return Err(RagError::Validation(format!(
                    "session already holds {}; reset it before uploading {}",
                    current.name, fingerprint.name
                )));
            }
        }

        if state.stage() == PipelineStage::Stored {
            info!(document = %fingerprint.name, "document already processed");
            return Ok(PipelineOutcome::AlreadyStored);
        }

        if state.stage() == PipelineStage::Empty {
            info!(document = %fingerprint.name, bytes = fingerprint.size_bytes, "document uploaded");
            state.mark_uploaded(fingerprint)?;
        }

        if state.stage() == PipelineStage::Uploaded {
            info!(document = %document.name, "extracting text");
            let text = self.extractor.extract_text(&document.bytes)?;
            state.mark_extracted(text)?;
        }

        let handle = state.index().cloned().ok_or_else(|| {
            RagError::NotFound("no index is connected; connect an index first".to_string())
        })?;

        if state.stage() == PipelineStage::Extracted {
            let chunks = split_text(state.text().unwrap_or_default(), self.config.chunking)?;
            if chunks.is_empty() {
                return Err(RagError::Extraction(
                    "document text produced no chunks".to_string(),
                ));
            }
            info!(chunks = chunks.len(), "split document into chunks");

            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            state.mark_embedded(chunks, embeddings)?;
        }

        let records: Vec<IndexRecord> = state
            .chunks()
            .iter()
            .zip(state.embeddings())
            .map(|(chunk, vector)| IndexRecord::from_chunk(chunk, vector.clone()))
            .collect();

        let report = self.indexes.upsert(&handle, &records).await?;
        let complete = report.is_complete();
        state.record_upsert(report.clone())?;

        if complete {
            info!(index = %handle.name, stored = report.stored, "chunks stored");
            Ok(PipelineOutcome::Stored(report))
        } else {
            warn!(index = %handle.name, stored = report.stored, failed = report.failed, "chunks partially stored");
            Ok(PipelineOutcome::PartiallyStored(report))
        }
    }

    /// Answers one question. The question is logged to the transcript before any
    /// remote call, the answer only once generation succeeds.
    pub async fn ask(&self, state: &mut SessionState, question: &str) -> Result<Answer, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Validation("question is empty".to_string()));
        }

        let handle = state.index().cloned().ok_or_else(|| {
            RagError::NotFound("no index is connected; connect an index first".to_string())
        })?;

        state.push_message(ConversationMessage::user(question));

        let query_vector = self.embedder.embed_query(question).await?;
        let sources = retrieve(
            self.indexes.backend(),
            &handle,
            &query_vector,
            self.config.top_k,
        )
        .await?;
        let context = build_context(&sources);
        let content = self.responder.respond(question, &context).await?;

        state.push_message(ConversationMessage::assistant(content.clone()));
        Ok(Answer { content, sources })
    }

    pub fn reset(&self, state: &mut SessionState) {
        info!("session reset");
        state.reset();
    }
}
