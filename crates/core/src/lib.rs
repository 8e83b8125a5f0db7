pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod session;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{split_text, ChunkingConfig, SplitStrategy};
pub use config::{ApiKey, GeminiSettings, IndexName, PineconeSettings, PulseConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, GeminiEmbedder, TaskType};
pub use error::{RagError, Result};
pub use extractor::{extract_text_from_path, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{build_prompt, GeminiGenerator, Generator, Responder};
pub use models::{
    ConversationMessage, Document, DocumentFingerprint, Embedding, IndexHandle, IndexRecord,
    QueryMatch, RecordMetadata, Role, TextChunk, UpsertReport,
};
pub use orchestrator::{Answer, ChatOrchestrator, PipelineOutcome};
pub use retriever::{build_context, retrieve};
pub use session::{PipelineStage, SessionState};
pub use store::IndexManager;
pub use stores::{InMemoryIndex, PineconeIndex, QdrantIndex};
pub use traits::VectorIndex;
