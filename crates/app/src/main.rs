use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_pulse_core::chunking::{DEFAULT_CHUNK_MAX_CHARS, DEFAULT_CHUNK_OVERLAP_CHARS};
use pdf_pulse_core::config::{DEFAULT_INDEX_NAME, DEFAULT_TOP_K, DEFAULT_UPSERT_BATCH_SIZE};
use pdf_pulse_core::{
    ApiKey, CharacterNgramEmbedder, ChatOrchestrator, ChunkingConfig, Document, Embedder,
    GeminiEmbedder, GeminiGenerator, GeminiSettings, Generator, InMemoryIndex, IndexName,
    PineconeIndex, PineconeSettings, PipelineOutcome, PulseConfig, QdrantIndex, RagError,
    SessionState, SplitStrategy, VectorIndex,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Orchestrator =
    ChatOrchestrator<Box<dyn Embedder>, Box<dyn VectorIndex>, Box<dyn Generator>>;

#[derive(Parser)]
#[command(name = "pdf-pulse", version, about = "Chat with a PDF through a vector index")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Gemini API key, used for embeddings and answers
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Where vectors are stored
    #[arg(long, value_enum, default_value_t = VectorBackend::Pinecone)]
    vector_backend: VectorBackend,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Embedding backend. `ngram` works offline.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Gemini)]
    embedder: EmbedderKind,

    /// Index (or collection) name
    #[arg(long, default_value = DEFAULT_INDEX_NAME)]
    index: String,

    /// Drop and recreate the index before use. Discards stored vectors.
    #[arg(long, default_value_t = false)]
    recreate_index: bool,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_MAX_CHARS)]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP_CHARS)]
    chunk_overlap: usize,

    #[arg(long, value_enum, default_value_t = Splitter::Window)]
    splitter: Splitter,

    /// Number of chunks retrieved per question
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Records per upsert request
    #[arg(long, default_value_t = DEFAULT_UPSERT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, default_value = GeminiSettings::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, default_value = GeminiSettings::DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    /// Retries for rate-limited or transient embedding failures
    #[arg(long, default_value_t = 2)]
    max_retries: usize,
}

#[derive(Subcommand)]
enum Command {
    /// List the indexes visible to the selected backend.
    Indexes,
    /// Extract, chunk, embed and store one PDF.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Ask a single question against the index.
    Ask {
        #[arg(long)]
        question: String,
        /// PDF to ingest first (needed with the in-memory backend).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Interactive chat. Commands: /load <path>, /reset, /history, /quit.
    Chat {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum VectorBackend {
    Pinecone,
    Qdrant,
    Memory,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Gemini,
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum Splitter {
    Window,
    Recursive,
}

impl From<Splitter> for SplitStrategy {
    fn from(splitter: Splitter) -> Self {
        match splitter {
            Splitter::Window => SplitStrategy::Window,
            Splitter::Recursive => SplitStrategy::Recursive,
        }
    }
}

/// Stands in for the Gemini generator when no key is configured, so indexing
/// still works offline.
struct MissingKeyGenerator;

#[async_trait]
impl Generator for MissingKeyGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, RagError> {
        Err(RagError::Authentication {
            backend: "gemini".to_string(),
            details: "GEMINI_API_KEY is required to generate answers".to_string(),
        })
    }
}

impl Cli {
    fn pulse_config(&self) -> PulseConfig {
        PulseConfig {
            chunking: ChunkingConfig {
                max_chars: self.chunk_size,
                overlap_chars: self.chunk_overlap,
                strategy: self.splitter.into(),
            },
            top_k: self.top_k,
            upsert_batch_size: self.batch_size,
        }
    }

    fn gemini_settings(&self) -> anyhow::Result<Option<GeminiSettings>> {
        let Some(key) = &self.gemini_api_key else {
            return Ok(None);
        };
        let mut settings = GeminiSettings::new(ApiKey::new(key.as_str())?);
        settings.embedding_model = self.embedding_model.clone();
        settings.generation_model = self.generation_model.clone();
        settings.max_retries = self.max_retries;
        Ok(Some(settings))
    }

    fn build_orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let gemini = self.gemini_settings()?;

        let embedder: Box<dyn Embedder> = match (self.embedder, &gemini) {
            (EmbedderKind::Ngram, _) => Box::new(CharacterNgramEmbedder::default()),
            (EmbedderKind::Gemini, Some(settings)) => {
                Box::new(GeminiEmbedder::new(settings.clone())?)
            }
            (EmbedderKind::Gemini, None) => anyhow::bail!(
                "GEMINI_API_KEY is required for --embedder gemini; use --embedder ngram offline"
            ),
        };

        let generator: Box<dyn Generator> = match gemini {
            Some(settings) => Box::new(GeminiGenerator::new(settings)?),
            None => Box::new(MissingKeyGenerator),
        };

        let index: Box<dyn VectorIndex> = match self.vector_backend {
            VectorBackend::Pinecone => {
                let key = self
                    .pinecone_api_key
                    .as_deref()
                    .context("PINECONE_API_KEY is required for --vector-backend pinecone")?;
                Box::new(PineconeIndex::new(PineconeSettings::new(ApiKey::new(key)?))?)
            }
            VectorBackend::Qdrant => Box::new(QdrantIndex::new(
                self.qdrant_url.as_str(),
                self.qdrant_api_key.clone(),
            )),
            VectorBackend::Memory => Box::new(InMemoryIndex::new()),
        };

        Ok(ChatOrchestrator::new(
            embedder,
            index,
            generator,
            self.pulse_config(),
        )?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let index_name = IndexName::parse(&cli.index)?;
    let orchestrator = cli.build_orchestrator()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        backend = orchestrator.index_manager().backend().backend(),
        "pdf-pulse boot"
    );

    let mut state = SessionState::new();

    match &cli.command {
        Command::Indexes => {
            for name in orchestrator.list_indexes().await? {
                println!("{name}");
            }
        }
        Command::Ingest { file } => {
            connect(&orchestrator, &mut state, &index_name, cli.recreate_index).await?;
            ingest(&orchestrator, &mut state, file).await?;
        }
        Command::Ask { question, file } => {
            connect(&orchestrator, &mut state, &index_name, cli.recreate_index).await?;
            if let Some(file) = file {
                ingest(&orchestrator, &mut state, file).await?;
            }
            let answer = orchestrator.ask(&mut state, question).await?;
            println!("{}", answer.content);
        }
        Command::Chat { file } => {
            connect(&orchestrator, &mut state, &index_name, cli.recreate_index).await?;
            if let Some(file) = file {
                ingest(&orchestrator, &mut state, file).await?;
            }
            chat(&orchestrator, &mut state).await?;
        }
    }

    Ok(())
}

async fn connect(
    orchestrator: &Orchestrator,
    state: &mut SessionState,
    name: &IndexName,
    recreate: bool,
) -> anyhow::Result<()> {
    let handle = if recreate {
        orchestrator.recreate_index(state, name).await
    } else {
        orchestrator.connect_index(state, name).await
    }
    .with_context(|| format!("could not open index {name}"))?;

    println!("index {} ready (dimension {})", handle.name, handle.dimension);
    Ok(())
}

async fn ingest(
    orchestrator: &Orchestrator,
    state: &mut SessionState,
    path: &Path,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    match orchestrator
        .process_document(state, Document::new(name.as_str(), bytes))
        .await?
    {
        PipelineOutcome::Stored(report) => println!(
            "{name}: {} chunks stored at {}",
            report.stored,
            Utc::now().to_rfc3339()
        ),
        PipelineOutcome::PartiallyStored(report) => {
            for failure in &report.failures {
                warn!(batch = failure.batch, records = failure.records, reason = %failure.reason, "batch not stored");
            }
            println!(
                "{name}: {} chunks stored, {} failed; run again to retry",
                report.stored, report.failed
            );
        }
        PipelineOutcome::AlreadyStored => println!("{name}: already stored"),
    }

    Ok(())
}

async fn chat(orchestrator: &Orchestrator, state: &mut SessionState) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                orchestrator.reset(state);
                println!("session cleared; /load a document to continue");
            }
            "/history" => render_transcript(state),
            _ if line.starts_with("/load ") => {
                let path = PathBuf::from(line.trim_start_matches("/load ").trim());
                if let Err(error) = ingest(orchestrator, state, &path).await {
                    println!("error: {error:#}");
                }
            }
            question => match orchestrator.ask(state, question).await {
                Ok(answer) => println!("assistant: {}", answer.content),
                Err(error) => println!("error: {error}"),
            },
        }
    }

    Ok(())
}

fn render_transcript(state: &SessionState) {
    if state.messages().is_empty() {
        println!("(no messages yet)");
    }
    for message in state.messages() {
        println!("{}: {}", message.role, message.content);
    }
}
