pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod prompts;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_records, chunk_words, ChunkingConfig};
pub use config::{EndpointConfig, OcrRetryPolicy};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IndexError, IngestError, TutorError};
pub use extractor::{extract_pdf_records, LopdfExtractor, PageMapping, PageText, PdfExtractor};
pub use generation::{HttpGenerator, DEFAULT_GENERATION_MODEL};
pub use ingest::{list_folder, select_strategy, Availability, ExtractionDispatcher, FolderListing};
pub use models::{
    BatchStatus, BuildSummary, ChunkMetadata, ExtractionReport, ExtractionStrategy, PageRecord,
    SearchHit, SkippedSource, StorageInfo,
};
pub use ocr::{CheckpointedOcrBatch, ImageOcr, OcrProgress, RemoteOcrClient, TesseractOcr};
pub use orchestrator::{Answer, BuildOutcome, Tutor, DEFAULT_QUIZ_QUESTIONS};
pub use prompts::{Intent, PromptTemplates, ResponseMode};
pub use store::VectorStore;
pub use stores::{FlatL2Index, IndexFiles};
pub use traits::{Generator, VectorIndex};
