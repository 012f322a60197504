use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tutor_core::chunking::{DEFAULT_CHUNK_WORDS, DEFAULT_OVERLAP_WORDS};
use tutor_core::config::{
    EMBEDDING_API_KEY_VAR, EMBEDDING_ENDPOINT_VAR, GENERATION_API_KEY_VAR,
    GENERATION_ENDPOINT_VAR, OCR_API_KEY_VAR, OCR_ENDPOINT_VAR,
};
use tutor_core::{
    list_folder, BatchStatus, CharacterNgramEmbedder, ChunkingConfig, Embedder, EndpointConfig,
    ExtractionDispatcher, HttpEmbedder, HttpGenerator, PromptTemplates, RemoteOcrClient,
    TesseractOcr, Tutor, VectorStore, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_GENERATION_MODEL,
};

#[derive(Parser)]
#[command(name = "tutor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted index files
    #[arg(long, env = "TUTOR_INDEX_DIR", default_value = "index")]
    index_dir: PathBuf,

    /// Directory with system/quiz/summarize/explain prompt templates
    #[arg(long, env = "TUTOR_PROMPTS_DIR")]
    prompts_dir: Option<PathBuf>,

    /// OpenAI-compatible base URL used for answers
    #[arg(long, env = GENERATION_ENDPOINT_VAR)]
    generation_endpoint: Option<String>,

    #[arg(long, env = GENERATION_API_KEY_VAR, hide_env_values = true)]
    generation_api_key: Option<String>,

    #[arg(long, env = "TUTOR_GENERATION_MODEL", default_value = DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    /// Remote OCR service for image folders
    #[arg(long, env = OCR_ENDPOINT_VAR)]
    ocr_endpoint: Option<String>,

    #[arg(long, env = OCR_API_KEY_VAR, hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// OpenAI-compatible base URL for embeddings; local hashing is used when unset
    #[arg(long, env = EMBEDDING_ENDPOINT_VAR)]
    embedding_endpoint: Option<String>,

    #[arg(long, env = EMBEDDING_API_KEY_VAR, hide_env_values = true)]
    embedding_api_key: Option<String>,

    #[arg(long, env = "TUTOR_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Path of the tesseract binary for local OCR
    #[arg(long, env = "TUTOR_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CHUNK_WORDS)]
    chunk_words: usize,

    #[arg(long, default_value_t = DEFAULT_OVERLAP_WORDS)]
    overlap_words: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a folder of PDFs or page images and rebuild the index.
    Build {
        folder: PathBuf,
        /// Ignore any OCR progress marker and start from the first image.
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    /// Answer a question from the indexed pages.
    Ask { question: String },
    /// Generate practice questions on a topic.
    Quiz {
        topic: String,
        #[arg(long, default_value = "5")]
        count: usize,
    },
    Summarize { topic: String },
    Explain { concept: String },
    /// Print the closest chunks without calling the generator.
    Search {
        query: String,
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
    /// Interactive session; type quit, exit, bye or q to leave.
    Chat,
    /// Report index size and, with a folder, the number of input documents.
    Stats { folder: Option<PathBuf> },
    /// Delete the persisted index files.
    Reset,
}

type CliTutor = Tutor<Box<dyn Embedder>, HttpGenerator>;

impl Cli {
    fn embedder(&self) -> anyhow::Result<Box<dyn Embedder>> {
        match EndpointConfig::from_parts(
            self.embedding_endpoint.as_deref(),
            self.embedding_api_key.as_deref(),
        ) {
            Some(config) => {
                let embedder =
                    HttpEmbedder::new(&config, &self.embedding_model, self.embedding_dimensions)?;
                info!(endpoint = %config.endpoint, model = %self.embedding_model, "using remote embeddings");
                Ok(Box::new(embedder))
            }
            None => Ok(Box::new(CharacterNgramEmbedder {
                dimensions: self.embedding_dimensions,
            })),
        }
    }

    fn generator(&self) -> anyhow::Result<Option<HttpGenerator>> {
        let Some(config) = EndpointConfig::from_parts(
            self.generation_endpoint.as_deref(),
            self.generation_api_key.as_deref(),
        ) else {
            return Ok(None);
        };
        Ok(Some(HttpGenerator::new(&config, &self.generation_model)?))
    }

    fn dispatcher(&self, resume: bool) -> anyhow::Result<ExtractionDispatcher> {
        let mut dispatcher = ExtractionDispatcher::default().with_resume(resume);

        if let Some(config) =
            EndpointConfig::from_parts(self.ocr_endpoint.as_deref(), self.ocr_api_key.as_deref())
        {
            dispatcher = dispatcher.with_remote_ocr(Box::new(RemoteOcrClient::new(config)?));
        }

        let tesseract = TesseractOcr::new(&self.tesseract);
        if tesseract.is_available() {
            dispatcher = dispatcher.with_local_ocr(Box::new(tesseract));
        } else {
            warn!(command = %self.tesseract.display(), "tesseract not available, local OCR disabled");
        }

        Ok(dispatcher)
    }

    fn templates(&self) -> PromptTemplates {
        self.prompts_dir
            .as_deref()
            .map(PromptTemplates::load)
            .unwrap_or_default()
    }

    fn store(&self) -> anyhow::Result<VectorStore<Box<dyn Embedder>>> {
        let chunking = ChunkingConfig::new(self.chunk_words, self.overlap_words)?;
        Ok(VectorStore::new(self.embedder()?, &self.index_dir, chunking))
    }

    /// Fails when the saved index cannot be loaded.
    fn tutor(&self) -> anyhow::Result<CliTutor> {
        let tutor = Tutor::open(
            self.store()?,
            self.dispatcher(true)?,
            self.generator()?,
            self.templates(),
        )?;
        Ok(tutor)
    }

    /// For commands that replace or inspect the index directory: a saved
    /// index that fails to load is only a warning.
    fn maintenance_tutor(&self, resume: bool) -> anyhow::Result<CliTutor> {
        Ok(Tutor::open_or_fresh(
            self.store()?,
            self.dispatcher(resume)?,
            self.generator()?,
            self.templates(),
        ))
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "tutor boot"
    );

    match &cli.command {
        Command::Build { folder, fresh } => {
            let mut tutor = cli.maintenance_tutor(!fresh)?;
            let outcome = tutor
                .build_index_from_folder(folder)
                .with_context(|| format!("building index from {}", folder.display()))?;

            for skipped in &outcome.report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped input");
            }

            match (&outcome.summary, &outcome.report.strategy) {
                (Some(summary), Some(strategy)) => println!(
                    "{} chunks from {} pages indexed via {} at {}",
                    summary.chunk_count,
                    summary.record_count,
                    strategy.label(),
                    summary.built_at.to_rfc3339()
                ),
                _ if outcome.report.no_supported_input() => {
                    println!("no supported input found in {}", folder.display())
                }
                _ => println!("no text extracted; index left unchanged"),
            }

            if let BatchStatus::Interrupted { reason, remaining } = &outcome.report.status {
                println!(
                    "extraction interrupted ({reason}); {remaining} image(s) left, rerun build to resume"
                );
            }
        }
        Command::Ask { question } => {
            let answer = cli.tutor()?.answer(question)?;
            println!("{}\n\nSources: Pages {:?}", answer.text, answer.source_pages());
        }
        Command::Quiz { topic, count } => {
            println!("{}", cli.tutor()?.generate_quiz(topic, *count)?);
        }
        Command::Summarize { topic } => {
            println!("{}", cli.tutor()?.summarize(topic)?);
        }
        Command::Explain { concept } => {
            println!("{}", cli.tutor()?.explain(concept)?);
        }
        Command::Search { query, top_k } => {
            let hits = cli.tutor()?.search(query, *top_k)?;
            println!("query: {query}");
            for hit in hits {
                println!(
                    "[page {}] distance={:.4} chunk={} source={}",
                    hit.metadata.page_number,
                    hit.distance,
                    hit.metadata.chunk_id,
                    hit.metadata.source_name
                );
                println!("  chunk_text:\n{}", hit.chunk_text);
            }
        }
        Command::Chat => run_chat(&cli.tutor()?)?,
        Command::Stats { folder } => {
            let tutor = cli.maintenance_tutor(true)?;
            let info = tutor.store().storage_info();
            println!("chunks: {}", info.num_chunks);
            println!("has_index: {}", info.has_index);
            println!("index_files_present: {}", info.index_files_present);
            println!("index_size_bytes: {}", info.index_size_bytes);
            if let Some(built_at) = info.built_at {
                println!("built_at: {}", built_at.to_rfc3339());
            }
            if let Some(folder) = folder {
                let listing = list_folder(folder)?;
                println!(
                    "documents: {} ({} pdf, {} image)",
                    listing.documents,
                    listing.pdfs.len(),
                    listing.images.len()
                );
            }
        }
        Command::Reset => {
            let mut tutor = cli.maintenance_tutor(true)?;
            tutor.store_mut().remove_persisted()?;
            println!("index removed from {}", cli.index_dir.display());
        }
    }

    Ok(())
}

fn run_chat(tutor: &CliTutor) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("Ask about the textbook; type quit to leave.");

    loop {
        print!("you> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(
            input.to_lowercase().as_str(),
            "quit" | "exit" | "bye" | "q"
        ) {
            break;
        }

        match tutor.chat(input) {
            Ok(reply) => println!("tutor> {reply}\n"),
            Err(error) => println!("tutor> error: {error}\n"),
        }
    }

    Ok(())
}
