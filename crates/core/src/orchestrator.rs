use crate::embeddings::Embedder;
use crate::error::TutorError;
use crate::ingest::ExtractionDispatcher;
use crate::models::{BuildSummary, ChunkMetadata, ExtractionReport, SearchHit};
use crate::prompts::{Intent, PromptTemplates, ResponseMode};
use crate::store::VectorStore;
use crate::traits::Generator;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_QUIZ_QUESTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ChunkMetadata>,
}

impl Answer {
    pub fn source_pages(&self) -> Vec<u32> {
        self.sources.iter().map(|source| source.page_number).collect()
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub report: ExtractionReport,
    /// `None` when extraction produced no records and the index was left as is.
    pub summary: Option<BuildSummary>,
}

/// One tutoring session: owns the index, the extraction dispatcher and the
/// collaborators. The presentation layer holds it and calls into it.
pub struct Tutor<E, G>
where
    E: Embedder,
    G: Generator,
{
    store: VectorStore<E>,
    dispatcher: ExtractionDispatcher,
    generator: Option<G>,
    templates: PromptTemplates,
}

impl<E, G> Tutor<E, G>
where
    E: Embedder,
    G: Generator,
{
    pub fn new(
        store: VectorStore<E>,
        dispatcher: ExtractionDispatcher,
        generator: Option<G>,
        templates: PromptTemplates,
    ) -> Self {
        Self {
            store,
            dispatcher,
            generator,
            templates,
        }
    }

    /// Like [`Tutor::new`], then loads any index already on disk.
    pub fn open(
        store: VectorStore<E>,
        dispatcher: ExtractionDispatcher,
        generator: Option<G>,
        templates: PromptTemplates,
    ) -> Result<Self, TutorError> {
        let mut tutor = Self::new(store, dispatcher, generator, templates);
        if !tutor.store.load()? {
            warn!("no index found; build one from a folder of pages first");
        }
        Ok(tutor)
    }

    /// Like [`Tutor::open`], but an index that fails to load (other
    /// dimension, mixed builds, unreadable files) is logged and the tutor
    /// starts empty, so it can still rebuild or reset the directory.
    pub fn open_or_fresh(
        store: VectorStore<E>,
        dispatcher: ExtractionDispatcher,
        generator: Option<G>,
        templates: PromptTemplates,
    ) -> Self {
        let mut tutor = Self::new(store, dispatcher, generator, templates);
        match tutor.store.load() {
            Ok(true) => {}
            Ok(false) => info!("no index found, starting empty"),
            Err(error) => warn!(
                dir = %tutor.store.index_dir().display(),
                %error,
                "existing index could not be loaded, starting empty"
            ),
        }
        tutor
    }

    pub fn store(&self) -> &VectorStore<E> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VectorStore<E> {
        &mut self.store
    }

    pub fn build_index_from_folder(&mut self, folder: &Path) -> Result<BuildOutcome, TutorError> {
        info!(folder = %folder.display(), "building knowledge base");
        let report = self.dispatcher.select_and_extract(folder)?;

        if report.records.is_empty() {
            warn!(folder = %folder.display(), "no text extracted, index left unchanged");
            return Ok(BuildOutcome {
                report,
                summary: None,
            });
        }

        if report.is_resumable() {
            warn!("extraction was interrupted; indexing the pages extracted so far");
        }

        let summary = self.store.build(&report.records)?;
        Ok(BuildOutcome {
            report,
            summary: Some(summary),
        })
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, TutorError> {
        Ok(self.store.search(query, top_k)?)
    }

    fn generator(&self) -> Result<&G, TutorError> {
        self.generator.as_ref().ok_or_else(|| {
            TutorError::ConfigurationMissing("text generation service".to_string())
        })
    }

    fn retrieve(&self, mode: ResponseMode, query: &str) -> Result<Vec<SearchHit>, TutorError> {
        Ok(self.store.search(query, mode.top_k())?)
    }

    pub fn answer(&self, question: &str) -> Result<Answer, TutorError> {
        let generator = self.generator()?;
        let hits = self.retrieve(ResponseMode::Question, question)?;

        let context = hits
            .iter()
            .map(|hit| format!("[Page {}]: {}", hit.metadata.page_number, hit.chunk_text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = self.templates.render(
            ResponseMode::Question,
            &[("context", context.as_str()), ("question", question)],
        );

        Ok(Answer {
            text: generator.generate(&prompt)?,
            sources: hits.into_iter().map(|hit| hit.metadata).collect(),
        })
    }

    pub fn generate_quiz(&self, topic: &str, num_questions: usize) -> Result<String, TutorError> {
        let generator = self.generator()?;
        let context = plain_context(&self.retrieve(ResponseMode::Quiz, topic)?);
        let count = num_questions.to_string();
        let prompt = self.templates.render(
            ResponseMode::Quiz,
            &[
                ("topic", topic),
                ("num_questions", count.as_str()),
                ("context", context.as_str()),
            ],
        );
        generator.generate(&prompt)
    }

    pub fn summarize(&self, topic: &str) -> Result<String, TutorError> {
        let generator = self.generator()?;
        let context = plain_context(&self.retrieve(ResponseMode::Summary, topic)?);
        let prompt = self
            .templates
            .render(ResponseMode::Summary, &[("topic", topic), ("context", context.as_str())]);
        generator.generate(&prompt)
    }

    pub fn explain(&self, concept: &str) -> Result<String, TutorError> {
        let generator = self.generator()?;
        let context = plain_context(&self.retrieve(ResponseMode::Explanation, concept)?);
        let prompt = self.templates.render(
            ResponseMode::Explanation,
            &[("concept", concept), ("context", context.as_str())],
        );
        generator.generate(&prompt)
    }

    /// Routes a free-form message by detected intent.
    pub fn chat(&self, input: &str) -> Result<String, TutorError> {
        match Intent::detect(input) {
            Intent::Quiz(topic) => self.generate_quiz(&topic, DEFAULT_QUIZ_QUESTIONS),
            Intent::Summarize(topic) => self.summarize(&topic),
            Intent::Explain(concept) => self.explain(&concept),
            Intent::Ask(question) => {
                let answer = self.answer(&question)?;
                Ok(format!(
                    "{}\n\nSources: Pages {:?}",
                    answer.text,
                    answer.source_pages()
                ))
            }
        }
    }
}

fn plain_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.chunk_text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
    use crate::error::{IndexError, IngestError};
    use crate::extractor::{PageText, PdfExtractor};
    use crate::models::PageRecord;
    use crate::stores::CHUNKS_FILE;
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    /// Echoes the prompt back so tests can inspect what was sent.
    #[derive(Default)]
    struct EchoGenerator {
        prompts: RefCell<Vec<String>>,
    }

    impl Generator for &EchoGenerator {
        fn generate(&self, prompt: &str) -> Result<String, TutorError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(format!("generated from {} chars", prompt.len()))
        }
    }

    fn records() -> Vec<PageRecord> {
        (1..=6)
            .map(|page| {
                PageRecord::new(
                    format!("book.pdf_page_{page}"),
                    format!("Page {page} discusses momentum, vectors and energy conservation."),
                    page + 10,
                )
            })
            .collect()
    }

    fn tutor<'g>(
        dir: &Path,
        generator: Option<&'g EchoGenerator>,
    ) -> Tutor<CharacterNgramEmbedder, &'g EchoGenerator> {
        let store = VectorStore::new(
            CharacterNgramEmbedder::default(),
            dir.join("index"),
            ChunkingConfig::default(),
        );
        Tutor::new(
            store,
            ExtractionDispatcher::default(),
            generator,
            PromptTemplates::default(),
        )
    }

    #[test]
    fn answer_annotates_pages_and_reports_sources() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let echo = EchoGenerator::default();
        let mut tutor = tutor(dir.path(), Some(&echo));
        tutor.store_mut().build(&records())?;

        let answer = tutor.answer("What is momentum?")?;

        assert_eq!(answer.sources.len(), 3);
        assert!(answer.source_pages().iter().all(|page| (11..=16).contains(page)));
        let prompts = echo.prompts.borrow();
        assert!(prompts[0].contains("[Page "));
        assert!(prompts[0].contains("\n\n---\n\n"));
        assert!(prompts[0].contains("Question: What is momentum?"));
        Ok(())
    }

    #[test]
    fn quiz_and_summary_use_five_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let echo = EchoGenerator::default();
        let mut tutor = tutor(dir.path(), Some(&echo));
        tutor.store_mut().build(&records())?;

        tutor.generate_quiz("vectors", 4)?;
        tutor.summarize("energy")?;
        tutor.explain("momentum")?;

        let prompts = echo.prompts.borrow();
        assert!(prompts[0].starts_with("Create 4 questions about vectors from: "));
        assert_eq!(prompts[0].matches("discusses").count(), 5);
        assert_eq!(prompts[1].matches("discusses").count(), 5);
        assert_eq!(prompts[2].matches("discusses").count(), 3);
        assert!(!prompts[2].contains("[Page "));
        Ok(())
    }

    #[test]
    fn chat_routes_by_intent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let echo = EchoGenerator::default();
        let mut tutor = tutor(dir.path(), Some(&echo));
        tutor.store_mut().build(&records())?;

        let reply = tutor.chat("What is energy conservation?")?;
        assert!(reply.contains("Sources: Pages ["));

        tutor.chat("Give me a quiz on vectors")?;
        let prompts = echo.prompts.borrow();
        assert!(prompts[1].starts_with("Create 5 questions about vectors"));
        Ok(())
    }

    #[test]
    fn missing_generator_is_configuration_missing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut tutor = tutor(dir.path(), None);
        tutor.store_mut().build(&records())?;

        assert!(matches!(
            tutor.answer("momentum"),
            Err(TutorError::ConfigurationMissing(_))
        ));
        assert_eq!(tutor.search("momentum", 2)?.len(), 2);
        Ok(())
    }

    #[test]
    fn answer_before_build_is_not_built() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let echo = EchoGenerator::default();
        let tutor = tutor(dir.path(), Some(&echo));

        assert!(matches!(
            tutor.answer("momentum"),
            Err(TutorError::Index(IndexError::NotBuilt))
        ));
        Ok(())
    }

    #[test]
    fn empty_folder_leaves_index_unchanged() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let books = dir.path().join("books");
        fs::create_dir(&books)?;
        fs::write(books.join("notes.txt"), "plain text is not a supported input")?;
        let mut tutor = tutor(dir.path(), None);

        let outcome = tutor.build_index_from_folder(&books)?;

        assert!(outcome.summary.is_none());
        assert!(outcome.report.no_supported_input());
        assert!(!tutor.store().is_built());
        Ok(())
    }

    struct SinglePdf;

    impl PdfExtractor for SinglePdf {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(vec![PageText {
                number: 1,
                text: "Friction opposes relative motion between surfaces.".to_string(),
            }])
        }
    }

    fn pdf_folder(dir: &Path) -> Result<PathBuf, std::io::Error> {
        let books = dir.join("books");
        fs::create_dir(&books)?;
        fs::write(books.join("mechanics.pdf"), b"%PDF-1.4")?;
        Ok(books)
    }

    fn reopen(
        dir: &Path,
        dimensions: usize,
    ) -> Tutor<CharacterNgramEmbedder, &'static EchoGenerator> {
        let store = VectorStore::new(
            CharacterNgramEmbedder { dimensions },
            dir.join("index"),
            ChunkingConfig::default(),
        );
        Tutor::open_or_fresh(
            store,
            ExtractionDispatcher::new(Some(Box::new(SinglePdf)), None, None),
            None,
            PromptTemplates::default(),
        )
    }

    #[test]
    fn rebuild_recovers_from_index_with_other_dimension() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        tutor(dir.path(), None).store_mut().build(&records())?;
        let books = pdf_folder(dir.path())?;

        let strict = VectorStore::new(
            CharacterNgramEmbedder { dimensions: 256 },
            dir.path().join("index"),
            ChunkingConfig::default(),
        );
        assert!(matches!(
            Tutor::<_, &EchoGenerator>::open(
                strict,
                ExtractionDispatcher::default(),
                None,
                PromptTemplates::default()
            ),
            Err(TutorError::Index(IndexError::DimensionMismatch { expected: 256, actual: 384 }))
        ));

        let mut tutor = reopen(dir.path(), 256);
        assert!(!tutor.store().is_built());
        let outcome = tutor.build_index_from_folder(&books)?;
        assert_eq!(outcome.summary.map(|summary| summary.chunk_count), Some(1));

        let mut reloaded = reopen(dir.path(), 256);
        assert!(reloaded.store_mut().load()?);
        assert_eq!(reloaded.store().metadata()[0].source_name, "mechanics.pdf_page_1");
        Ok(())
    }

    #[test]
    fn mixed_build_files_can_be_rebuilt_or_removed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let other = tempdir()?;
        tutor(dir.path(), None).store_mut().build(&records())?;
        tutor(other.path(), None).store_mut().build(&records())?;
        fs::copy(
            other.path().join("index").join(CHUNKS_FILE),
            dir.path().join("index").join(CHUNKS_FILE),
        )?;

        let mut corrupt = tutor(dir.path(), None);
        assert!(matches!(
            corrupt.store_mut().load(),
            Err(IndexError::Corrupt { .. })
        ));

        let books = pdf_folder(dir.path())?;
        let mut tutor = reopen(dir.path(), DEFAULT_EMBEDDING_DIMENSIONS);
        assert!(tutor.build_index_from_folder(&books)?.summary.is_some());
        assert!(reopen(dir.path(), DEFAULT_EMBEDDING_DIMENSIONS).store().is_built());

        fs::copy(
            other.path().join("index").join(CHUNKS_FILE),
            dir.path().join("index").join(CHUNKS_FILE),
        )?;
        let mut tutor = reopen(dir.path(), DEFAULT_EMBEDDING_DIMENSIONS);
        tutor.store_mut().remove_persisted()?;
        assert!(!tutor.store().storage_info().index_files_present);
        Ok(())
    }

    #[test]
    fn open_loads_existing_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        tutor(dir.path(), None).store_mut().build(&records())?;

        let store = VectorStore::new(
            CharacterNgramEmbedder::default(),
            dir.path().join("index"),
            ChunkingConfig::default(),
        );
        let reopened: Tutor<_, &EchoGenerator> = Tutor::open(
            store,
            ExtractionDispatcher::default(),
            None,
            PromptTemplates::default(),
        )?;

        assert_eq!(reopened.store().len(), 6);
        Ok(())
    }
}
