use crate::chunking::{chunk_records, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{BuildSummary, ChunkMetadata, PageRecord, SearchHit, StorageInfo};
use crate::stores::{FlatL2Index, IndexFiles, PersistedIndex};
use crate::traits::VectorIndex;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The embedding index: vectors, chunk texts and chunk metadata kept as
/// three index-aligned collections, mirrored on disk under one directory.
///
/// `state` is `None` until a build or a successful load; every mutating
/// operation takes `&mut self`, so a search can never observe a half
/// replaced index.
pub struct VectorStore<E: Embedder> {
    embedder: E,
    files: IndexFiles,
    chunking: ChunkingConfig,
    state: Option<PersistedIndex>,
}

impl<E: Embedder> VectorStore<E> {
    pub fn new(embedder: E, index_dir: impl AsRef<Path>, chunking: ChunkingConfig) -> Self {
        Self {
            embedder,
            files: IndexFiles::new(index_dir.as_ref()),
            chunking,
            state: None,
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn index_dir(&self) -> &Path {
        self.files.dir()
    }

    pub fn is_built(&self) -> bool {
        self.state.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.chunks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunks(&self) -> &[String] {
        self.state
            .as_ref()
            .map_or(&[][..], |state| state.chunks.as_slice())
    }

    pub fn metadata(&self) -> &[ChunkMetadata] {
        self.state
            .as_ref()
            .map_or(&[][..], |state| state.metadata.as_slice())
    }

    /// Replaces the whole index with the chunks of `records`, then persists it.
    pub fn build(&mut self, records: &[PageRecord]) -> Result<BuildSummary, IndexError> {
        let (chunks, metadata) = chunk_records(records, self.chunking)?;
        info!(records = records.len(), chunks = chunks.len(), "created text chunks");

        let dimension = self.embedder.dimensions();
        let mut embeddings = Vec::with_capacity(chunks.len());
        for (position, chunk) in chunks.iter().enumerate() {
            embeddings.push(self.embedder.embed(chunk)?);
            debug!(chunk = position + 1, total = chunks.len(), "embedded chunk");
        }

        let mut vectors = FlatL2Index::new(dimension);
        vectors.add(&embeddings)?;

        let next = PersistedIndex {
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            vectors,
            chunks,
            metadata,
        };
        let summary = BuildSummary {
            build_id: next.build_id.to_string(),
            chunk_count: next.chunks.len(),
            record_count: records.len(),
            built_at: next.built_at,
        };

        self.state = Some(next);
        info!(chunks = summary.chunk_count, build_id = %summary.build_id, "index built");

        self.persist()?;
        Ok(summary)
    }

    /// Closest `top_k` chunks to `query` by squared L2 distance.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let state = self.state.as_ref().ok_or(IndexError::NotBuilt)?;
        if top_k == 0 {
            return Err(IndexError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        if state.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query)?;
        let hits = state.vectors.search(&query_vector, top_k)?;

        Ok(hits
            .into_iter()
            .map(|(position, distance)| SearchHit {
                chunk_text: state.chunks[position].clone(),
                metadata: state.metadata[position].clone(),
                distance,
            })
            .collect())
    }

    pub fn persist(&self) -> Result<(), IndexError> {
        let state = self.state.as_ref().ok_or(IndexError::NotBuilt)?;
        self.files.write(state)?;
        info!(dir = %self.files.dir().display(), chunks = state.chunks.len(), "index saved");
        Ok(())
    }

    /// `Ok(false)` leaves the store empty when any index file is missing.
    pub fn load(&mut self) -> Result<bool, IndexError> {
        self.state = None;

        let Some(loaded) = self.files.read()? else {
            warn!(dir = %self.files.dir().display(), "index not found");
            return Ok(false);
        };

        if loaded.vectors.dimension() != self.embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: loaded.vectors.dimension(),
            });
        }

        info!(
            dir = %self.files.dir().display(),
            chunks = loaded.chunks.len(),
            built_at = %loaded.built_at.to_rfc3339(),
            "loaded index"
        );
        self.state = Some(loaded);
        Ok(true)
    }

    /// Empties memory only; files on disk are untouched.
    pub fn clear(&mut self) {
        self.state = None;
    }

    /// Deletes the persisted files and clears memory.
    pub fn remove_persisted(&mut self) -> Result<(), IndexError> {
        self.clear();
        self.files.remove()
    }

    pub fn storage_info(&self) -> StorageInfo {
        StorageInfo {
            num_chunks: self.len(),
            has_index: self.len() > 0,
            index_files_present: self.files.all_present(),
            index_size_bytes: self.files.size_on_disk(),
            built_at: self.state.as_ref().map(|state| state.built_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use std::fs;
    use tempfile::tempdir;

    const NEWTON: &str = "Newton's first law states an object in motion stays in motion unless acted upon by a force.";

    fn store(dir: &Path) -> VectorStore<CharacterNgramEmbedder> {
        VectorStore::new(
            CharacterNgramEmbedder::default(),
            dir,
            ChunkingConfig::default(),
        )
    }

    fn textbook() -> Vec<PageRecord> {
        vec![
            PageRecord::new("physics.pdf_page_1", NEWTON, 1),
            PageRecord::new(
                "physics.pdf_page_2",
                "Photosynthesis converts light energy into chemical energy in plants.",
                2,
            ),
            PageRecord::new(
                "physics.pdf_page_3",
                "Ohm's law relates voltage, current and resistance in a circuit.",
                3,
            ),
        ]
    }

    #[test]
    fn single_page_round_trip_finds_newton() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = store(dir.path());
        store.build(&[PageRecord::new("notes.png", NEWTON, 1)])?;

        let hits = store.search("Newton's first law", 1)?;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.page_number, 1);
        assert!(hits[0].chunk_text.contains("Newton's first law"));
        Ok(())
    }

    #[test]
    fn search_before_build_is_not_built() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = store(dir.path());

        assert!(matches!(store.search("anything", 3), Err(IndexError::NotBuilt)));
        assert!(matches!(store.persist(), Err(IndexError::NotBuilt)));
        Ok(())
    }

    #[test]
    fn top_k_beyond_size_returns_all_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = store(dir.path());
        store.build(&textbook())?;

        let hits = store.search("voltage and resistance", 10)?;

        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        assert_eq!(hits[0].metadata.page_number, 3);
        Ok(())
    }

    #[test]
    fn persisted_index_reloads_with_identical_results() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let mut original = store(dir.path());
        original.build(&textbook())?;

        let mut reloaded = store(dir.path());
        assert!(reloaded.load()?);

        for query in ["motion and force", "plants", "circuit current", ""] {
            assert_eq!(original.search(query, 3)?, reloaded.search(query, 3)?);
        }
        assert_eq!(reloaded.metadata(), original.metadata());
        Ok(())
    }

    #[test]
    fn load_without_files_reports_false() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut built = store(dir.path());
        built.build(&textbook())?;
        fs::remove_file(dir.path().join(crate::stores::CHUNKS_FILE))?;

        let mut fresh = store(dir.path());
        assert!(!fresh.load()?);
        assert!(!fresh.is_built());
        assert!(matches!(fresh.search("plants", 1), Err(IndexError::NotBuilt)));
        Ok(())
    }

    #[test]
    fn load_rejects_other_dimensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        store(dir.path()).build(&textbook())?;

        let mut narrow = VectorStore::new(
            CharacterNgramEmbedder { dimensions: 64 },
            dir.path(),
            ChunkingConfig::default(),
        );
        assert!(matches!(
            narrow.load(),
            Err(IndexError::DimensionMismatch { expected: 64, actual: 384 })
        ));
        Ok(())
    }

    #[test]
    fn build_replaces_previous_contents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = store(dir.path());
        store.build(&textbook())?;
        store.build(&[PageRecord::new("single.png", NEWTON, 9)])?;

        assert_eq!(store.len(), 1);
        let hits = store.search("plants", 5)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.page_number, 9);
        Ok(())
    }

    #[test]
    fn clear_empties_memory_but_keeps_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = store(dir.path());
        store.build(&textbook())?;

        store.clear();

        assert!(matches!(store.search("plants", 1), Err(IndexError::NotBuilt)));
        assert!(store.storage_info().index_files_present);
        assert!(store.load()?);
        Ok(())
    }

    #[test]
    fn remove_persisted_wipes_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = store(dir.path());
        store.build(&textbook())?;

        store.remove_persisted()?;

        let info = store.storage_info();
        assert_eq!(info.num_chunks, 0);
        assert!(!info.index_files_present);
        assert!(!store.load()?);
        Ok(())
    }

    #[test]
    fn repeated_searches_are_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut store = store(dir.path());
        store.build(&textbook())?;

        let first = store.search("energy", 2)?;
        let second = store.search("energy", 2)?;
        assert_eq!(first, second);
        Ok(())
    }
}
