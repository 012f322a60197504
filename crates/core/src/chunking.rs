use crate::error::IndexError;
use crate::models::{ChunkMetadata, PageRecord};

pub const DEFAULT_CHUNK_WORDS: usize = 500;
pub const DEFAULT_OVERLAP_WORDS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub size_words: usize,
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size_words: DEFAULT_CHUNK_WORDS,
            overlap_words: DEFAULT_OVERLAP_WORDS,
        }
    }
}

impl ChunkingConfig {
    pub fn new(size_words: usize, overlap_words: usize) -> Result<Self, IndexError> {
        let config = Self {
            size_words,
            overlap_words,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.size_words == 0 {
            return Err(IndexError::InvalidChunkConfig(
                "chunk size must be at least one word".to_string(),
            ));
        }
        if self.overlap_words >= self.size_words {
            return Err(IndexError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_words, self.size_words
            )));
        }
        Ok(())
    }

    /// Distance in words between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.size_words - self.overlap_words
    }
}

/// Splits `text` into word windows of `size_words`, a new window starting
/// every `stride()` words. Windows never split a word.
pub fn chunk_words(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IndexError> {
    config.validate()?;

    let words = text.split_whitespace().collect::<Vec<_>>();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + config.size_words).min(words.len());
        let chunk = words[start..end].join(" ");
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        start += config.stride();
    }

    Ok(chunks)
}

/// Chunks every non-blank record, pairing each chunk with its metadata.
/// The two returned sequences are index aligned.
pub fn chunk_records(
    records: &[PageRecord],
    config: ChunkingConfig,
) -> Result<(Vec<String>, Vec<ChunkMetadata>), IndexError> {
    config.validate()?;

    let mut chunks = Vec::new();
    let mut metadata = Vec::new();

    for record in records.iter().filter(|record| !record.is_blank()) {
        for (position, chunk) in chunk_words(&record.text, config)?.into_iter().enumerate() {
            chunks.push(chunk);
            metadata.push(ChunkMetadata {
                source_name: record.source_name.clone(),
                page_number: record.page_number,
                chunk_id: position as u32,
            });
        }
    }

    Ok((chunks, metadata))
}
