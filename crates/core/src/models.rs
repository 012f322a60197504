use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One extracted page or image, as produced by an extraction strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRecord {
    pub source_name: String,
    pub text: String,
    pub page_number: u32,
}

impl PageRecord {
    pub fn new(source_name: impl Into<String>, text: impl Into<String>, page_number: u32) -> Self {
        Self {
            source_name: source_name.into(),
            text: text.into(),
            page_number,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkMetadata {
    pub source_name: String,
    pub page_number: u32,
    /// Position of the chunk within its page's chunk sequence.
    pub chunk_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub chunk_text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExtractionStrategy {
    Pdf,
    RemoteOcr,
    LocalOcr,
}

impl ExtractionStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionStrategy::Pdf => "pdf",
            ExtractionStrategy::RemoteOcr => "remote-ocr",
            ExtractionStrategy::LocalOcr => "local-ocr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Complete,
    /// Halted early; the progress marker holds everything extracted so far.
    Interrupted { reason: String, remaining: usize },
}

#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub strategy: Option<ExtractionStrategy>,
    pub records: Vec<PageRecord>,
    pub skipped: Vec<SkippedSource>,
    pub status: BatchStatus,
}

impl ExtractionReport {
    pub fn empty() -> Self {
        Self {
            strategy: None,
            records: Vec::new(),
            skipped: Vec::new(),
            status: BatchStatus::Complete,
        }
    }

    pub fn no_supported_input(&self) -> bool {
        self.strategy.is_none()
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self.status, BatchStatus::Interrupted { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub build_id: String,
    pub chunk_count: usize,
    pub record_count: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    pub num_chunks: usize,
    pub has_index: bool,
    pub index_files_present: bool,
    pub index_size_bytes: u64,
    pub built_at: Option<DateTime<Utc>>,
}
