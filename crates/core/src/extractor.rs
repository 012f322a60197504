use crate::error::IngestError;
use crate::models::PageRecord;
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

pub const PAGE_MAPPING_FILE: &str = "page_mapping.json";

/// Text of one PDF page, numbered by its 1-based position in the document.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let pages = document.get_pages();
        let total = pages.len();
        let mut extracted = Vec::with_capacity(total);

        for (sequence, (page_no, _page_id)) in pages.into_iter().enumerate() {
            let number = sequence as u32 + 1;
            match document.extract_text(&[page_no]) {
                Ok(text) => extracted.push(PageText { number, text }),
                Err(error) => warn!(
                    path = %path.display(),
                    page = number,
                    %error,
                    "skipping unreadable pdf page"
                ),
            }
            debug!(path = %path.display(), page = number, total, "pdf page processed");
        }

        Ok(extracted)
    }
}

/// Optional translation from sequential page index to printed page number,
/// read from `page_mapping.json` as `{"page_<index>": <number>}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMapping {
    entries: HashMap<String, u32>,
}

impl PageMapping {
    pub fn new(entries: HashMap<String, u32>) -> Self {
        Self { entries }
    }

    /// A missing file yields an empty mapping; an unreadable one is logged
    /// and ignored.
    pub fn load(folder: &Path) -> Self {
        let path = folder.join(PAGE_MAPPING_FILE);
        if !path.is_file() {
            return Self::default();
        }

        let parsed = fs::read_to_string(&path)
            .map_err(IngestError::from)
            .and_then(|raw| serde_json::from_str::<HashMap<String, u32>>(&raw).map_err(IngestError::from));

        match parsed {
            Ok(entries) => {
                info!(path = %path.display(), pages = entries.len(), "loaded page mapping");
                Self { entries }
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "could not load page mapping");
                Self::default()
            }
        }
    }

    pub fn resolve(&self, sequence: u32) -> u32 {
        self.entries
            .get(&format!("page_{sequence}"))
            .copied()
            .unwrap_or(sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extracts one PDF into page records, dropping blank pages.
pub fn extract_pdf_records(
    extractor: &dyn PdfExtractor,
    path: &Path,
    mapping: &PageMapping,
) -> Result<Vec<PageRecord>, IngestError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    let records = extractor
        .extract_pages(path)?
        .into_iter()
        .filter_map(|page| {
            let text = page.text.trim();
            if text.is_empty() {
                debug!(file = file_name, page = page.number, "empty pdf page");
                return None;
            }
            Some(PageRecord {
                source_name: format!("{file_name}_page_{}", page.number),
                text: text.to_string(),
                page_number: mapping.resolve(page.number),
            })
        })
        .collect();

    Ok(records)
}
