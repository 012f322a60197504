use crate::config::OcrRetryPolicy;
use crate::error::IngestError;
use crate::extractor::{extract_pdf_records, LopdfExtractor, PageMapping, PdfExtractor};
use crate::models::{BatchStatus, ExtractionReport, ExtractionStrategy, SkippedSource};
use crate::ocr::{is_image, recognize_images, CheckpointedOcrBatch, ImageOcr};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Top-level input files of a folder, each list sorted by file name.
#[derive(Debug, Clone, Default)]
pub struct FolderListing {
    pub pdfs: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
    pub documents: usize,
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn list_folder(folder: &Path) -> Result<FolderListing, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "not a folder: {}",
            folder.display()
        )));
    }

    let mut listing = FolderListing::default();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        listing.documents += 1;
        let path = entry.path();
        if is_pdf(path) {
            listing.pdfs.push(path.to_path_buf());
        } else if is_image(path) {
            listing.images.push(path.to_path_buf());
        }
    }

    Ok(listing)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Availability {
    pub pdf: bool,
    pub remote_ocr: bool,
    pub local_ocr: bool,
}

/// First match wins: PDFs, then images (remote OCR preferred over local),
/// otherwise nothing.
pub fn select_strategy(
    listing: &FolderListing,
    available: Availability,
) -> Option<ExtractionStrategy> {
    if !listing.pdfs.is_empty() && available.pdf {
        return Some(ExtractionStrategy::Pdf);
    }

    if !listing.images.is_empty() {
        if available.remote_ocr {
            return Some(ExtractionStrategy::RemoteOcr);
        }
        if available.local_ocr {
            return Some(ExtractionStrategy::LocalOcr);
        }
    }

    None
}

pub struct ExtractionDispatcher {
    pdf: Option<Box<dyn PdfExtractor>>,
    remote_ocr: Option<Box<dyn ImageOcr>>,
    local_ocr: Option<Box<dyn ImageOcr>>,
    retry: OcrRetryPolicy,
    resume: bool,
}

impl Default for ExtractionDispatcher {
    fn default() -> Self {
        Self {
            pdf: Some(Box::new(LopdfExtractor)),
            remote_ocr: None,
            local_ocr: None,
            retry: OcrRetryPolicy::default(),
            resume: true,
        }
    }
}

impl ExtractionDispatcher {
    pub fn new(
        pdf: Option<Box<dyn PdfExtractor>>,
        remote_ocr: Option<Box<dyn ImageOcr>>,
        local_ocr: Option<Box<dyn ImageOcr>>,
    ) -> Self {
        Self {
            pdf,
            remote_ocr,
            local_ocr,
            ..Self::default()
        }
    }

    pub fn with_remote_ocr(mut self, ocr: Box<dyn ImageOcr>) -> Self {
        self.remote_ocr = Some(ocr);
        self
    }

    pub fn with_local_ocr(mut self, ocr: Box<dyn ImageOcr>) -> Self {
        self.local_ocr = Some(ocr);
        self
    }

    pub fn with_retry_policy(mut self, retry: OcrRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn availability(&self) -> Availability {
        Availability {
            pdf: self.pdf.is_some(),
            remote_ocr: self.remote_ocr.is_some(),
            local_ocr: self.local_ocr.is_some(),
        }
    }

    pub fn select_and_extract(&self, folder: &Path) -> Result<ExtractionReport, IngestError> {
        let listing = list_folder(folder)?;
        let strategy = select_strategy(&listing, self.availability());

        let report = match (strategy, &self.pdf, &self.remote_ocr, &self.local_ocr) {
            (Some(ExtractionStrategy::Pdf), Some(pdf), _, _) => {
                info!(files = listing.pdfs.len(), "using pdf text extraction");
                extract_pdfs(pdf.as_ref(), folder, &listing.pdfs)
            }
            (Some(ExtractionStrategy::RemoteOcr), _, Some(ocr), _) => {
                info!(files = listing.images.len(), "using remote OCR");
                let output = CheckpointedOcrBatch::new(ocr.as_ref(), self.retry)
                    .with_resume(self.resume)
                    .run(folder, &listing.images)?;
                ExtractionReport {
                    strategy,
                    records: output.records,
                    skipped: output.skipped,
                    status: output.status,
                }
            }
            (Some(ExtractionStrategy::LocalOcr), _, _, Some(ocr)) => {
                info!(files = listing.images.len(), "using local OCR");
                let output = recognize_images(ocr.as_ref(), &listing.images);
                ExtractionReport {
                    strategy,
                    records: output.records,
                    skipped: output.skipped,
                    status: output.status,
                }
            }
            _ => {
                warn!(folder = %folder.display(), "no supported input found");
                ExtractionReport::empty()
            }
        };

        info!(
            strategy = report.strategy.map(|value| value.label()).unwrap_or("none"),
            records = report.records.len(),
            skipped = report.skipped.len(),
            "extraction finished"
        );

        Ok(report)
    }
}

fn extract_pdfs(extractor: &dyn PdfExtractor, folder: &Path, files: &[PathBuf]) -> ExtractionReport {
    let mapping = PageMapping::load(folder);
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for (index, path) in files.iter().enumerate() {
        info!(file = %path.display(), position = index + 1, total = files.len(), "extracting pdf");
        match extract_pdf_records(extractor, path, &mapping) {
            Ok(pages) => {
                info!(file = %path.display(), pages = pages.len(), "pdf extracted");
                records.extend(pages);
            }
            Err(error) => {
                warn!(file = %path.display(), %error, "skipping pdf");
                skipped.push(SkippedSource {
                    path: path.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    ExtractionReport {
        strategy: Some(ExtractionStrategy::Pdf),
        records,
        skipped,
        status: BatchStatus::Complete,
    }
}
