use crate::config::{EndpointConfig, OcrRetryPolicy};
use crate::error::{IngestError, TutorError};
use crate::models::{BatchStatus, PageRecord, SkippedSource};
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub const PROGRESS_FILE: &str = ".ocr_progress.json";
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

const OCR_PROMPT: &str = "Extract ALL text from this image exactly as it appears. \
Include headings, paragraphs, equations, tables, and any other text. \
Maintain the original structure and formatting as much as possible. \
If there are diagrams, briefly describe them in [brackets].";

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Recognizes the text of a single page image. Quota exhaustion must be
/// reported as `IngestError::RateLimited` so callers can back off.
pub trait ImageOcr {
    fn recognize(&self, path: &Path) -> Result<String, IngestError>;
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest<'a> {
    image_base64: String,
    mime_type: &'a str,
    source_path: String,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Option<Vec<OcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Vision OCR over HTTP: posts the base64 image and reads back text.
pub struct RemoteOcrClient {
    client: Client,
    config: EndpointConfig,
}

impl RemoteOcrClient {
    pub fn new(config: EndpointConfig) -> Result<Self, TutorError> {
        config.url()?;
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self { client, config })
    }
}

impl ImageOcr for RemoteOcrClient {
    fn recognize(&self, path: &Path) -> Result<String, IngestError> {
        let image = fs::read(path)?;
        let payload = OcrRequest {
            image_base64: STANDARD.encode(image),
            mime_type: mime_type(path),
            source_path: path.to_string_lossy().to_string(),
            prompt: OCR_PROMPT,
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(failure_for_status(&self.config.endpoint, status, &body));
        }

        let payload: OcrResponse = response.json()?;
        payload_text(&payload).ok_or_else(|| {
            IngestError::OcrFailed(format!("OCR response was empty for {}", path.display()))
        })
    }
}

/// Quota exhaustion (HTTP 429 or a body mentioning the quota) becomes
/// `RateLimited`; every other failure is `OcrFailed`.
fn failure_for_status(endpoint: &str, status: StatusCode, body: &str) -> IngestError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("quota") {
        return IngestError::RateLimited {
            attempts: 1,
            details: format!("{status}"),
        };
    }
    IngestError::OcrFailed(format!("OCR request to {endpoint} returned {status}"))
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn payload_text(payload: &OcrResponse) -> Option<String> {
    if let Some(listed) = &payload.pages {
        let joined = listed
            .iter()
            .filter_map(|page| page.text.as_deref().map(str::trim))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if !joined.is_empty() {
            return Some(joined);
        }
    }

    payload
        .text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Local OCR through the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub command: PathBuf,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
        }
    }
}

impl TesseractOcr {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// True when the command runs and reports a version.
    pub fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

impl ImageOcr for TesseractOcr {
    fn recognize(&self, path: &Path) -> Result<String, IngestError> {
        let output = Command::new(&self.command)
            .arg(path)
            .arg("stdout")
            .args(["-l", "eng", "--oem", "3", "--psm", "6"])
            .output()?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "tesseract exited with {} for {}: {}",
                output.status,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct OcrBatchOutput {
    pub records: Vec<PageRecord>,
    pub skipped: Vec<SkippedSource>,
    pub status: BatchStatus,
}

fn file_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// OCRs `images` (already sorted) one by one. Each image becomes one
/// record numbered by its 1-based position; failures are skipped.
pub fn recognize_images(ocr: &dyn ImageOcr, images: &[PathBuf]) -> OcrBatchOutput {
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for (index, path) in images.iter().enumerate() {
        let page_number = index as u32 + 1;
        info!(file = %path.display(), page = page_number, total = images.len(), "ocr page");

        let outcome = file_name(path).and_then(|name| Ok((name, ocr.recognize(path)?)));
        match outcome {
            Ok((name, text)) if !text.trim().is_empty() => {
                records.push(PageRecord::new(name, text, page_number));
            }
            Ok(_) => warn!(file = %path.display(), "no text extracted"),
            Err(error) => {
                warn!(file = %path.display(), %error, "skipping image");
                skipped.push(SkippedSource {
                    path: path.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    OcrBatchOutput {
        records,
        skipped,
        status: BatchStatus::Complete,
    }
}

/// Persisted partial results of a remote OCR batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrProgress {
    pub results_so_far: Vec<PageRecord>,
    pub processed_filenames: BTreeSet<String>,
}

impl OcrProgress {
    pub fn path(folder: &Path) -> PathBuf {
        folder.join(PROGRESS_FILE)
    }

    pub fn load(folder: &Path) -> Result<Option<Self>, IngestError> {
        let path = Self::path(folder);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Writes through a temporary file and renames it over the marker so an
    /// interruption never leaves a truncated marker behind.
    pub fn save(&self, folder: &Path) -> Result<(), IngestError> {
        let path = Self::path(folder);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(self)?)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    pub fn remove(folder: &Path) -> Result<(), IngestError> {
        let path = Self::path(folder);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Remote OCR batch with rate-limit backoff and resumable progress.
pub struct CheckpointedOcrBatch<'a> {
    ocr: &'a dyn ImageOcr,
    policy: OcrRetryPolicy,
    resume: bool,
}

impl<'a> CheckpointedOcrBatch<'a> {
    pub fn new(ocr: &'a dyn ImageOcr, policy: OcrRetryPolicy) -> Self {
        Self {
            ocr,
            policy,
            resume: true,
        }
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn run(&self, folder: &Path, images: &[PathBuf]) -> Result<OcrBatchOutput, IngestError> {
        let mut progress = if self.resume {
            match OcrProgress::load(folder) {
                Ok(Some(progress)) => {
                    info!(
                        already_done = progress.processed_filenames.len(),
                        "resuming previous OCR session"
                    );
                    progress
                }
                Ok(None) => OcrProgress::default(),
                Err(error) => {
                    warn!(%error, "could not load OCR progress, starting fresh");
                    OcrProgress::default()
                }
            }
        } else {
            OcrProgress::default()
        };

        let mut remaining = Vec::new();
        for (index, path) in images.iter().enumerate() {
            let name = file_name(path)?;
            if !progress.processed_filenames.contains(&name) {
                remaining.push((index as u32 + 1, name, path));
            }
        }

        let mut skipped = Vec::new();
        info!(
            remaining = remaining.len(),
            total = images.len(),
            "remote OCR batch"
        );

        for (position, (page_number, name, path)) in remaining.iter().enumerate() {
            info!(file = %name, page = page_number, "ocr page");

            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.ocr.recognize(path) {
                    Ok(text) if !text.trim().is_empty() => {
                        progress
                            .results_so_far
                            .push(PageRecord::new(name.clone(), text, *page_number));
                        progress.processed_filenames.insert(name.clone());
                        progress.save(folder)?;
                        break;
                    }
                    Ok(_) => {
                        warn!(file = %name, "no text extracted");
                        break;
                    }
                    Err(IngestError::RateLimited { details, .. }) => {
                        if attempt >= self.policy.max_attempts {
                            warn!(
                                file = %name,
                                attempts = attempt,
                                "rate limited, halting batch; progress saved for resume"
                            );
                            let reason = IngestError::RateLimited {
                                attempts: attempt,
                                details,
                            }
                            .to_string();
                            return Ok(OcrBatchOutput {
                                records: progress.results_so_far,
                                skipped,
                                status: BatchStatus::Interrupted {
                                    reason,
                                    remaining: remaining.len() - position,
                                },
                            });
                        }
                        let wait = self.policy.backoff(attempt);
                        warn!(file = %name, attempt, wait_ms = wait.as_millis() as u64, "rate limited, backing off");
                        thread::sleep(wait);
                    }
                    Err(error) => {
                        warn!(file = %name, %error, "skipping image");
                        skipped.push(SkippedSource {
                            path: (*path).clone(),
                            reason: error.to_string(),
                        });
                        break;
                    }
                }
            }

            if position + 1 < remaining.len() && !self.policy.request_delay.is_zero() {
                thread::sleep(self.policy.request_delay);
            }
        }

        OcrProgress::remove(folder)?;
        info!(
            extracted = progress.results_so_far.len(),
            total = images.len(),
            "remote OCR batch complete"
        );

        Ok(OcrBatchOutput {
            records: progress.results_so_far,
            skipped,
            status: BatchStatus::Complete,
        })
    }
}
