//! Document extraction pipeline: file → model text → field map.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ExtractionProfile, OutputMode};
use crate::document::DocumentKind;
use crate::error::{ExtractError, Result};
use crate::normalize::{self, NumericFields};
use crate::pdf;
use crate::schema::ExtractionOutcome;
use crate::vision::{ImageInput, VisionClient};

/// Extraction pipeline orchestrator.
///
/// Every public entry point returns an [`ExtractionOutcome`]; errors are
/// logged and folded into the `{"error": ...}` shape here and nowhere else.
pub struct Extractor {
    client: Arc<dyn VisionClient>,
    profile: ExtractionProfile,
    numeric: NumericFields,
}

impl Extractor {
    pub fn new(client: Arc<dyn VisionClient>, profile: ExtractionProfile) -> Self {
        let numeric = profile.numeric_fields();
        if numeric.is_empty() {
            debug!("Profile {} has no numeric fields, values stay strings", profile.name);
        }
        Self {
            client,
            profile,
            numeric,
        }
    }

    /// Extract fields from a file on disk.
    pub async fn extract_path(&self, path: &Path) -> ExtractionOutcome {
        let kind = match DocumentKind::from_path(path) {
            Ok(kind) => kind,
            Err(e) => return self.fail(path.display(), e.to_string()),
        };

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => return self.fail(path.display(), format!("Error reading file: {}", e)),
        };

        self.run(&path.display().to_string(), kind, &data).await
    }

    /// Extract fields from an in-memory upload. `filename` only drives
    /// extension dispatch and logging.
    pub async fn extract_bytes(&self, filename: &str, data: &[u8]) -> ExtractionOutcome {
        match DocumentKind::from_path(filename) {
            Ok(kind) => self.run(filename, kind, data).await,
            Err(e) => self.fail(filename, e.to_string()),
        }
    }

    async fn run(&self, source: &str, kind: DocumentKind, data: &[u8]) -> ExtractionOutcome {
        info!(
            "Starting extraction for: {} ({:?}, {} bytes) using profile: {}, model: {}/{}",
            source,
            kind,
            data.len(),
            self.profile.name,
            self.client.name(),
            self.client.model()
        );

        let raw = if kind.is_image() {
            self.process_image(kind, data)
                .await
                .map_err(|e| format!("Error processing image: {}", e))
        } else {
            self.process_pdf(data)
                .await
                .map_err(|e| format!("Error processing PDF: {}", e))
        };

        let outcome = match raw {
            Ok(text) => self.finish(&text),
            Err(message) => ExtractionOutcome::error(message),
        };

        match &outcome {
            ExtractionOutcome::Error { error: message } => {
                error!("Extraction failed for {}: {}", source, message)
            }
            ExtractionOutcome::Fields(fields) => {
                info!("Extraction complete for {}: {} fields", source, fields.len())
            }
            ExtractionOutcome::Text { text } => {
                info!("Extraction complete for {}: {} chars of text", source, text.len())
            }
        }
        outcome
    }

    fn fail(&self, source: impl std::fmt::Display, message: String) -> ExtractionOutcome {
        error!("Extraction failed for {}: {}", source, message);
        ExtractionOutcome::error(message)
    }

    /// Send an image file to the model.
    async fn process_image(&self, kind: DocumentKind, data: &[u8]) -> Result<String> {
        let image = match kind {
            // Vision endpoints accept PNG and JPEG; BMP is converted first.
            DocumentKind::Bmp => ImageInput::png(pdf::to_png(data)?),
            _ => ImageInput {
                mime_type: kind.mime_type(),
                data: data.to_vec(),
            },
        };

        self.client
            .generate(&self.profile.prompts.image, &[image])
            .await
    }

    /// Direct text extraction first, page images through the model second.
    async fn process_pdf(&self, data: &[u8]) -> Result<String> {
        let text = pdf::extract_text(data)?;

        if !text.trim().is_empty() {
            debug!("Extracted {} chars of PDF text", text.len());
            return match self.profile.output {
                OutputMode::Text => Ok(text),
                OutputMode::Fields => {
                    let prompt = self.profile.text_prompt(text.trim());
                    self.client.generate(&prompt, &[]).await
                }
            };
        }

        warn!("PDF has no text layer, falling back to vision model on page images");
        let images: Vec<ImageInput> = pdf::extract_page_images(data, self.profile.max_pdf_pages)?
            .into_iter()
            .map(ImageInput::png)
            .collect();
        debug!("Sending {} page image(s) to the model", images.len());

        self.client
            .generate(&self.profile.prompts.image, &images)
            .await
    }

    /// Shape raw text according to the profile's output mode.
    fn finish(&self, raw: &str) -> ExtractionOutcome {
        debug!("Raw response length: {} chars", raw.len());
        match self.profile.output {
            OutputMode::Text => ExtractionOutcome::text(raw),
            OutputMode::Fields => match normalize::normalize_response(raw, &self.numeric) {
                Ok(fields) => ExtractionOutcome::Fields(fields),
                Err(e @ ExtractError::Unparseable) => ExtractionOutcome::error(e.to_string()),
                Err(e) => ExtractionOutcome::error(format!("Error parsing response: {}", e)),
            },
        }
    }
}
