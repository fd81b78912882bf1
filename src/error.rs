//! Error types for the extraction pipeline.

use thiserror::Error;

/// Result alias used by the pipeline modules.
pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// Extension is not one of the supported image or PDF types.
    #[error("Unsupported file format. Please provide a .pdf, .png, .jpg, .jpeg, or .bmp file.")]
    UnsupportedFormat,

    /// lopdf could not load or read the document.
    #[error("Failed to read PDF: {reason}")]
    PdfRead { reason: String },

    #[error("No pages found in PDF.")]
    EmptyPdf,

    /// Fallback found no embedded page image to send to the model.
    #[error("No page images found in PDF.")]
    NoPageImages,

    #[error("Image processing failed: {reason}")]
    Image { reason: String },

    #[error("Vision model request failed: {0}")]
    ModelRequest(#[from] reqwest::Error),

    #[error("Vision model error ({status}): {body}")]
    ModelStatus { status: u16, body: String },

    #[error("Vision model returned an unexpected response: {reason}")]
    ModelResponse { reason: String },

    /// Neither JSON nor key:value lines could be recovered from the reply.
    #[error("Unable to parse key-value pairs from response.")]
    Unparseable,
}

impl From<lopdf::Error> for ExtractError {
    fn from(e: lopdf::Error) -> Self {
        ExtractError::PdfRead {
            reason: e.to_string(),
        }
    }
}

impl From<image::ImageError> for ExtractError {
    fn from(e: image::ImageError) -> Self {
        ExtractError::Image {
            reason: e.to_string(),
        }
    }
}
