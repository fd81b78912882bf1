//! File-type dispatch by extension.

use std::path::Path;

use tracing::debug;

use crate::error::{ExtractError, Result};

/// Kind of input document, decided purely from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Png,
    Jpeg,
    Bmp,
    Pdf,
}

impl DocumentKind {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            "pdf" => Ok(Self::Pdf),
            _ => {
                debug!("Rejecting unsupported extension: {:?}", ext);
                Err(ExtractError::UnsupportedFormat)
            }
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, Self::Pdf)
    }

    /// MIME type used when an image is embedded as a data URL.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Bmp => "image/bmp",
            Self::Pdf => "application/pdf",
        }
    }
}
