//! Image Policy Service
//!
//! Input checks applied before an image is allowed anywhere near the
//! OCR upstream.

use crate::domain::entities::OcrRequest;
use crate::domain::errors::GatewayError;

pub const ALLOWED_CONTENT_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

pub const SUPPORTED_LANGUAGES: [&str; 10] =
    ["en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh"];

/// 5 MiB
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Anything smaller cannot be a real image.
pub const MIN_IMAGE_BYTES: usize = 100;

/// Validates and normalises OCR requests.
pub struct ImagePolicy;

impl ImagePolicy {
    /// Lower-case, de-duplicate and sort the requested languages.
    ///
    /// An empty list means English.
    pub fn normalize_languages(languages: &[String]) -> Vec<String> {
        let mut out: Vec<String> = languages
            .iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        out.sort();
        out.dedup();
        if out.is_empty() {
            out.push("en".to_string());
        }
        out
    }

    /// Validate a request, returning it with normalised languages.
    pub fn validate(mut request: OcrRequest) -> Result<OcrRequest, GatewayError> {
        if request.file_name.trim().is_empty() {
            return Err(GatewayError::InvalidInput("file name is required".into()));
        }

        let content_type = request.content_type.to_lowercase();
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(GatewayError::InvalidInput(format!(
                "unsupported file type {}, allowed: {}",
                request.content_type,
                ALLOWED_CONTENT_TYPES.join(", ")
            )));
        }

        let size = request.size();
        if size > MAX_IMAGE_BYTES {
            return Err(GatewayError::InvalidInput(format!(
                "file too large: {} bytes, maximum is {} bytes",
                size, MAX_IMAGE_BYTES
            )));
        }
        if size < MIN_IMAGE_BYTES {
            return Err(GatewayError::InvalidInput(
                "file too small, the image may be corrupted".into(),
            ));
        }

        let languages = Self::normalize_languages(&request.languages);
        if let Some(bad) = languages
            .iter()
            .find(|l| !SUPPORTED_LANGUAGES.contains(&l.as_str()))
        {
            return Err(GatewayError::InvalidInput(format!(
                "unsupported language {}",
                bad
            )));
        }

        request.content_type = content_type;
        request.languages = languages;
        Ok(request)
    }
}
