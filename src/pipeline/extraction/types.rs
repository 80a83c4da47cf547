use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Untyped extraction tree exactly as the vision model produced it (after
/// JSON repair). Converted to a typed report only by the normalizer.
pub type RawExtraction = serde_json::Value;

/// Image encodings the vision model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageMediaType {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageMediaType {
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Parse a MIME string (parameters such as `; charset=` are ignored).
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Detect from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, 0x50, 0x4E, 0x47, ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            _ if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" => {
                Some(Self::Webp)
            }
            _ => None,
        }
    }
}

/// Vision-capable completion backend (allows mocking).
///
/// Implementations are blocking; callers on an async runtime must offload
/// the call to a blocking worker.
pub trait VisionClient {
    /// Send one base64-encoded image with a system prompt and user
    /// instruction, returning the model's free-form text reply.
    fn complete_with_image(
        &self,
        system: &str,
        instruction: &str,
        image_base64: &str,
        media_type: ImageMediaType,
    ) -> Result<String, ExtractionError>;

    /// Model identifier actually used for requests.
    fn model_name(&self) -> &str;
}

/// PDF page rasterization abstraction
pub trait PdfPageRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    /// Render one zero-indexed page to PNG bytes.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;
}
