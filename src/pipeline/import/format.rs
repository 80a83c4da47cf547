use serde::{Deserialize, Serialize};

use super::ImportError;
use crate::pipeline::extraction::ImageMediaType;
use crate::pipeline::structuring::FileType;

/// What an upload is, as far as the pipeline cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadKind {
    Image(ImageMediaType),
    Pdf,
}

impl UploadKind {
    pub fn file_type(&self) -> FileType {
        match self {
            Self::Image(_) => FileType::Image,
            Self::Pdf => FileType::Pdf,
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/pdf") {
            Some(Self::Pdf)
        } else {
            ImageMediaType::from_mime(essence).map(Self::Image)
        }
    }

    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            Some(Self::Pdf)
        } else {
            ImageMediaType::sniff(bytes).map(Self::Image)
        }
    }
}

/// Decide how to process an upload.
///
/// The declared media type is trusted first, then the file extension, then
/// magic bytes. For images the magic bytes have the final word on the exact
/// encoding, since the vision API rejects a mislabelled image.
pub fn classify_upload(
    declared_media_type: Option<&str>,
    file_name: &str,
    bytes: &[u8],
) -> Result<UploadKind, ImportError> {
    let declared = declared_media_type.and_then(UploadKind::from_mime);
    let guessed = || {
        mime_guess::from_path(file_name)
            .iter()
            .find_map(|mime| UploadKind::from_mime(mime.essence_str()))
    };
    let sniffed = UploadKind::sniff(bytes);

    let kind = match declared.or_else(guessed) {
        Some(UploadKind::Image(claimed)) => match sniffed {
            Some(UploadKind::Image(actual)) if actual != claimed => {
                tracing::debug!(
                    claimed = claimed.as_mime(),
                    actual = actual.as_mime(),
                    "Image content does not match its label, using detected encoding"
                );
                UploadKind::Image(actual)
            }
            _ => UploadKind::Image(claimed),
        },
        Some(UploadKind::Pdf) => UploadKind::Pdf,
        None => sniffed.ok_or_else(|| {
            ImportError::UnsupportedMediaType(
                declared_media_type
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or("unknown")
                    .to_string(),
            )
        })?,
    };

    Ok(kind)
}

/// Reduce a client-supplied file name to its last path segment.
///
/// Both `/` and `\` count as separators; NULs are removed and the result is
/// capped at 255 characters. Empty input yields `"document"`.
pub fn sanitize_filename(original: &str) -> String {
    let last = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let clean: String = last.chars().filter(|c| *c != '\0').take(255).collect();

    if clean.is_empty() || clean == "." || clean == ".." {
        "document".to_string()
    } else {
        clean
    }
}
