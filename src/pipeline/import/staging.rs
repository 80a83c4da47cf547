//! Scratch files for one upload.
//!
//! An upload is written to the scratch directory as the image(s) the vision
//! model will see: the image itself, or one PNG per PDF page. The returned
//! `ScratchFiles` owns those paths and deletes them when dropped, whatever
//! the outcome of the request.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use super::format::UploadKind;
use super::ImportError;
use crate::pipeline::extraction::PdfPageRenderer;

/// Files materialized for a single upload, in page order.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn first(&self) -> Option<&Path> {
        self.paths.first().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Write `bytes` to `path`, taking ownership of the path first so a
    /// partial write is still removed.
    fn write(&mut self, path: PathBuf, bytes: &[u8]) -> Result<(), ImportError> {
        self.paths.push(path);
        let path = &self.paths[self.paths.len() - 1];
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        let mut removed = 0usize;
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to remove scratch file: {e}");
                }
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "Scratch files released");
        }
    }
}

/// Writes uploads into the scratch directory. Cheap to clone.
#[derive(Clone)]
pub struct Materializer {
    scratch_dir: PathBuf,
    renderer: Arc<dyn PdfPageRenderer + Send + Sync>,
    render_dpi: u32,
}

impl Materializer {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        renderer: Arc<dyn PdfPageRenderer + Send + Sync>,
        render_dpi: u32,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            renderer,
            render_dpi,
        }
    }

    /// Materialize one upload. Blocking; PDF pages are rendered here.
    ///
    /// Images become `<uuid>.<ext>`; PDFs become `<uuid>_page_<n>.png` for
    /// n = 1..=pages. On error every file written so far is removed.
    pub fn materialize(&self, bytes: &[u8], kind: UploadKind) -> Result<ScratchFiles, ImportError> {
        fs::create_dir_all(&self.scratch_dir)?;
        let stem = Uuid::new_v4();
        let mut files = ScratchFiles::default();

        match kind {
            UploadKind::Image(media_type) => {
                let path = self
                    .scratch_dir
                    .join(format!("{stem}.{}", media_type.extension()));
                files.write(path, bytes)?;
            }
            UploadKind::Pdf => {
                let page_count = self.renderer.page_count(bytes)?;
                if page_count == 0 {
                    return Err(ImportError::EmptyDocument);
                }
                for page in 0..page_count {
                    let png = self.renderer.render_page(bytes, page, self.render_dpi)?;
                    let path = self
                        .scratch_dir
                        .join(format!("{stem}_page_{}.png", page + 1));
                    files.write(path, &png)?;
                }
            }
        }

        tracing::info!(
            kind = ?kind,
            files = files.len(),
            upload_bytes = bytes.len(),
            "Upload materialized"
        );
        Ok(files)
    }
}

/// Remove files older than `max_age` from `dir`, e.g. pages left behind
/// by a crashed process. Returns how many were removed; a missing directory
/// counts as clean.
pub fn sweep_stale_scratch(dir: &Path, max_age: Duration) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let cutoff = SystemTime::now().checked_sub(max_age);

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let modified = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta.modified().ok(),
            _ => continue,
        };
        let stale = match (modified, cutoff) {
            (Some(modified), Some(cutoff)) => modified <= cutoff,
            _ => false,
        };
        if !stale {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), "Failed to sweep scratch file: {e}"),
        }
    }

    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "Swept stale scratch files");
    }
    removed
}
