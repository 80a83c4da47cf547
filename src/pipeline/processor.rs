//! Report processing orchestrator.
//!
//! Drives one upload through the pipeline:
//! classify → materialize → extract (first page) → normalize.
//!
//! Collaborators are injected at construction so the orchestrator is fully
//! testable with mock vision clients and PDF renderers. Scratch files live
//! exactly as long as one `process` call.

use tracing::Instrument;

use crate::pipeline::extraction::{ExtractionError, ImageMediaType, LabReportExtractor};
use crate::pipeline::import::{
    classify_upload, sanitize_filename, ImportError, Materializer, UploadKind,
};
use crate::pipeline::storage::{ReportStore, StorageError};
use crate::pipeline::structuring::{normalize, CanonicalReport};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Import failed: {0}")]
    Import(ImportError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Failed to store report: {0}")]
    Storage(#[from] StorageError),

    #[error("Materialization worker failed: {0}")]
    Worker(String),
}

impl From<ImportError> for ProcessingError {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::UnsupportedMediaType(media_type) => Self::UnsupportedMediaType(media_type),
            other => Self::Import(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One uploaded lab report as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    /// Declared MIME type, if the client sent one.
    pub media_type: Option<String>,
    pub file_name: String,
}

impl Upload {
    pub fn new(bytes: Vec<u8>, media_type: Option<&str>, file_name: &str) -> Self {
        Self {
            bytes,
            media_type: media_type.map(str::to_string),
            file_name: file_name.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Turns uploads into canonical reports. Stateless across calls.
pub struct ReportProcessor {
    extractor: LabReportExtractor,
    materializer: Materializer,
}

impl ReportProcessor {
    pub fn new(extractor: LabReportExtractor, materializer: Materializer) -> Self {
        Self {
            extractor,
            materializer,
        }
    }

    /// Process one upload for the patient reachable at `phone_number`.
    ///
    /// Fails on unsupported uploads, scratch I/O or rendering problems, and
    /// vision transport errors. Unreadable model output is not a failure.
    pub async fn process(
        &self,
        upload: Upload,
        phone_number: &str,
    ) -> Result<CanonicalReport, ProcessingError> {
        let span = tracing::info_span!(
            "process_report",
            upload_bytes = upload.bytes.len(),
            model = %self.extractor.model_name(),
        );
        self.run(upload, phone_number).instrument(span).await
    }

    /// `process`, then hand the report to `store`. Returns the stored id.
    pub async fn process_and_store(
        &self,
        upload: Upload,
        phone_number: &str,
        store: &(dyn ReportStore + Sync),
    ) -> Result<String, ProcessingError> {
        let report = self.process(upload, phone_number).await?;
        let id = store.save(&report)?;
        tracing::info!(report_id = %id, "Report stored");
        Ok(id)
    }

    async fn run(
        &self,
        upload: Upload,
        phone_number: &str,
    ) -> Result<CanonicalReport, ProcessingError> {
        let start = std::time::Instant::now();
        let file_name = sanitize_filename(&upload.file_name);
        let kind = classify_upload(upload.media_type.as_deref(), &file_name, &upload.bytes)?;

        let materializer = self.materializer.clone();
        let bytes = upload.bytes;
        let scratch = tokio::task::spawn_blocking(move || materializer.materialize(&bytes, kind))
            .await
            .map_err(|e| ProcessingError::Worker(e.to_string()))??;

        if scratch.len() > 1 {
            tracing::warn!(
                pages = scratch.len(),
                "Multi-page report: only the first page is extracted"
            );
        }

        let first_page = scratch.first().ok_or(ImportError::EmptyDocument)?;
        let image = tokio::fs::read(first_page).await.map_err(ImportError::from)?;
        let media_type = match kind {
            UploadKind::Image(media_type) => media_type,
            UploadKind::Pdf => ImageMediaType::Png,
        };

        let raw = self.extractor.extract(image, media_type).await?;
        let report = normalize(&raw, kind.file_type(), &file_name, phone_number);

        drop(scratch);
        tracing::info!(
            file_type = kind.file_type().as_str(),
            elapsed_ms = %start.elapsed().as_millis(),
            "Report processed"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use crate::pipeline::extraction::pdfium::{minimal_png, MockPdfPageRenderer};
    use crate::pipeline::extraction::{MockVisionClient, VisionClient};
    use crate::pipeline::storage::JsonFileStore;
    use crate::pipeline::structuring::{FileType, DEFAULT_LAB_NAME, DEFAULT_TEST_NAME};

    const PHONE: &str = "+15551234567";

    const CBC_REPLY: &str = r#"```json
{
  "report_info": {"lab_name": "City Diagnostics"},
  "patient_info": {"name": "Asha Rao", "age": "34 Years", "phone_number": "000"},
  "collection_info": {"collected_on": "15-Mar-2023 08:30"},
  "test_category": "HAEMATOLOGY",
  "test_name": "COMPLETE BLOOD COUNT",
  "test_results": {
    "Hemoglobin": {"value": 10.2, "unit": "g/dL", "reference_range": "12-16"},
  },
}
```"#;

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    fn processor(
        dir: &Path,
        client: Arc<dyn VisionClient + Send + Sync>,
        pages: MockPdfPageRenderer,
    ) -> ReportProcessor {
        ReportProcessor::new(
            LabReportExtractor::new(client, Duration::from_secs(5)),
            Materializer::new(dir, Arc::new(pages), 300),
        )
    }

    /// Records how many scratch files exist at the moment the model is
    /// called, then answers (or fails) like `MockVisionClient`.
    struct ScratchObserver {
        dir: PathBuf,
        files_seen: Mutex<Vec<usize>>,
        reply: Result<String, u16>,
    }

    impl ScratchObserver {
        fn new(dir: &Path, reply: Result<&str, u16>) -> Self {
            Self {
                dir: dir.to_path_buf(),
                files_seen: Mutex::new(Vec::new()),
                reply: reply.map(str::to_string),
            }
        }

        fn files_seen(&self) -> Vec<usize> {
            self.files_seen.lock().unwrap().clone()
        }
    }

    impl VisionClient for ScratchObserver {
        fn complete_with_image(
            &self,
            _system: &str,
            _instruction: &str,
            _image_base64: &str,
            _media_type: ImageMediaType,
        ) -> Result<String, ExtractionError> {
            self.files_seen.lock().unwrap().push(count_files(&self.dir));
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(ExtractionError::Api {
                    status: *status,
                    body: "overloaded".into(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "observer"
        }
    }

    fn png_upload(name: &str) -> Upload {
        Upload::new(minimal_png(), Some("image/png"), name)
    }

    fn pdf_upload(name: &str) -> Upload {
        Upload::new(b"%PDF-1.7\n".to_vec(), Some("application/pdf"), name)
    }

    #[tokio::test]
    async fn image_upload_produces_normalized_report() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockVisionClient::new(CBC_REPLY));
        let p = processor(dir.path(), mock.clone(), MockPdfPageRenderer::new(0));

        let report = p.process(png_upload("cbc.png"), PHONE).await.unwrap();

        assert_eq!(report.report_info.lab_name, "City Diagnostics");
        assert_eq!(report.patient_info.phone_number, PHONE);
        assert_eq!(report.patient_info.age, Some(34));
        assert_eq!(report.metadata.file_type, FileType::Image);
        assert_eq!(report.metadata.original_file_path, "cbc.png");
        assert_eq!(report.metadata.report_type, "COMPLETE BLOOD COUNT");
        assert!(report.collection_info.collected_on.is_some());
        assert!(!report.test_results["Hemoglobin"].as_leaf().unwrap().is_normal);

        assert_eq!(mock.received_media_types(), vec![ImageMediaType::Png]);
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn three_page_pdf_materializes_three_files_then_none() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(ScratchObserver::new(dir.path(), Ok(CBC_REPLY)));
        let p = processor(dir.path(), observer.clone(), MockPdfPageRenderer::new(3));

        let report = p.process(pdf_upload("cbc.pdf"), PHONE).await.unwrap();

        assert_eq!(observer.files_seen(), vec![3]);
        assert_eq!(count_files(dir.path()), 0);
        assert_eq!(report.metadata.file_type, FileType::Pdf);
    }

    #[tokio::test]
    async fn scratch_files_removed_when_extraction_fails() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(ScratchObserver::new(dir.path(), Err(529)));
        let p = processor(dir.path(), observer.clone(), MockPdfPageRenderer::new(3));

        let err = p.process(pdf_upload("cbc.pdf"), PHONE).await.unwrap_err();

        assert!(matches!(
            err,
            ProcessingError::Extraction(ExtractionError::Api { status: 529, .. })
        ));
        assert_eq!(observer.files_seen(), vec![3]);
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn render_failure_leaves_no_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockVisionClient::new("{}"));
        let p = processor(
            dir.path(),
            mock.clone(),
            MockPdfPageRenderer::new(3).failing_on(1),
        );

        let err = p.process(pdf_upload("cbc.pdf"), PHONE).await.unwrap_err();

        assert!(matches!(err, ProcessingError::Import(ImportError::Rendering(_))));
        assert_eq!(mock.call_count(), 0);
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn unsupported_upload_rejected_before_materialization() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let mock = Arc::new(MockVisionClient::new("{}"));
        let p = processor(&scratch, mock.clone(), MockPdfPageRenderer::new(1));

        let upload = Upload::new(b"PK\x03\x04".to_vec(), Some("application/zip"), "reports.zip");
        let err = p.process(upload, PHONE).await.unwrap_err();

        assert!(matches!(err, ProcessingError::UnsupportedMediaType(ref m) if m == "application/zip"));
        assert!(!scratch.exists());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn unreadable_model_output_yields_default_report() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockVisionClient::new("Sorry, I cannot read this document."));
        let p = processor(dir.path(), mock, MockPdfPageRenderer::new(2));

        let report = p
            .process(pdf_upload("../uploads/scan.pdf"), PHONE)
            .await
            .unwrap();

        assert_eq!(report.report_info.lab_name, DEFAULT_LAB_NAME);
        assert_eq!(report.test_name, DEFAULT_TEST_NAME);
        assert_eq!(report.metadata.original_file_path, "scan.pdf");
        assert_eq!(report.metadata.file_type, FileType::Pdf);
        assert_eq!(report.patient_info.phone_number, PHONE);
        assert!(report.test_results.is_empty());
    }

    #[tokio::test]
    async fn process_and_store_persists_report() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(store_dir.path());
        let mock = Arc::new(MockVisionClient::new(CBC_REPLY));
        let p = processor(dir.path(), mock, MockPdfPageRenderer::new(0));

        let id = p
            .process_and_store(png_upload("cbc.png"), PHONE, &store)
            .await
            .unwrap();

        let stored = std::fs::read_to_string(store_dir.path().join(format!("{id}.json"))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(value["test_category"], json!("HAEMATOLOGY"));
        assert_eq!(value["patient_info"]["phone_number"], json!(PHONE));
    }

    #[test]
    fn unsupported_import_error_maps_to_dedicated_variant() {
        let err: ProcessingError = ImportError::UnsupportedMediaType("text/csv".into()).into();
        assert!(matches!(err, ProcessingError::UnsupportedMediaType(_)));

        let err: ProcessingError = ImportError::EmptyDocument.into();
        assert!(matches!(err, ProcessingError::Import(ImportError::EmptyDocument)));
    }
}
