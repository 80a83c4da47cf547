use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::StorageError;
use crate::pipeline::structuring::CanonicalReport;

/// Persistence seam for finished reports.
pub trait ReportStore {
    /// Persist `report`, returning the identifier it was stored under.
    fn save(&self, report: &CanonicalReport) -> Result<String, StorageError>;
}

/// Stores each report as pretty-printed `<uuid>.json` in one directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Read back a stored report.
    pub fn load(&self, id: &Uuid) -> Result<CanonicalReport, StorageError> {
        let path = self.path_for(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ReportNotFound(*id))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl ReportStore for JsonFileStore {
    fn save(&self, report: &CanonicalReport) -> Result<String, StorageError> {
        std::fs::create_dir_all(&self.dir)?;

        let id = Uuid::new_v4();
        let json = serde_json::to_vec_pretty(report)?;

        // Write-then-rename so readers never see a half-written report
        let final_path = self.path_for(&id);
        let tmp_path = final_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        tracing::debug!(report_id = %id, bytes = json.len(), "Report stored");
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::structuring::{normalize, FileType};
    use serde_json::json;

    fn sample_report() -> CanonicalReport {
        normalize(
            &json!({
                "report_info": {"lab_name": "City Diagnostics"},
                "test_name": "Lipid Profile",
                "collection_info": {"collected_on": "15/03/2023 08:30"},
                "test_results": {
                    "Cholesterol": {
                        "Total": {"value": 240, "unit": "mg/dL", "reference_range": "125-200"},
                        "HDL": {"value": "48", "unit": "mg/dL", "reference_range": "40-60"}
                    }
                }
            }),
            FileType::Pdf,
            "lipid.pdf",
            "+15551234567",
        )
    }

    #[test]
    fn save_then_load_preserves_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let report = sample_report();

        let id = store.save(&report).unwrap();
        let uuid: Uuid = id.parse().unwrap();
        assert!(dir.path().join(format!("{id}.json")).exists());

        let loaded = store.load(&uuid).unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn each_save_gets_a_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let report = sample_report();

        let a = store.save(&report).unwrap();
        let b = store.save(&report).unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn stored_json_uses_report_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("reports"));

        let id = store.save(&sample_report()).unwrap();
        let text = std::fs::read_to_string(store.dir().join(format!("{id}.json"))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["metadata"]["file_type"], "PDF");
        assert_eq!(value["patient_info"]["phone_number"], "+15551234567");
        assert_eq!(value["collection_info"]["collected_on"], "2023-03-15T08:30:00");
        assert_eq!(value["test_results"]["Cholesterol"]["Total"]["is_normal"], false);
    }

    #[test]
    fn missing_report_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let id = Uuid::new_v4();
        assert!(matches!(store.load(&id), Err(StorageError::ReportNotFound(missing)) if missing == id));
    }
}
