pub mod import;
pub mod extraction;
pub mod structuring;
pub mod storage;
pub mod processor; // Upload → CanonicalReport orchestrator
