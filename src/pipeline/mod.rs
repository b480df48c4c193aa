pub mod normalize; // Normalizer: PDF / DOCX / TXT → positioned text blocks
pub mod classify;
pub mod schema;
pub mod agents; // Extraction agent pool + inference backends
pub mod orchestrator;
pub mod reconcile;
