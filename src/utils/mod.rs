//! Helpers shared by plugins and the run driver.
//!
//! - **Hashing**: SHA-256 of staged evidence files
//! - **Summary**: JSON run summary for the report renderer

/// Run summary generation
pub mod summary;

/// Cryptographic hash calculation utilities
pub mod hash;
