//! Security utilities and validation functions.
//!
//! This module provides security-related functionality including:
//! - Path validation to keep bundle paths inside the staging area
//! - Credential scrubbing to prevent bearer tokens leaking into logs

pub mod credential_scrubber;
pub mod path_validator;

pub use credential_scrubber::{redact_secret, safe_error_message, scrub_credentials};
pub use path_validator::{
    sanitize_component, staging_component, staging_destination, validate_relative_path,
};
