use std::path::PathBuf;
use thiserror::Error;

/// Request failures a caller is expected to match on.
///
/// Everything else (index open/write failures, I/O) travels as
/// `anyhow::Error` and can be downcast to this type when needed.
#[derive(Error, Debug)]
pub enum RagError {
    /// Tenant id is empty, too long or contains characters outside
    /// `[A-Za-z0-9_-]`
    #[error("Invalid tenant id: {id:?}")]
    InvalidTenantId { id: String },

    /// A directory handed to ingestion does not exist
    #[error("Directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// A directory handed to ingestion belongs to a different tenant
    #[error("Directory {} belongs to tenant {owner}, not {tenant}", path.display())]
    ForeignLocation {
        path: PathBuf,
        tenant: String,
        owner: String,
    },

    /// `finalize_uploads` found nothing to move
    #[error("No staged uploads for tenant {tenant}")]
    NoStagedUploads { tenant: String },

    /// Upload file name is not a plain file name
    #[error("Invalid upload file name: {name:?}")]
    InvalidFileName { name: String },

    /// Crawl handoff file holds no record with content
    #[error("No crawl records with content in {}", path.display())]
    EmptyCrawl { path: PathBuf },

    /// Chat transcript is empty
    #[error("No messages provided")]
    NoMessages,
}

impl RagError {
    /// Whether the caller sent something wrong (as opposed to a missing resource).
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, RagError::DirectoryNotFound { .. })
    }
}
