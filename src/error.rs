use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AnnotateError {
    #[error("organism not found in taxonomy: {0}")]
    UnknownOrganism(String),

    #[error("taxonomy returned an empty lineage for: {0}")]
    EmptyLineage(String),

    #[error("hit title carries no organism tag: {0}")]
    MissingOrganismName(String),

    #[error("BLAST request failed: {0}")]
    SearchHttp(String),

    #[error("BLAST returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("BLAST search failed: {0}")]
    SearchFailed(String),

    #[error("failed to parse BLAST result: {0}")]
    SearchParse(String),

    #[error("taxonomy request failed: {0}")]
    TaxonomyHttp(String),

    #[error("taxonomy service returned status {status}: {message}")]
    TaxonomyStatus { status: u16, message: String },

    #[error("failed to parse taxonomy data: {0}")]
    TaxonomyParse(String),

    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid input record on line {line}: {message}")]
    InvalidRecord { line: u64, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("credentials file is missing required field: {0}")]
    MissingCredentials(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl AnnotateError {
    /// Taxonomy failures that only cost one alignment record its tax id.
    pub fn is_record_recoverable(&self) -> bool {
        matches!(
            self,
            AnnotateError::UnknownOrganism(_)
                | AnnotateError::EmptyLineage(_)
                | AnnotateError::MissingOrganismName(_)
                | AnnotateError::TaxonomyHttp(_)
                | AnnotateError::TaxonomyStatus { .. }
                | AnnotateError::TaxonomyParse(_)
        )
    }

    pub fn is_search_failure(&self) -> bool {
        matches!(
            self,
            AnnotateError::SearchHttp(_)
                | AnnotateError::SearchStatus { .. }
                | AnnotateError::SearchFailed(_)
                | AnnotateError::SearchParse(_)
        )
    }
}

impl From<rusqlite::Error> for AnnotateError {
    fn from(err: rusqlite::Error) -> Self {
        AnnotateError::StoreUnavailable(err.to_string())
    }
}
