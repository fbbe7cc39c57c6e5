use cda::CdaError;
use converter_files::FilesError;
use hl7v2::Hl7Error;
use template_engine::TemplateError;

/// Source documents that could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error(transparent)]
    Hl7(#[from] Hl7Error),
    #[error(transparent)]
    Cda(#[from] CdaError),
}

/// Everything a conversion request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("No source data provided.")]
    EmptySource,

    #[error("Unable to parse input data: {0}")]
    Format(#[from] FormatError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("template store error: {0}")]
    Store(#[from] FilesError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<Hl7Error> for ConvertError {
    fn from(err: Hl7Error) -> Self {
        ConvertError::Format(FormatError::Hl7(err))
    }
}

impl From<CdaError> for ConvertError {
    fn from(err: CdaError) -> Self {
        ConvertError::Format(FormatError::Cda(err))
    }
}

/// Failures of the pool itself rather than of the request it carried.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("conversion unit {slot} terminated before replying")]
    UnitFailed { slot: usize },

    #[error("conversion unit {slot} could not start: {reason}")]
    UnitUnavailable { slot: usize, reason: String },

    #[error("failed to spawn conversion unit thread: {0}")]
    Spawn(std::io::Error),
}

pub type ConvertResult<T> = std::result::Result<T, ConvertError>;
