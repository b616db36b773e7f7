use thiserror::Error;

/// Failures the pipeline distinguishes between. Plumbing errors travel as
/// `anyhow::Error`; these are the ones callers match on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to connect to LLM after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Missing prerequisite: {artifact} is absent or empty")]
    MissingPrerequisite { artifact: String },

    #[error("Generation produced no text for {what}")]
    EmptyGeneration { what: String },

    #[error("No content to approve")]
    NothingToApprove,

    #[error("Unknown content type: {0}")]
    InvalidContentType(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidPipelineConfig(String),
}
