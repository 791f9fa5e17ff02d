use thiserror::Error;

use crate::edgar::parsing::SectionName;

/// Failure taxonomy for the pipeline. Fetch and model errors are retried
/// locally up to a fixed ceiling; exhaustion is converted into a
/// result-carrying error so one company's failure does not abort the rest
/// of the watchlist.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("rate limit exceeded after {attempts} attempts for {url}")]
    RateLimitExceeded { url: String, attempts: u32 },

    #[error("no primary document resolved for accession {0}")]
    DocumentUnresolved(String),

    #[error("section '{0}' not found in filing text")]
    SectionMissing(SectionName),

    #[error("could not parse model output as JSON: {snippet}")]
    ParseFailed { snippet: String },

    #[error("max retries exceeded")]
    MaxRetriesExceeded,
}
