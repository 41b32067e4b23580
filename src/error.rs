//! Error types for source clients.
//!
//! Source errors never cross into the aggregator: each client logs them
//! with [`SourceError::log`] and substitutes an empty result.

use thiserror::Error;
use tracing::{debug, error, warn};

/// Failure while talking to one external source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Required credentials or endpoints are missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timeouts, connection failures and 5xx responses.
    #[error("transient request failure: {0}")]
    Transient(String),

    /// 401/403, almost always a bad or under-scoped token.
    #[error("authorization failed ({status}) for {url}")]
    Authorization { status: u16, url: String },

    /// 404 on a specific resource; treated as "absent", not as a failure.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Any other 4xx, e.g. an invalid query.
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A GraphQL endpoint answered 200 with an `errors` array.
    #[error("GraphQL errors: {0}")]
    GraphQl(String),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }

    /// Log at the severity the error kind deserves.
    pub fn log(&self, source: &str, context: &str) {
        match self {
            SourceError::NotFound(_) => {
                debug!("{}: {} - {}", source, context, self);
            }
            SourceError::Authorization { .. } | SourceError::Configuration(_) => {
                error!(
                    "{}: {} - {} (check the {} credentials)",
                    source, context, self, source
                );
            }
            SourceError::Transient(_) => {
                warn!("{}: {} - {}", source, context, self);
            }
            SourceError::Rejected { .. } | SourceError::Decode(_) | SourceError::GraphQl(_) => {
                error!("{}: {} - {}", source, context, self);
            }
        }
    }
}
