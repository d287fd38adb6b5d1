//! Security Catalog Port
//!
//! Interface for listing the securities an exchange currently offers.

use async_trait::async_trait;

use crate::domain::market::{Category, Security};

/// Catalog lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Request could not be performed.
    #[error("catalog request failed: {message}")]
    Request {
        /// Failure description.
        message: String,
    },

    /// Server answered with a non-success HTTP status.
    #[error("catalog returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body did not match the expected shape.
    #[error("catalog response could not be decoded: {message}")]
    Decode {
        /// Decoder message.
        message: String,
    },

    /// Exchange returned an application-level error.
    #[error("catalog rejected request ({code}): {message}")]
    Rejected {
        /// Exchange return code.
        code: i64,
        /// Exchange return message.
        message: String,
    },
}

/// Port for security listings.
#[async_trait]
pub trait SecurityCatalog: Send + Sync {
    /// List the securities of a category.
    async fn securities(&self, category: Category) -> Result<Vec<Security>, CatalogError>;
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    securities: Vec<Security>,
}

impl StaticCatalog {
    /// Create a catalog serving the given securities.
    #[must_use]
    pub const fn new(securities: Vec<Security>) -> Self {
        Self { securities }
    }
}

#[async_trait]
impl SecurityCatalog for StaticCatalog {
    async fn securities(&self, category: Category) -> Result<Vec<Security>, CatalogError> {
        Ok(self
            .securities
            .iter()
            .filter(|s| s.category == category)
            .cloned()
            .collect())
    }
}
