//! Image catalogs: map identifiers matched by a pattern to image references.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;

/// Errors raised while resolving a catalog pattern.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Source of runnable images, keyed by identifier.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Identifiers matching `pattern`, with the image reference for each.
    async fn resolve(&self, pattern: &str) -> Result<BTreeMap<String, String>, CatalogError>;
}

/// Catalog backed by a fixed identifier → image table.
///
/// Patterns are unanchored regular expressions, so `geth` matches
/// `go-ethereum:geth` and `.` matches everything.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    images: BTreeMap<String, String>,
}

impl StaticCatalog {
    pub fn new(images: BTreeMap<String, String>) -> Self {
        Self { images }
    }

    pub fn with_image(mut self, id: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(id.into(), image.into());
        self
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Synchronous form of [`ImageCatalog::resolve`].
    pub fn matching(&self, pattern: &str) -> Result<BTreeMap<String, String>, CatalogError> {
        let re = Regex::new(pattern).map_err(|source| CatalogError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(self
            .images
            .iter()
            .filter(|(id, _)| re.is_match(id))
            .map(|(id, image)| (id.clone(), image.clone()))
            .collect())
    }
}

#[async_trait]
impl ImageCatalog for StaticCatalog {
    async fn resolve(&self, pattern: &str) -> Result<BTreeMap<String, String>, CatalogError> {
        self.matching(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticCatalog {
        StaticCatalog::default()
            .with_image("go-ethereum", "xval/clients/go-ethereum:latest")
            .with_image("besu", "xval/clients/besu:latest")
            .with_image("nethermind", "xval/clients/nethermind:latest")
    }

    #[tokio::test]
    async fn test_resolve_all() {
        let found = catalog().resolve(".").await.unwrap();
        assert_eq!(
            found.keys().collect::<Vec<_>>(),
            vec!["besu", "go-ethereum", "nethermind"]
        );
    }

    #[tokio::test]
    async fn test_resolve_filters() {
        let found = catalog().resolve("^(besu|nethermind)$").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["besu"], "xval/clients/besu:latest");
    }

    #[tokio::test]
    async fn test_resolve_no_match_is_empty() {
        assert!(catalog().resolve("erigon").await.unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = catalog().matching("(unclosed").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPattern { .. }));
        assert!(err.to_string().contains("(unclosed"));
    }
}
