use clauseforge_common::config::VectorIndexConfig;
use clauseforge_common::errors::{AppError, Result};
use std::collections::HashMap;

/// Dense index name to its companion sparse index
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    sparse_for_dense: HashMap<String, String>,
}

impl IndexRegistry {
    pub fn new(sparse_for_dense: HashMap<String, String>) -> Self {
        Self { sparse_for_dense }
    }

    pub fn from_config(config: &VectorIndexConfig) -> Self {
        Self::new(config.sparse_indexes.clone())
    }

    pub fn register(&mut self, dense: impl Into<String>, sparse: impl Into<String>) {
        self.sparse_for_dense.insert(dense.into(), sparse.into());
    }

    /// Sparse index paired with `dense_index`.
    ///
    /// A missing pairing is a deployment error and is never retried.
    pub fn sparse_index(&self, dense_index: &str) -> Result<&str> {
        self.sparse_for_dense
            .get(dense_index)
            .map(String::as_str)
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "No sparse index registered for dense index '{}'",
                    dense_index
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut registry = IndexRegistry::default();
        registry.register("contracts-dense", "contracts-sparse");
        assert_eq!(registry.sparse_index("contracts-dense").unwrap(), "contracts-sparse");

        let err = registry.sparse_index("unknown").unwrap_err();
        assert!(err.is_fatal());
    }
}
