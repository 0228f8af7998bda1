//! BM25 sparse encoding
//!
//! Documents are encoded with the length-normalized BM25 term weight only;
//! IDF is applied on the query side, computed from live corpus statistics.
//! Both sides hash terms into the same vocabulary space, so the dot product
//! computed by the sparse index is the BM25 score.

mod encoder;
mod tokenizer;

pub use encoder::{Bm25Encoder, DocumentFrequencies, TermFrequencies};
pub use tokenizer::{hash_term, is_stopword, tokenize};

use clauseforge_common::config::Bm25Config;
use clauseforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Largest prime below 2^31, the default hashed vocabulary size
pub const DEFAULT_VOCAB_SIZE: u32 = 2_147_483_647;

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation
    pub k1: f32,
    /// Document length normalization
    pub b: f32,
    pub vocab_size: u32,
    pub remove_stopwords: bool,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            vocab_size: DEFAULT_VOCAB_SIZE,
            remove_stopwords: true,
        }
    }
}

impl Bm25Params {
    /// Validated parameters from configuration
    pub fn from_config(config: &Bm25Config) -> Result<Self> {
        let params = Self {
            k1: config.k1,
            b: config.b,
            vocab_size: config.vocab_size,
            remove_stopwords: config.remove_stopwords,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(AppError::configuration(format!("bm25.k1 must be >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(AppError::configuration(format!(
                "bm25.b must be within [0, 1], got {}",
                self.b
            )));
        }
        if self.vocab_size == 0 {
            return Err(AppError::configuration("bm25.vocab_size must be > 0"));
        }
        Ok(())
    }
}

/// Sparse vector in the index's wire shape. Indices are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Weight at a term index, if present
    pub fn get(&self, index: u32) -> Option<f32> {
        self.indices
            .iter()
            .position(|&i| i == index)
            .map(|pos| self.values[pos])
    }

    /// Dot product with another sparse vector
    pub fn dot(&self, other: &SparseVector) -> f32 {
        self.indices
            .iter()
            .zip(&self.values)
            .filter_map(|(index, value)| other.get(*index).map(|w| w * value))
            .sum()
    }
}
