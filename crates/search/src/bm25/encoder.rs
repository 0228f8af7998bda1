use super::tokenizer::{hash_term, tokenize};
use super::{Bm25Params, SparseVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per-document term counts, indices sorted ascending
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermFrequencies {
    pub indices: Vec<u32>,
    pub values: Vec<u32>,
}

impl TermFrequencies {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Document length: the total number of counted terms
    pub fn length(&self) -> u32 {
        self.values.iter().sum()
    }

    pub fn to_map(&self) -> BTreeMap<u32, u32> {
        self.indices.iter().copied().zip(self.values.iter().copied()).collect()
    }
}

impl From<&BTreeMap<u32, u32>> for TermFrequencies {
    fn from(map: &BTreeMap<u32, u32>) -> Self {
        Self {
            indices: map.keys().copied().collect(),
            values: map.values().copied().collect(),
        }
    }
}

/// Document frequencies over a scope, with `n` the number of documents scanned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFrequencies {
    pub df: HashMap<u32, u64>,
    pub n: u64,
}

impl DocumentFrequencies {
    /// Documents containing the term, 0 when unseen
    pub fn get(&self, index: u32) -> u64 {
        self.df.get(&index).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bm25Encoder {
    params: Bm25Params,
}

impl Bm25Encoder {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    fn counts(&self, text: &str) -> BTreeMap<u32, u32> {
        let mut counts = BTreeMap::new();
        for term in tokenize(text, self.params.remove_stopwords) {
            *counts.entry(hash_term(&term, self.params.vocab_size)).or_insert(0) += 1;
        }
        counts
    }

    /// Hashed term counts of a text. Empty or all-stopword text yields empty vectors.
    pub fn term_frequencies(&self, text: &str) -> TermFrequencies {
        TermFrequencies::from(&self.counts(text))
    }

    /// Index-time BM25 weights: `tf*(k1+1) / (tf + k1*(1 - b + b*dl/avgdl))`.
    ///
    /// An `avgdl` of zero or less (no corpus statistics yet) leaves the
    /// length ratio at 1.
    pub fn encode_document(
        &self,
        avgdl: f64,
        term_freq: &TermFrequencies,
        doc_length: u32,
    ) -> SparseVector {
        let k1 = f64::from(self.params.k1);
        let b = f64::from(self.params.b);
        let ratio = if avgdl > 0.0 {
            f64::from(doc_length) / avgdl
        } else {
            1.0
        };
        let norm = k1 * (1.0 - b + b * ratio);

        let (indices, values) = term_freq
            .indices
            .iter()
            .zip(&term_freq.values)
            .filter(|(_, &tf)| tf > 0)
            .map(|(&index, &tf)| {
                let tf = f64::from(tf);
                (index, (tf * (k1 + 1.0) / (tf + norm)) as f32)
            })
            .unzip();

        SparseVector { indices, values }
    }

    /// Query-time weights: `ln((n - df + 0.5)/(df + 0.5) + 1) * qtf`.
    ///
    /// Returns an empty vector when the scope holds no documents, which the
    /// hybrid executor treats as "skip the sparse branch".
    pub fn encode_query(&self, query: &str, doc_freq: &DocumentFrequencies) -> SparseVector {
        let n = doc_freq.n;
        if n == 0 {
            return SparseVector::default();
        }
        let n = n as f64;

        let (indices, values) = self
            .counts(query)
            .into_iter()
            .map(|(index, qtf)| {
                let df = doc_freq.get(index) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                (index, (idf * f64::from(qtf)) as f32)
            })
            .unzip();

        SparseVector { indices, values }
    }
}
