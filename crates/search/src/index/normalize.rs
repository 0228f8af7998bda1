use crate::retrieval::{Metadata, RankedMatch};
use clauseforge_common::errors::{AppError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Match shape as returned by either query or search endpoints
#[derive(Debug, Deserialize)]
struct RawMatch {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default, alias = "_score")]
    score: Option<f64>,
    #[serde(default, alias = "fields")]
    metadata: Option<Value>,
}

impl From<RawMatch> for RankedMatch {
    fn from(raw: RawMatch) -> Self {
        let metadata = match raw.metadata {
            Some(Value::Object(map)) => map,
            _ => Metadata::new(),
        };
        RankedMatch {
            id: raw.id,
            score: raw.score.unwrap_or(0.0) as f32,
            metadata,
        }
    }
}

/// Normalize a raw index response into ranked matches.
///
/// Accepts `{"matches": [...]}`, `{"result": {"hits": [...]}}` or a bare
/// array. Missing or null scores read as 0 and missing metadata as empty.
pub fn normalize_matches(raw: &Value) -> Result<Vec<RankedMatch>> {
    let items = raw
        .get("matches")
        .or_else(|| raw.get("result").and_then(|r| r.get("hits")))
        .unwrap_or(raw);

    match items {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                RawMatch::deserialize(item)
                    .map(RankedMatch::from)
                    .map_err(|e| AppError::InvalidFormat {
                        message: format!("Malformed index match: {}", e),
                    })
            })
            .collect(),
        other => Err(AppError::InvalidFormat {
            message: format!("Unexpected index response shape: {}", other),
        }),
    }
}
