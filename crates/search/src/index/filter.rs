use clauseforge_common::db::CorpusScope;
use serde_json::{json, Map, Value};

/// Metadata filter restricting index matches to a corpus scope.
///
/// Top-level fields combine with AND: org equality, then the permitted file
/// set and access tags when present.
pub fn scope_filter(scope: &CorpusScope) -> Value {
    let mut filter = Map::new();
    filter.insert("org_id".into(), json!({ "$eq": scope.org_id }));

    if let Some(files) = &scope.file_ids {
        filter.insert("file_id".into(), json!({ "$in": files }));
    }
    if !scope.access_tags.is_empty() {
        filter.insert("tags".into(), json!({ "$in": scope.access_tags }));
    }

    Value::Object(filter)
}
