use serde_json::Value;
use tracing::debug;

use super::criteria::CriteriaSet;

/// Fields holding lists of structured codes, `[{"code": [...], "typeDnbCode": n}]`.
pub const SPLITTABLE_FIELDS: &[&str] = &["industryCodes"];
const SPLIT_WAYS: usize = 10;

/// Partitions the first splittable code list into roughly ten contiguous
/// chunks, one new criteria set per chunk. Every other field, the code type
/// included, is carried over unchanged.
///
/// Returns an empty list when nothing can be reduced any further.
pub fn split(criteria: &CriteriaSet) -> Vec<CriteriaSet> {
    for field in SPLITTABLE_FIELDS {
        let Some(Value::Array(groups)) = criteria.get(field) else {
            continue;
        };
        let Some((group_index, codes)) = groups.iter().enumerate().find_map(|(i, group)| {
            group
                .get("code")
                .and_then(Value::as_array)
                .filter(|codes| codes.len() > 1)
                .map(|codes| (i, codes))
        }) else {
            continue;
        };

        let chunks = contiguous_chunks(codes, SPLIT_WAYS);
        debug!(
            field,
            codes = codes.len(),
            partitions = chunks.len(),
            "Splitting criteria on structured code list"
        );
        return chunks
            .into_iter()
            .map(|chunk| {
                let mut next_groups = groups.clone();
                if let Some(Value::Object(group)) = next_groups.get_mut(group_index) {
                    group.insert("code".to_string(), Value::Array(chunk.to_vec()));
                }
                criteria
                    .clone()
                    .with_param(*field, Value::Array(next_groups))
            })
            .collect();
    }
    Vec::new()
}

/// `min(ways, len)` contiguous chunks whose sizes differ by at most one.
fn contiguous_chunks<T>(items: &[T], ways: usize) -> Vec<&[T]> {
    let parts = ways.min(items.len());
    if parts == 0 {
        return Vec::new();
    }
    let base = items.len() / parts;
    let remainder = items.len() % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < remainder);
        out.push(&items[start..start + len]);
        start += len;
    }
    out
}
