//! Conflict detection
//!
//! Compares the entities returned by successful adapters field by field.
//! A field conflicts when two adapters that both returned it disagree on its
//! value. An adapter that did not return a field has no opinion on it.
//!
//! Values are compared by meaning rather than representation:
//! - numbers compare numerically (`1` equals `1.0`)
//! - arrays compare as sets (order and repetition are ignored)
//! - objects compare key by key with the same rules
//! - everything else compares by plain equality

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Number, Value};

use core_kernel::{AdapterId, NormalizedEntity};

use crate::report::Conflict;

/// Returns true if `a` and `b` carry the same normalized value
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.iter().all(|x| ys.iter().any(|y| values_equal(x, y)))
                && ys.iter().all(|y| xs.iter().any(|x| values_equal(x, y)))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(key, x)| ym.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Detects conflicting fields across successful results
///
/// The output is sorted by field name and, within a conflict, keyed by
/// adapter id, so the same inputs always produce the same conflict list.
pub fn detect_conflicts<'a>(
    results: impl IntoIterator<Item = (&'a AdapterId, &'a NormalizedEntity)>,
) -> Vec<Conflict> {
    let results: Vec<(&AdapterId, &NormalizedEntity)> = results.into_iter().collect();

    let fields: BTreeSet<&String> = results
        .iter()
        .flat_map(|(_, entity)| entity.fields.keys())
        .collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let values: BTreeMap<AdapterId, Value> = results
                .iter()
                .filter_map(|(id, entity)| {
                    entity
                        .fields
                        .get(field)
                        .map(|value| ((*id).clone(), value.clone()))
                })
                .collect();

            let mut iter = values.values();
            let first = iter.next()?;
            let disagree = iter.any(|value| !values_equal(first, value));

            disagree.then(|| Conflict {
                field: field.clone(),
                values_by_adapter: values,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(value: &str) -> AdapterId {
        AdapterId::from(value)
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!(-3), &json!(-3)));
        assert!(!values_equal(&json!(1), &json!(2)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_arrays_compare_as_sets() {
        assert!(values_equal(&json!(["a", "b"]), &json!(["b", "a"])));
        assert!(values_equal(&json!(["a", "a", "b"]), &json!(["b", "a"])));
        assert!(!values_equal(&json!(["a"]), &json!(["a", "b"])));
    }

    #[test]
    fn test_objects_compare_recursively() {
        assert!(values_equal(
            &json!({"tags": ["x", "y"], "score": 5}),
            &json!({"score": 5.0, "tags": ["y", "x"]})
        ));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_detects_disagreement() {
        let a = NormalizedEntity::new().with_field("email", "x@y.com").with_field("name", "Ada");
        let b = NormalizedEntity::new().with_field("email", "x@y.com").with_field("name", "Ada");
        let c = NormalizedEntity::new().with_field("email", "x@z.com").with_field("name", "Ada");
        let (ia, ib, ic) = (id("a"), id("b"), id("c"));

        let conflicts = detect_conflicts([(&ia, &a), (&ib, &b), (&ic, &c)]);

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "email");
        assert_eq!(conflicts[0].values_by_adapter.len(), 3);
        assert_eq!(conflicts[0].values_by_adapter[&ic], json!("x@z.com"));
    }

    #[test]
    fn test_missing_field_is_not_a_conflict() {
        let a = NormalizedEntity::new().with_field("phone", "123");
        let b = NormalizedEntity::new();
        let (ia, ib) = (id("a"), id("b"));

        assert!(detect_conflicts([(&ia, &a), (&ib, &b)]).is_empty());
    }

    #[test]
    fn test_null_differs_from_value() {
        let a = NormalizedEntity::new().with_field("phone", Value::Null);
        let b = NormalizedEntity::new().with_field("phone", "123");
        let (ia, ib) = (id("a"), id("b"));

        assert_eq!(detect_conflicts([(&ia, &a), (&ib, &b)]).len(), 1);
    }

    #[test]
    fn test_output_is_sorted_by_field() {
        let a = NormalizedEntity::new().with_field("zeta", 1).with_field("alpha", 1);
        let b = NormalizedEntity::new().with_field("zeta", 2).with_field("alpha", 2);
        let (ia, ib) = (id("a"), id("b"));

        let fields: Vec<String> = detect_conflicts([(&ib, &b), (&ia, &a)])
            .into_iter()
            .map(|c| c.field)
            .collect();
        assert_eq!(fields, vec!["alpha", "zeta"]);
    }
}
