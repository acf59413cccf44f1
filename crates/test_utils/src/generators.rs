//! Property-Based Test Generators
//!
//! Provides proptest strategies for adapter ids, field values, entities and
//! adapter outcomes.

use std::time::Duration;

use proptest::collection::{btree_map, btree_set, vec};
use proptest::prelude::*;
use serde_json::Value;

use core_kernel::{AdapterError, AdapterId, NormalizedEntity};

/// Strategy for generating adapter ids such as `"crm-7"`
pub fn adapter_id_strategy() -> impl Strategy<Value = AdapterId> {
    (0u8..32).prop_map(|n| AdapterId::from(format!("crm-{}", n)))
}

/// Strategy for generating `n` distinct adapter ids, sorted
pub fn distinct_adapter_ids_strategy(n: usize) -> impl Strategy<Value = Vec<AdapterId>> {
    btree_set(adapter_id_strategy(), n).prop_map(|ids| ids.into_iter().collect())
}

/// Strategy for generating scalar field values
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000i64..1_000).prop_map(Value::from),
        "[a-z]{1,6}(@[a-z]{1,4}\\.com)?".prop_map(Value::String),
    ]
}

/// Strategy for generating field values, including tag lists
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar_value_strategy(),
        1 => vec("[a-z]{1,4}", 0..4)
            .prop_map(|tags| Value::Array(tags.into_iter().map(Value::String).collect())),
    ]
}

/// Strategy for generating entities over a small shared field vocabulary
///
/// The vocabulary is small so that independently generated entities often
/// share fields, which is what conflict detection cares about.
pub fn entity_strategy() -> impl Strategy<Value = NormalizedEntity> {
    btree_map(
        prop_oneof![
            Just("email".to_string()),
            Just("name".to_string()),
            Just("phone".to_string()),
            Just("tags".to_string()),
            Just("score".to_string()),
        ],
        field_value_strategy(),
        0..5,
    )
    .prop_map(|fields| NormalizedEntity {
        external_id: None,
        fields,
        updated_at: None,
    })
}

/// Strategy for generating successful results from distinct adapters
pub fn adapter_entities_strategy(
    max_adapters: usize,
) -> impl Strategy<Value = Vec<(AdapterId, NormalizedEntity)>> {
    (1..=max_adapters).prop_flat_map(|n| {
        (distinct_adapter_ids_strategy(n), vec(entity_strategy(), n))
            .prop_map(|(ids, entities)| ids.into_iter().zip(entities).collect())
    })
}

/// Strategy for generating adapter errors of every kind
pub fn adapter_error_strategy() -> impl Strategy<Value = AdapterError> {
    prop_oneof![
        (1u64..5_000).prop_map(|ms| AdapterError::rate_limited(Duration::from_millis(ms))),
        Just(AdapterError::auth("invalid api key")),
        Just(AdapterError::transient("connection reset")),
        Just(AdapterError::permanent("record locked")),
        Just(AdapterError::malformed("missing email")),
    ]
}

/// Strategy for an adapter's scripted behaviour: `None` succeeds
pub fn adapter_behavior_strategy() -> impl Strategy<Value = Option<AdapterError>> {
    prop_oneof![
        2 => Just(None),
        1 => adapter_error_strategy().prop_map(Some),
    ]
}
