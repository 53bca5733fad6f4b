//! Property-based test generators using proptest.
//!
//! Provides strategies for people, operation sequences and filters over
//! the [`PEOPLE`](crate::PEOPLE) schema.

use crate::fixtures::{Person, AGE, NAME};
use objdb_core::{CompareOp, Filter, Sort, TextOp, Value};
use proptest::prelude::*;

/// Strategy for short names from a small alphabet, so filters hit often.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-cA-C][a-c]{0,3}").expect("Invalid regex")
}

/// Strategy for people; either property may be null.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (prop::option::weighted(0.9, name_strategy()), prop::option::weighted(0.8, 0i32..100))
        .prop_map(|(name, age)| Person { id: None, name, age })
}

/// A step of a random workload.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert people and commit.
    Insert(Vec<Person>),
    /// Set the age of the `slot`-th live object (modulo the live count).
    SetAge {
        /// Which live object.
        slot: usize,
        /// New age.
        age: Option<i32>,
    },
    /// Delete the `slot`-th live object.
    Delete {
        /// Which live object.
        slot: usize,
    },
    /// Delete everything.
    Clear,
    /// Insert people, then abort.
    AbortedInsert(Vec<Person>),
}

/// Strategy for one operation.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => prop::collection::vec(person_strategy(), 1..6).prop_map(Operation::Insert),
        3 => (any::<usize>(), prop::option::of(0i32..100))
            .prop_map(|(slot, age)| Operation::SetAge { slot, age }),
        2 => any::<usize>().prop_map(|slot| Operation::Delete { slot }),
        1 => Just(Operation::Clear),
        1 => prop::collection::vec(person_strategy(), 1..4).prop_map(Operation::AbortedInsert),
    ]
}

/// Strategy for a sequence of operations.
pub fn operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), 1..max_len)
}

fn compare_op_strategy() -> impl Strategy<Value = CompareOp> {
    prop_oneof![
        Just(CompareOp::Equal),
        Just(CompareOp::Greater),
        Just(CompareOp::GreaterOrEqual),
        Just(CompareOp::Less),
        Just(CompareOp::LessOrEqual),
    ]
}

fn text_op_strategy() -> impl Strategy<Value = TextOp> {
    prop_oneof![
        Just(TextOp::StartsWith),
        Just(TextOp::EndsWith),
        Just(TextOp::Contains),
    ]
}

fn sensitivity(filter: Filter, case_sensitive: bool) -> Filter {
    if case_sensitive {
        filter
    } else {
        filter.ignore_case()
    }
}

/// Strategy for a single condition on a person.
pub fn leaf_filter_strategy() -> impl Strategy<Value = Filter> {
    prop_oneof![
        prop_oneof![Just(NAME), Just(AGE)].prop_map(Filter::is_null),
        (compare_op_strategy(), 0i64..100)
            .prop_map(|(op, age)| Filter::compare(AGE, op, Some(Value::Integer(age)))),
        (compare_op_strategy(), name_strategy(), any::<bool>()).prop_map(|(op, name, cs)| {
            sensitivity(Filter::compare(NAME, op, Some(Value::String(name))), cs)
        }),
        (0i64..100, 0i64..100).prop_map(|(a, b)| Filter::between(AGE, a.min(b), a.max(b))),
        (text_op_strategy(), "[a-cA-C]{1,2}", any::<bool>())
            .prop_map(|(op, pattern, cs)| sensitivity(Filter::text(NAME, op, pattern), cs)),
        (0i64..40, 0i64..40).prop_map(|(a, b)| Filter::id_between(a.min(b), a.max(b))),
    ]
}

/// Strategy for nested filters of bounded depth.
pub fn filter_strategy() -> impl Strategy<Value = Filter> {
    leaf_filter_strategy().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Filter::and),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Filter::or),
            inner.prop_map(Filter::not),
        ]
    })
}

/// Strategy for an optional sort key over name or age.
pub fn sort_strategy() -> impl Strategy<Value = Option<(u16, Sort)>> {
    prop::option::of((
        prop_oneof![Just(NAME), Just(AGE)],
        prop_oneof![Just(Sort::Asc), Just(Sort::Desc)],
    ))
}
