//! Reference model for differential testing.
//!
//! [`Model`] keeps people in a plain map and answers queries by brute
//! force. Property tests drive the engine and the model with the same
//! operations and compare every answer.

use crate::fixtures::{Person, AGE, NAME};
use crate::generators::Operation;
use objdb_core::{
    apply_patch, CompareOp, CoreResult, Filter, Instance, Sort, TextOp, Txn, Value,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Committed people by id.
#[derive(Debug, Clone, Default)]
pub struct Model {
    people: BTreeMap<i64, Person>,
}

impl Model {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of people.
    pub fn len(&self) -> usize {
        self.people.len()
    }

    /// Whether the model is empty.
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Id of the `slot`-th person, modulo the count.
    pub fn id_at(&self, slot: usize) -> Option<i64> {
        if self.people.is_empty() {
            return None;
        }
        self.people.keys().nth(slot % self.people.len()).copied()
    }

    /// Records `person` under `id`.
    pub fn insert(&mut self, id: i64, person: Person) {
        self.people.insert(id, Person { id: Some(id), ..person });
    }

    /// Sets the age of `id`.
    pub fn set_age(&mut self, id: i64, age: Option<i32>) -> bool {
        self.people.get_mut(&id).map(|p| p.age = age).is_some()
    }

    /// Deletes `id`.
    pub fn delete(&mut self, id: i64) -> bool {
        self.people.remove(&id).is_some()
    }

    /// Deletes everyone.
    pub fn clear(&mut self) {
        self.people.clear();
    }

    /// Every person, in id order.
    pub fn people(&self) -> Vec<Person> {
        self.people.values().cloned().collect()
    }

    /// Ids of the `offset`/`limit` window of the people matching `filter`,
    /// ordered by `sort` and then by id, keeping the first person per
    /// `distinct` value.
    pub fn query(
        &self,
        filter: Option<&Filter>,
        sort: Option<(u16, Sort)>,
        distinct: Option<u16>,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<i64> {
        let mut hits: Vec<&Person> = self
            .people
            .values()
            .filter(|p| filter.map_or(true, |f| matches(f, p)))
            .collect();
        if let Some((property, order)) = sort {
            hits.sort_by(|a, b| {
                let ordering = match property {
                    NAME => a.name.cmp(&b.name),
                    AGE => a.age.cmp(&b.age),
                    other => panic!("the model does not sort by property {other}"),
                };
                match order {
                    Sort::Asc => ordering,
                    Sort::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(property) = distinct {
            let mut seen = HashSet::new();
            hits.retain(|p| match property {
                NAME => seen.insert(format!("{:?}", p.name)),
                AGE => seen.insert(format!("{:?}", p.age)),
                other => panic!("the model has no property {other}"),
            });
        }
        hits.into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|p| p.id)
            .collect()
    }

    /// Applies `op` to the engine and to the model.
    pub fn apply(&mut self, db: &Instance, op: &Operation) -> CoreResult<()> {
        match op {
            Operation::Insert(people) => {
                let mut txn = db.begin_txn(true)?;
                let ids = insert_people(db, &mut txn, people)?;
                db.commit_txn(txn)?;
                for (id, person) in ids.into_iter().zip(people) {
                    self.insert(id, person.clone());
                }
            }
            Operation::SetAge { slot, age } => {
                let Some(id) = self.id_at(*slot) else {
                    return Ok(());
                };
                let mut txn = db.begin_txn(true)?;
                let value = age.map(|a| Value::Integer(a.into()));
                let updated = db.update(&mut txn, 0, id, &[(AGE, value)])?;
                db.commit_txn(txn)?;
                assert!(updated, "live object {id} was not updated");
                self.set_age(id, *age);
            }
            Operation::Delete { slot } => {
                let Some(id) = self.id_at(*slot) else {
                    return Ok(());
                };
                let mut txn = db.begin_txn(true)?;
                let deleted = db.delete(&mut txn, 0, id)?;
                db.commit_txn(txn)?;
                assert!(deleted, "live object {id} was not deleted");
                self.delete(id);
            }
            Operation::Clear => {
                let mut txn = db.begin_txn(true)?;
                db.clear(&mut txn, 0)?;
                db.commit_txn(txn)?;
                self.clear();
            }
            Operation::AbortedInsert(people) => {
                let mut txn = db.begin_txn(true)?;
                insert_people(db, &mut txn, people)?;
                db.abort_txn(txn)?;
            }
        }
        Ok(())
    }
}

/// Inserts `people` through an insert session and returns the new ids.
pub fn insert_people(db: &Instance, txn: &mut Txn, people: &[Person]) -> CoreResult<Vec<i64>> {
    let count = u32::try_from(people.len()).unwrap_or(u32::MAX);
    let mut session = db.insert(txn, 0, count)?;
    let mut ids = Vec::with_capacity(people.len());
    for person in people {
        let mut writer = session.writer()?;
        apply_patch(
            &mut writer,
            &[
                (NAME, person.name.clone().map(Value::String)),
                (AGE, person.age.map(|a| Value::Integer(a.into()))),
            ],
        )?;
        ids.push(writer.save(person.id)?);
    }
    Ok(ids)
}

/// Ids the engine returns for the same query as [`Model::query`].
pub fn engine_query(
    db: &Instance,
    filter: Option<&Filter>,
    sort: Option<(u16, Sort)>,
    distinct: Option<u16>,
    offset: u32,
    limit: Option<u32>,
) -> CoreResult<Vec<i64>> {
    let mut builder = db.query(0)?;
    if let Some(filter) = filter {
        builder.set_filter(filter.clone());
    }
    if let Some((property, order)) = sort {
        builder.sort_by(property, order, true);
    }
    if let Some(property) = distinct {
        builder.distinct_by(property, true);
    }
    let query = builder.build()?;
    let txn = db.begin_txn(false)?;
    let ids = db
        .cursor(&txn, &query, offset, limit)?
        .map(|object| object.map(|o| o.id()))
        .collect::<CoreResult<Vec<_>>>();
    db.abort_txn(txn)?;
    ids
}

/// Whether `person` satisfies `filter`, decided without the engine.
///
/// # Panics
///
/// For filter nodes the model does not cover.
pub fn matches(filter: &Filter, person: &Person) -> bool {
    match filter {
        Filter::IsNull { property } => match *property {
            NAME => person.name.is_none(),
            AGE => person.age.is_none(),
            other => panic!("the model has no property {other}"),
        },
        Filter::Compare {
            property,
            op,
            value,
            case_sensitive,
        } => {
            let Some(value) = value else {
                return *op == CompareOp::Equal && matches(&Filter::is_null(*property), person);
            };
            order(person, *property, value, *case_sensitive).is_some_and(|ordering| match op {
                CompareOp::Equal => ordering.is_eq(),
                CompareOp::Greater => ordering.is_gt(),
                CompareOp::GreaterOrEqual => ordering.is_ge(),
                CompareOp::Less => ordering.is_lt(),
                CompareOp::LessOrEqual => ordering.is_le(),
            })
        }
        Filter::Between {
            property,
            lower: Some(lower),
            upper: Some(upper),
            case_sensitive,
        } => {
            order(person, *property, lower, *case_sensitive).is_some_and(Ordering::is_ge)
                && order(person, *property, upper, *case_sensitive).is_some_and(Ordering::is_le)
        }
        Filter::Between { .. } => false,
        Filter::Text {
            property: NAME,
            op,
            pattern,
            case_sensitive,
        } => person.name.as_deref().is_some_and(|name| {
            let (name, pattern) = if *case_sensitive {
                (name.to_string(), pattern.clone())
            } else {
                (name.to_lowercase(), pattern.to_lowercase())
            };
            match op {
                TextOp::StartsWith => name.starts_with(&pattern),
                TextOp::EndsWith => name.ends_with(&pattern),
                TextOp::Contains => name.contains(&pattern),
                TextOp::Matches => panic!("the model does not match wildcards"),
            }
        }),
        Filter::IdBetween { lower, upper } => person.id.is_some_and(|id| (*lower..=*upper).contains(&id)),
        Filter::And(children) => children.iter().all(|c| matches(c, person)),
        Filter::Or(children) => children.iter().any(|c| matches(c, person)),
        Filter::Not(child) => !matches(child, person),
        other => panic!("the model does not cover {other:?}"),
    }
}

fn order(person: &Person, property: u16, value: &Value, case_sensitive: bool) -> Option<Ordering> {
    match (property, value) {
        (AGE, Value::Integer(v)) => person.age.map(|age| i64::from(age).cmp(v)),
        (NAME, Value::String(v)) => person.name.as_deref().map(|name| {
            if case_sensitive {
                name.cmp(v.as_str())
            } else {
                name.to_lowercase().cmp(&v.to_lowercase())
            }
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestInstance;
    use crate::generators::{filter_strategy, operations_strategy, sort_strategy};
    use proptest::prelude::*;

    /// Runs `ops` against a fresh memory instance and the model.
    fn replay(ops: &[Operation]) -> (TestInstance, Model) {
        let test = TestInstance::memory();
        let mut model = Model::new();
        for op in ops {
            model.apply(&test, op).unwrap();
        }
        (test, model)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn committed_state_matches_the_model(ops in operations_strategy(24)) {
            let (test, model) = replay(&ops);
            prop_assert_eq!(test.people(), model.people());
            let txn = test.begin_txn(false).unwrap();
            prop_assert_eq!(test.count(&txn, 0).unwrap() as usize, model.len());
        }

        #[test]
        fn filters_agree_with_the_model(
            ops in operations_strategy(16),
            filter in filter_strategy(),
        ) {
            let (test, model) = replay(&ops);
            let expected = model.query(Some(&filter), None, None, 0, None);
            let actual = engine_query(&test, Some(&filter), None, None, 0, None).unwrap();
            prop_assert_eq!(actual, expected, "filter {:?}", filter);
        }

        #[test]
        fn windows_agree_with_the_model(
            ops in operations_strategy(16),
            filter in prop::option::of(filter_strategy()),
            sort in sort_strategy(),
            distinct in prop::option::of(prop_oneof![Just(NAME), Just(AGE)]),
            offset in 0u32..8,
            limit in prop::option::of(0u32..8),
        ) {
            let (test, model) = replay(&ops);
            let window = (offset as usize, limit.map(|l| l as usize));
            let expected = model.query(filter.as_ref(), sort, distinct, window.0, window.1);
            let actual = engine_query(&test, filter.as_ref(), sort, distinct, offset, limit).unwrap();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn reopened_instances_match_the_model(ops in operations_strategy(12)) {
            let mut test = TestInstance::native();
            let mut model = Model::new();
            for op in &ops {
                model.apply(&test, op).unwrap();
            }
            test.reopen();
            prop_assert_eq!(test.people(), model.people());
        }
    }

    #[test]
    fn model_handles_null_comparisons() {
        let person = Person {
            id: Some(1),
            name: None,
            age: None,
        };
        assert!(matches(&Filter::compare(AGE, CompareOp::Equal, None), &person));
        assert!(!matches(&Filter::less(AGE, 10), &person));
        assert!(matches(&Filter::not(Filter::less(AGE, 10)), &person));
    }
}
