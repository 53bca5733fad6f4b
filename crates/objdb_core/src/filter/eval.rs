use super::glob;
use super::{CompareOp, Filter, TextOp};
use crate::key::compare_str;
use objdb_codec::{Field, ObjectReader, Value};
use std::cmp::Ordering;

impl Filter {
    /// Whether the object read by `reader` satisfies this filter.
    ///
    /// `And` stops at the first false child, `Or` at the first true one.
    #[must_use]
    pub fn evaluate(&self, reader: &ObjectReader<'_>) -> bool {
        match self {
            Self::IsNull { property } => reader.read_field(*property).is_null(),
            Self::Compare {
                property,
                op,
                value,
                case_sensitive,
            } => any_element(reader.read_field(*property), |field| {
                compare(field, *op, value.as_ref(), *case_sensitive)
            }),
            Self::Between {
                property,
                lower,
                upper,
                case_sensitive,
            } => {
                let (Some(lower), Some(upper)) = (lower, upper) else {
                    return false;
                };
                any_element(reader.read_field(*property), |field| {
                    order(field, lower, *case_sensitive).is_some_and(Ordering::is_ge)
                        && order(field, upper, *case_sensitive).is_some_and(Ordering::is_le)
                })
            }
            Self::Text {
                property,
                op,
                pattern,
                case_sensitive,
            } => any_element(reader.read_field(*property), |field| match field {
                Field::String(text) => text_matches(text, *op, pattern, *case_sensitive),
                _ => false,
            }),
            Self::ListLength {
                property,
                lower,
                upper,
            } => match reader.read_field(*property) {
                Field::List(list) => (*lower..=*upper).contains(&list.len()),
                _ => false,
            },
            Self::Embedded { property, filter } => {
                any_element(reader.read_field(*property), |field| match field {
                    Field::Object(object) => filter.evaluate(object),
                    _ => false,
                })
            }
            Self::IdBetween { lower, upper } => (*lower..=*upper).contains(&reader.read_id()),
            Self::And(children) => children.iter().all(|child| child.evaluate(reader)),
            Self::Or(children) => children.iter().any(|child| child.evaluate(reader)),
            Self::Not(child) => !child.evaluate(reader),
        }
    }
}

/// Applies `test` to a scalar, or to each element of a list until one
/// passes.
fn any_element(field: Field<'_>, mut test: impl FnMut(&Field<'_>) -> bool) -> bool {
    match field {
        Field::List(list) => list.iter().any(|element| test(&element)),
        other => test(&other),
    }
}

fn compare(field: &Field<'_>, op: CompareOp, value: Option<&Value>, case_sensitive: bool) -> bool {
    let Some(value) = value else {
        return op == CompareOp::Equal && field.is_null();
    };
    let Some(ordering) = order(field, value, case_sensitive) else {
        return false;
    };
    match op {
        CompareOp::Equal => ordering.is_eq(),
        CompareOp::Greater => ordering.is_gt(),
        CompareOp::GreaterOrEqual => ordering.is_ge(),
        CompareOp::Less => ordering.is_lt(),
        CompareOp::LessOrEqual => ordering.is_le(),
    }
}

/// How `field` orders against `value`; `None` when they are not
/// comparable, null included.
fn order(field: &Field<'_>, value: &Value, case_sensitive: bool) -> Option<Ordering> {
    match (field, value) {
        (Field::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Field::Int(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Field::Int(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
        (Field::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Field::Float(a), Value::Real(b)) => a.partial_cmp(b),
        (Field::String(a), Value::String(b)) => Some(compare_str(a, b, case_sensitive)),
        _ => None,
    }
}

fn text_matches(text: &str, op: TextOp, pattern: &str, case_sensitive: bool) -> bool {
    if !case_sensitive {
        return text_matches(&text.to_lowercase(), op, &pattern.to_lowercase(), true);
    }
    match op {
        TextOp::StartsWith => text.starts_with(pattern),
        TextOp::EndsWith => text.ends_with(pattern),
        TextOp::Contains => text.contains(pattern),
        TextOp::Matches => glob::matches(pattern, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_codec::{InstanceSchema, ObjectWriter};

    const SCHEMA: &str = r#"[
        {"name": "Person", "properties": [
            {"name": "name", "type": "String"},
            {"name": "age", "type": "Int"},
            {"name": "score", "type": "Double"},
            {"name": "tags", "type": "StringList"},
            {"name": "address", "type": "Object", "target": "Address"},
            {"name": "active", "type": "Bool"}
        ]},
        {"name": "Address", "embedded": true, "properties": [
            {"name": "city", "type": "String"}
        ]}
    ]"#;

    struct Person {
        name: Option<&'static str>,
        age: Option<i32>,
        score: f64,
        tags: &'static [&'static str],
        city: Option<&'static str>,
    }

    fn encode(schema: &InstanceSchema, p: &Person) -> Vec<u8> {
        let mut w = ObjectWriter::for_collection(schema, 0).unwrap();
        if let Some(name) = p.name {
            w.write_string(0, name).unwrap();
        }
        if let Some(age) = p.age {
            w.write_int(1, age).unwrap();
        }
        w.write_double(2, p.score).unwrap();
        let mut tags = w.write_list(3, p.tags.len() as u32).unwrap();
        for (i, tag) in p.tags.iter().enumerate() {
            tags.write_string(i as u32, tag).unwrap();
        }
        w.write_list_end(tags).unwrap();
        if let Some(city) = p.city {
            let mut address = w.write_object(4).unwrap();
            address.write_string(0, city).unwrap();
            w.write_object_end(address).unwrap();
        }
        w.write_bool(5, true).unwrap();
        w.finish().unwrap()
    }

    fn check(filter: &Filter, person: &Person) -> bool {
        let schema = InstanceSchema::from_json(SCHEMA).unwrap();
        filter.validate(&schema, 0).unwrap();
        let bytes = encode(&schema, person);
        let reader = ObjectReader::new(7, &bytes, &schema, 0).unwrap();
        filter.evaluate(&reader)
    }

    const ADA: Person = Person {
        name: Some("Ada"),
        age: Some(36),
        score: 9.5,
        tags: &["math", "Engines"],
        city: Some("London"),
    };

    const NOBODY: Person = Person {
        name: None,
        age: None,
        score: 0.0,
        tags: &[],
        city: None,
    };

    #[test]
    fn comparisons() {
        assert!(check(&Filter::equal(1, 36), &ADA));
        assert!(check(&Filter::greater(1, 35), &ADA));
        assert!(!check(&Filter::greater(1, 36), &ADA));
        assert!(check(&Filter::greater_or_equal(1, 36), &ADA));
        assert!(check(&Filter::less(1, 36.5), &ADA));
        assert!(check(&Filter::less_or_equal(2, 9.5), &ADA));
        assert!(check(&Filter::between(1, 30, 36), &ADA));
        assert!(!check(&Filter::between(1, 37, 40), &ADA));
        assert!(check(&Filter::equal(5, true), &ADA));
        assert!(check(&Filter::id_between(7, 7), &ADA));
    }

    #[test]
    fn null_semantics() {
        assert!(check(&Filter::is_null(1), &NOBODY));
        assert!(check(&Filter::compare(1, CompareOp::Equal, None), &NOBODY));
        assert!(!check(&Filter::compare(1, CompareOp::Equal, None), &ADA));
        assert!(!check(&Filter::compare(1, CompareOp::Greater, None), &ADA));
        assert!(!check(&Filter::less(1, 100), &NOBODY));
        assert!(!check(&Filter::not(Filter::is_null(1)), &NOBODY));
        assert!(!check(
            &Filter::Between {
                property: 1,
                lower: None,
                upper: Some(Value::Integer(100)),
                case_sensitive: true,
            },
            &ADA
        ));
    }

    #[test]
    fn strings_and_case_folding() {
        assert!(check(&Filter::starts_with(0, "Ad"), &ADA));
        assert!(!check(&Filter::starts_with(0, "ad"), &ADA));
        assert!(check(&Filter::starts_with(0, "ad").ignore_case(), &ADA));
        assert!(check(&Filter::ends_with(0, "DA").ignore_case(), &ADA));
        assert!(check(&Filter::contains(0, "d"), &ADA));
        assert!(check(&Filter::matches(0, "A?a"), &ADA));
        assert!(!check(&Filter::not(Filter::matches(0, "a*").ignore_case()), &ADA));
        assert!(check(&Filter::equal(0, "ADA").ignore_case(), &ADA));
        assert!(check(&Filter::greater(0, "Ab"), &ADA));
        assert!(!check(&Filter::starts_with(0, ""), &NOBODY));
    }

    #[test]
    fn lists_match_any_element() {
        assert!(check(&Filter::equal(3, "math"), &ADA));
        assert!(check(&Filter::equal(3, "engines").ignore_case(), &ADA));
        assert!(!check(&Filter::equal(3, "engines"), &ADA));
        assert!(check(&Filter::list_length(3, 2, 2), &ADA));
        assert!(check(&Filter::list_length(3, 0, 0), &NOBODY));
        assert!(!check(&Filter::equal(3, "math"), &NOBODY));
    }

    #[test]
    fn embedded_objects() {
        let in_london = Filter::embedded(4, Filter::equal(0, "London"));
        assert!(check(&in_london, &ADA));
        assert!(!check(&in_london, &NOBODY));
        assert!(check(&Filter::is_null(4), &NOBODY));
    }

    #[test]
    fn combinators() {
        let yes = Filter::equal(1, 36);
        let no = Filter::equal(1, 1);
        assert!(check(&Filter::and(vec![yes.clone(), yes.clone()]), &ADA));
        assert!(!check(&Filter::and(vec![yes.clone(), no.clone()]), &ADA));
        assert!(check(&Filter::or(vec![no.clone(), yes.clone()]), &ADA));
        assert!(!check(&Filter::or(vec![]), &ADA));
        assert!(check(&Filter::and(vec![]), &ADA));
        assert!(check(&Filter::not(no), &ADA));
    }
}
