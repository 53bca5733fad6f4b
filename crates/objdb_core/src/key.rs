//! Byte keys and orderings over decoded fields.
//!
//! Keys identify equal values for unique indexes and distinct queries;
//! [`compare_fields`] orders values for sorting.

use objdb_codec::{Field, ObjectReader};
use std::cmp::Ordering;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_OBJECT: u8 = 5;
const TAG_LIST: u8 = 6;

/// Appends a key for `field` to `out`. Strings are lowercased when
/// `case_sensitive` is false.
pub fn write_key(field: &Field<'_>, case_sensitive: bool, out: &mut Vec<u8>) {
    match field {
        Field::Null => out.push(TAG_NULL),
        Field::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Field::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Field::Float(f) => {
            out.push(TAG_FLOAT);
            let normalized = if *f == 0.0 { 0.0f64 } else { *f };
            out.extend_from_slice(&normalized.to_bits().to_be_bytes());
        }
        Field::String(s) => {
            out.push(TAG_STRING);
            if case_sensitive {
                push_bytes(out, s.as_bytes());
            } else {
                push_bytes(out, s.to_lowercase().as_bytes());
            }
        }
        Field::Object(o) => {
            out.push(TAG_OBJECT);
            push_bytes(out, o.as_bytes());
        }
        Field::List(list) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&list.len().to_be_bytes());
            for element in list.iter() {
                write_key(&element, case_sensitive, out);
            }
        }
    }
}

fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Key over several properties of `reader`.
#[must_use]
pub fn object_key(reader: &ObjectReader<'_>, properties: &[(u16, bool)]) -> Vec<u8> {
    let mut key = Vec::new();
    for &(property, case_sensitive) in properties {
        write_key(&reader.read_field(property), case_sensitive, &mut key);
    }
    key
}

fn rank(field: &Field<'_>) -> u8 {
    match field {
        Field::Null => 0,
        Field::Bool(_) => 1,
        Field::Int(_) | Field::Float(_) => 2,
        Field::String(_) => 3,
        Field::Object(_) => 4,
        Field::List(_) => 5,
    }
}

/// Natural ordering of two fields. Null sorts first; integers and floats
/// compare numerically; lists compare element-wise; objects are equal.
#[must_use]
pub fn compare_fields(a: &Field<'_>, b: &Field<'_>, case_sensitive: bool) -> Ordering {
    match (a, b) {
        (Field::Bool(x), Field::Bool(y)) => x.cmp(y),
        (Field::Int(x), Field::Int(y)) => x.cmp(y),
        (Field::Int(x), Field::Float(y)) => (*x as f64).total_cmp(y),
        (Field::Float(x), Field::Int(y)) => x.total_cmp(&(*y as f64)),
        (Field::Float(x), Field::Float(y)) => x.total_cmp(y),
        (Field::String(x), Field::String(y)) => compare_str(x, y, case_sensitive),
        (Field::List(x), Field::List(y)) => {
            let mut left = x.iter();
            let mut right = y.iter();
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(l), Some(r)) => match compare_fields(&l, &r, case_sensitive) {
                        Ordering::Equal => {}
                        other => return other,
                    },
                }
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Compares strings, lowercasing both first when `case_sensitive` is false.
#[must_use]
pub fn compare_str(a: &str, b: &str, case_sensitive: bool) -> Ordering {
    if case_sensitive {
        a.cmp(b)
    } else {
        a.to_lowercase().cmp(&b.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(field: Field<'_>, cs: bool) -> Vec<u8> {
        let mut out = Vec::new();
        write_key(&field, cs, &mut out);
        out
    }

    #[test]
    fn case_folding_merges_keys() {
        assert_ne!(key(Field::String("Ab"), true), key(Field::String("aB"), true));
        assert_eq!(key(Field::String("Ab"), false), key(Field::String("aB"), false));
    }

    #[test]
    fn signed_zero_is_one_key() {
        assert_eq!(key(Field::Float(0.0), true), key(Field::Float(-0.0), true));
        assert_ne!(key(Field::Int(0), true), key(Field::Float(0.0), true));
    }

    #[test]
    fn string_keys_are_length_prefixed() {
        let mut ab_c = key(Field::String("ab"), true);
        ab_c.extend(key(Field::String("c"), true));
        let mut a_bc = key(Field::String("a"), true);
        a_bc.extend(key(Field::String("bc"), true));
        assert_ne!(ab_c, a_bc);
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(
            compare_fields(&Field::Null, &Field::Int(i64::MIN), true),
            Ordering::Less
        );
        assert_eq!(
            compare_fields(&Field::Int(2), &Field::Float(1.5), true),
            Ordering::Greater
        );
        assert_eq!(
            compare_fields(&Field::String("b"), &Field::String("A"), false),
            Ordering::Greater
        );
        assert_eq!(
            compare_fields(&Field::String("b"), &Field::String("A"), true),
            Ordering::Greater
        );
        assert_eq!(
            compare_fields(&Field::String("a"), &Field::String("B"), true),
            Ordering::Greater
        );
    }
}
