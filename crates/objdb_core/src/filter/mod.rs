//! Filter trees.
//!
//! A [`Filter`] is an immutable predicate over the properties of one
//! collection, addressed by property position. Filters are checked against
//! the collection schema once, when a query is built, and then evaluated
//! against every scanned object with [`Filter::evaluate`].
//!
//! ```rust
//! use objdb_core::Filter;
//!
//! // age > 20 AND name starts with "a" (any case)
//! let filter = Filter::and(vec![
//!     Filter::greater(1, 20),
//!     Filter::starts_with(0, "a").ignore_case(),
//! ]);
//! # let _ = filter;
//! ```

mod eval;
pub mod glob;

use crate::error::{CoreError, CoreResult};
use objdb_codec::{DataType, InstanceSchema, Value};

/// Comparison of a property against an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `==`. A `None` operand matches null properties only.
    Equal,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
}

/// String condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextOp {
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
    /// Substring match.
    Contains,
    /// Wildcard match, see [`glob`].
    Matches,
}

/// A predicate tree node.
///
/// Conditions on list properties match when any element matches. Null
/// properties never satisfy an ordering comparison, a range or a string
/// condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The property is null.
    IsNull {
        /// Property position.
        property: u16,
    },
    /// The property compares to `value` as `op` says.
    Compare {
        /// Property position.
        property: u16,
        /// Comparison.
        op: CompareOp,
        /// Operand; `None` is null.
        value: Option<Value>,
        /// Whether strings compare case-sensitively.
        case_sensitive: bool,
    },
    /// `lower <= property <= upper`.
    Between {
        /// Property position.
        property: u16,
        /// Inclusive lower bound.
        lower: Option<Value>,
        /// Inclusive upper bound.
        upper: Option<Value>,
        /// Whether strings compare case-sensitively.
        case_sensitive: bool,
    },
    /// String condition on a string property.
    Text {
        /// Property position.
        property: u16,
        /// Condition.
        op: TextOp,
        /// Prefix, suffix, substring or wildcard pattern.
        pattern: String,
        /// Whether matching is case-sensitive.
        case_sensitive: bool,
    },
    /// `lower <= len(list) <= upper`.
    ListLength {
        /// Property position of a list.
        property: u16,
        /// Inclusive minimum length.
        lower: u32,
        /// Inclusive maximum length.
        upper: u32,
    },
    /// `filter` holds for the embedded object, or any object of an
    /// embedded list.
    Embedded {
        /// Property position of an object or object list.
        property: u16,
        /// Condition over the embedded collection.
        filter: Box<Filter>,
    },
    /// `lower <= id <= upper`.
    IdBetween {
        /// Inclusive lower bound.
        lower: i64,
        /// Inclusive upper bound.
        upper: i64,
    },
    /// Every child holds. Empty is true.
    And(Vec<Filter>),
    /// Some child holds. Empty is false.
    Or(Vec<Filter>),
    /// The child does not hold.
    Not(Box<Filter>),
}

impl Filter {
    /// `property IS NULL`.
    #[must_use]
    pub fn is_null(property: u16) -> Self {
        Self::IsNull { property }
    }

    /// A case-sensitive comparison; `None` compares against null.
    #[must_use]
    pub fn compare(property: u16, op: CompareOp, value: Option<Value>) -> Self {
        Self::Compare {
            property,
            op,
            value,
            case_sensitive: true,
        }
    }

    /// `property == value`.
    #[must_use]
    pub fn equal(property: u16, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Equal, Some(value.into()))
    }

    /// `property > value`.
    #[must_use]
    pub fn greater(property: u16, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Greater, Some(value.into()))
    }

    /// `property >= value`.
    #[must_use]
    pub fn greater_or_equal(property: u16, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::GreaterOrEqual, Some(value.into()))
    }

    /// `property < value`.
    #[must_use]
    pub fn less(property: u16, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Less, Some(value.into()))
    }

    /// `property <= value`.
    #[must_use]
    pub fn less_or_equal(property: u16, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::LessOrEqual, Some(value.into()))
    }

    /// `lower <= property <= upper`.
    #[must_use]
    pub fn between(property: u16, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self::Between {
            property,
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            case_sensitive: true,
        }
    }

    /// A case-sensitive string condition.
    #[must_use]
    pub fn text(property: u16, op: TextOp, pattern: impl Into<String>) -> Self {
        Self::Text {
            property,
            op,
            pattern: pattern.into(),
            case_sensitive: true,
        }
    }

    /// Prefix match.
    #[must_use]
    pub fn starts_with(property: u16, prefix: impl Into<String>) -> Self {
        Self::text(property, TextOp::StartsWith, prefix)
    }

    /// Suffix match.
    #[must_use]
    pub fn ends_with(property: u16, suffix: impl Into<String>) -> Self {
        Self::text(property, TextOp::EndsWith, suffix)
    }

    /// Substring match.
    #[must_use]
    pub fn contains(property: u16, needle: impl Into<String>) -> Self {
        Self::text(property, TextOp::Contains, needle)
    }

    /// Wildcard match.
    #[must_use]
    pub fn matches(property: u16, pattern: impl Into<String>) -> Self {
        Self::text(property, TextOp::Matches, pattern)
    }

    /// List length in `lower..=upper`.
    #[must_use]
    pub fn list_length(property: u16, lower: u32, upper: u32) -> Self {
        Self::ListLength {
            property,
            lower,
            upper,
        }
    }

    /// Condition on an embedded object.
    #[must_use]
    pub fn embedded(property: u16, filter: Filter) -> Self {
        Self::Embedded {
            property,
            filter: Box::new(filter),
        }
    }

    /// Id in `lower..=upper`.
    #[must_use]
    pub fn id_between(lower: i64, upper: i64) -> Self {
        Self::IdBetween { lower, upper }
    }

    /// Conjunction.
    #[must_use]
    pub fn and(children: Vec<Filter>) -> Self {
        Self::And(children)
    }

    /// Disjunction.
    #[must_use]
    pub fn or(children: Vec<Filter>) -> Self {
        Self::Or(children)
    }

    /// Negation.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Filter) -> Self {
        Self::Not(Box::new(child))
    }

    /// Makes a string comparison case-insensitive. Other nodes are
    /// returned unchanged.
    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        match &mut self {
            Self::Compare { case_sensitive, .. }
            | Self::Between { case_sensitive, .. }
            | Self::Text { case_sensitive, .. } => *case_sensitive = false,
            _ => {}
        }
        self
    }

    /// Checks property positions and operand types against collection
    /// `collection` of `schema`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] naming the first offending node.
    pub fn validate(&self, schema: &InstanceSchema, collection: usize) -> CoreResult<()> {
        let target = schema.collection(collection)?;
        let property_type = |property: u16| {
            target
                .property(property)
                .map(|p| p.data_type)
                .ok_or_else(|| {
                    CoreError::illegal_argument(format!(
                        "collection '{}' has no property {property}",
                        target.name
                    ))
                })
        };
        let mismatch = |property: u16, what: &str| {
            CoreError::illegal_argument(format!(
                "{what} does not apply to property {property} of '{}'",
                target.name
            ))
        };

        match self {
            Self::IsNull { property } => property_type(*property).map(|_| ()),
            Self::Compare {
                property, value, ..
            } => {
                let data_type = property_type(*property)?;
                check_operand(data_type, value.as_ref())
                    .ok_or_else(|| mismatch(*property, "comparison"))
            }
            Self::Between {
                property,
                lower,
                upper,
                ..
            } => {
                let data_type = property_type(*property)?;
                check_operand(data_type, lower.as_ref())
                    .and_then(|()| check_operand(data_type, upper.as_ref()))
                    .ok_or_else(|| mismatch(*property, "range"))
            }
            Self::Text { property, .. } => {
                match property_type(*property)? {
                    DataType::String | DataType::StringList => Ok(()),
                    _ => Err(mismatch(*property, "string condition")),
                }
            }
            Self::ListLength { property, .. } => {
                if property_type(*property)?.is_list() {
                    Ok(())
                } else {
                    Err(mismatch(*property, "list length"))
                }
            }
            Self::Embedded { property, filter } => {
                if !property_type(*property)?.is_object() {
                    return Err(mismatch(*property, "embedded condition"));
                }
                let embedded = target
                    .property(*property)
                    .and_then(|p| p.target_index())
                    .ok_or_else(|| mismatch(*property, "embedded condition"))?;
                filter.validate(schema, embedded)
            }
            Self::IdBetween { .. } => Ok(()),
            Self::And(children) | Self::Or(children) => children
                .iter()
                .try_for_each(|child| child.validate(schema, collection)),
            Self::Not(child) => child.validate(schema, collection),
        }
    }
}

/// `Some(())` if `value` can be compared with properties of `data_type`.
fn check_operand(data_type: DataType, value: Option<&Value>) -> Option<()> {
    let element = data_type.element_type().unwrap_or(data_type);
    let ok = match (element, value) {
        (DataType::Object, _) => false,
        (_, None) => true,
        (DataType::Bool, Some(Value::Bool(_))) => true,
        (DataType::String, Some(Value::String(_))) => true,
        (
            DataType::Byte | DataType::Int | DataType::Long | DataType::Float | DataType::Double,
            Some(Value::Integer(_) | Value::Real(_)),
        ) => true,
        _ => false,
    };
    ok.then_some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> InstanceSchema {
        InstanceSchema::from_json(
            r#"[
                {"name": "Person", "properties": [
                    {"name": "name", "type": "String"},
                    {"name": "age", "type": "Int"},
                    {"name": "tags", "type": "StringList"},
                    {"name": "address", "type": "Object", "target": "Address"}
                ]},
                {"name": "Address", "embedded": true, "properties": [
                    {"name": "city", "type": "String"}
                ]}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn ignore_case_only_touches_string_nodes() {
        let f = Filter::equal(0, "x").ignore_case();
        assert!(matches!(f, Filter::Compare { case_sensitive: false, .. }));
        assert_eq!(Filter::is_null(0).ignore_case(), Filter::is_null(0));
    }

    #[test]
    fn validation_accepts_matching_operands() {
        let schema = schema();
        let filter = Filter::and(vec![
            Filter::greater(1, 20),
            Filter::less(1, 30.5),
            Filter::contains(2, "a"),
            Filter::list_length(2, 0, 3),
            Filter::compare(1, CompareOp::Equal, None),
            Filter::embedded(3, Filter::starts_with(0, "Ber")),
            Filter::not(Filter::is_null(3)),
        ]);
        filter.validate(&schema, 0).unwrap();
    }

    #[test]
    fn validation_rejects_mismatches() {
        let schema = schema();
        for bad in [
            Filter::greater(1, "twenty"),
            Filter::equal(9, 1),
            Filter::starts_with(1, "2"),
            Filter::list_length(0, 0, 1),
            Filter::embedded(0, Filter::is_null(0)),
            Filter::embedded(3, Filter::equal(5, "x")),
            Filter::equal(3, 1),
            Filter::or(vec![Filter::is_null(0), Filter::between(0, 1, 2)]),
        ] {
            let err = bad.validate(&schema, 0).unwrap_err();
            assert!(matches!(err, CoreError::IllegalArgument { .. }), "{bad:?}");
        }
    }
}
