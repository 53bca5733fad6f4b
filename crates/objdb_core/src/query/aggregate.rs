use super::{Cursor, Query};
use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::key::compare_fields;
use crate::transaction::Txn;
use objdb_codec::{DataType, Field, Value};
use std::cmp::Ordering;

/// Aggregations over the results of a query. The integer forms are what
/// the C ABI accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AggregationKind {
    /// Number of results.
    Count = 0,
    /// Whether there are no results.
    IsEmpty = 1,
    /// Smallest non-null value.
    Min = 2,
    /// Largest non-null value.
    Max = 3,
    /// Sum of non-null numbers.
    Sum = 4,
    /// Mean of non-null numbers.
    Average = 5,
}

impl AggregationKind {
    /// Parses the integer form.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Count),
            1 => Some(Self::IsEmpty),
            2 => Some(Self::Min),
            3 => Some(Self::Max),
            4 => Some(Self::Sum),
            5 => Some(Self::Average),
            _ => None,
        }
    }

    fn needs_property(self) -> bool {
        !matches!(self, Self::Count | Self::IsEmpty)
    }
}

/// Running state of one aggregation.
#[derive(Default)]
struct Accumulator {
    count: u64,
    values: u64,
    int_sum: i128,
    float_sum: f64,
    extreme: Option<Value>,
}

impl Accumulator {
    fn add(&mut self, kind: AggregationKind, field: &Field<'_>) {
        self.count += 1;
        match field {
            Field::Int(i) => {
                self.values += 1;
                self.int_sum += i128::from(*i);
                self.float_sum += *i as f64;
            }
            Field::Float(f) => {
                self.values += 1;
                self.float_sum += f;
            }
            Field::Bool(_) | Field::String(_) => self.values += 1,
            _ => return,
        }
        let wanted = match kind {
            AggregationKind::Min => Ordering::Less,
            AggregationKind::Max => Ordering::Greater,
            _ => return,
        };
        let replace = match &self.extreme {
            None => true,
            Some(current) => compare_fields(field, &as_field(current), true) == wanted,
        };
        if replace {
            self.extreme = to_value(field);
        }
    }

    fn finish(self, kind: AggregationKind, data_type: Option<DataType>) -> Option<Value> {
        let integral = data_type.is_some_and(DataType::is_integer);
        match kind {
            AggregationKind::Count => Some(Value::Integer(self.count as i64)),
            AggregationKind::IsEmpty => Some(Value::Bool(self.count == 0)),
            AggregationKind::Min | AggregationKind::Max => self.extreme,
            AggregationKind::Sum if integral => Some(
                i64::try_from(self.int_sum)
                    .map(Value::Integer)
                    .unwrap_or(Value::Real(self.int_sum as f64)),
            ),
            AggregationKind::Sum => Some(Value::Real(self.float_sum)),
            AggregationKind::Average if self.values == 0 => None,
            AggregationKind::Average if integral => {
                Some(Value::Real(self.int_sum as f64 / self.values as f64))
            }
            AggregationKind::Average => Some(Value::Real(self.float_sum / self.values as f64)),
        }
    }
}

fn to_value(field: &Field<'_>) -> Option<Value> {
    match field {
        Field::Bool(b) => Some(Value::Bool(*b)),
        Field::Int(i) => Some(Value::Integer(*i)),
        Field::Float(f) => Some(Value::Real(*f)),
        Field::String(s) => Some(Value::String((*s).to_owned())),
        _ => None,
    }
}

fn as_field(value: &Value) -> Field<'_> {
    match value {
        Value::Bool(b) => Field::Bool(*b),
        Value::Integer(i) => Field::Int(*i),
        Value::Real(f) => Field::Float(*f),
        Value::String(s) => Field::String(s),
    }
}

/// Aggregates `property` over every result of `query`, ignoring the
/// window.
///
/// Count and IsEmpty ignore `property`. Min and Max accept any scalar
/// property, Sum and Average only numbers. Min, Max and Average of no
/// values are `None`; Sum of no values is zero.
///
/// # Errors
///
/// [`CoreError::IllegalArgument`] for a missing or unsuitable property.
pub(crate) fn aggregate(
    collection: &Collection,
    txn: &Txn,
    query: &Query,
    kind: AggregationKind,
    property: Option<u16>,
) -> CoreResult<Option<Value>> {
    txn.check_active()?;
    let data_type = match (kind.needs_property(), property) {
        (false, _) => None,
        (true, None) => {
            return Err(CoreError::illegal_argument(format!(
                "{kind:?} needs a property"
            )))
        }
        (true, Some(property)) => {
            let schema = collection.schema();
            let data_type = schema
                .property(property)
                .map(|p| p.data_type)
                .ok_or_else(|| {
                    CoreError::illegal_argument(format!(
                        "collection '{}' has no property {property}",
                        schema.name
                    ))
                })?;
            let numeric = data_type.is_integer() || data_type.is_float();
            let fits = !data_type.is_list()
                && !data_type.is_object()
                && (numeric || matches!(kind, AggregationKind::Min | AggregationKind::Max));
            if !fits {
                return Err(CoreError::illegal_argument(format!(
                    "cannot compute {kind:?} of {:?} property {property}",
                    data_type
                )));
            }
            Some(data_type)
        }
    };

    let mut acc = Accumulator::default();
    let mut add = |reader: &objdb_codec::ObjectReader<'_>| match property {
        Some(property) if kind.needs_property() => acc.add(kind, &reader.read_field(property)),
        _ => acc.count += 1,
    };

    if query.distinct.is_empty() {
        let mut after = None;
        while let Some((id, body)) = collection.next(txn, after) {
            after = Some(id);
            let reader = collection.reader(id, &body)?;
            if query.accepts(&reader) {
                add(&reader);
                if kind == AggregationKind::IsEmpty {
                    break;
                }
            }
        }
    } else {
        for object in Cursor::collect_ordered(collection, txn, query)? {
            add(&object.reader()?);
        }
    }
    Ok(acc.finish(kind, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for kind in [
            AggregationKind::Count,
            AggregationKind::IsEmpty,
            AggregationKind::Min,
            AggregationKind::Max,
            AggregationKind::Sum,
            AggregationKind::Average,
        ] {
            assert_eq!(AggregationKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(AggregationKind::from_u8(6), None);
    }

    #[test]
    fn accumulator_tracks_extremes_and_sums() {
        let mut min = Accumulator::default();
        let mut max = Accumulator::default();
        for field in [Field::Int(5), Field::Null, Field::Int(-2), Field::Int(9)] {
            min.add(AggregationKind::Min, &field);
            max.add(AggregationKind::Max, &field);
        }
        assert_eq!(min.finish(AggregationKind::Min, Some(DataType::Int)), Some(Value::Integer(-2)));
        assert_eq!(max.finish(AggregationKind::Max, Some(DataType::Int)), Some(Value::Integer(9)));

        let mut sum = Accumulator::default();
        for i in [i64::MAX, i64::MAX] {
            sum.add(AggregationKind::Sum, &Field::Int(i));
        }
        assert!(matches!(
            sum.finish(AggregationKind::Sum, Some(DataType::Long)),
            Some(Value::Real(_))
        ));
    }

    #[test]
    fn empty_inputs() {
        let empty = || Accumulator::default();
        assert_eq!(empty().finish(AggregationKind::Sum, Some(DataType::Int)), Some(Value::Integer(0)));
        assert_eq!(empty().finish(AggregationKind::Sum, Some(DataType::Double)), Some(Value::Real(0.0)));
        assert_eq!(empty().finish(AggregationKind::Average, Some(DataType::Int)), None);
        assert_eq!(empty().finish(AggregationKind::Min, Some(DataType::String)), None);
        assert_eq!(empty().finish(AggregationKind::IsEmpty, None), Some(Value::Bool(true)));
        assert_eq!(empty().finish(AggregationKind::Count, None), Some(Value::Integer(0)));
    }

    #[test]
    fn string_extremes() {
        let mut acc = Accumulator::default();
        for s in ["pear", "apple", "zucchini"] {
            acc.add(AggregationKind::Max, &Field::String(s));
        }
        assert_eq!(
            acc.finish(AggregationKind::Max, Some(DataType::String)),
            Some(Value::String("zucchini".into()))
        );
    }
}
