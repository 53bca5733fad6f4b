//! Partial updates.

use crate::error::{CoreError, CoreResult};
use objdb_codec::{DataType, ObjectWriter, Value};

/// Writes every `(property, value)` of `patch` into `writer`; `None`
/// writes null.
///
/// Integers are accepted for float properties. Nested objects and lists
/// cannot be patched.
///
/// # Errors
///
/// [`CoreError::IllegalArgument`] when a value does not fit its property.
pub fn apply_patch(writer: &mut ObjectWriter<'_>, patch: &[(u16, Option<Value>)]) -> CoreResult<()> {
    let collection = writer.collection();
    for (index, value) in patch {
        let index = *index;
        let property = collection.property(index).ok_or_else(|| {
            CoreError::illegal_argument(format!(
                "{} has no property {index}",
                collection.name
            ))
        })?;
        let Some(value) = value else {
            writer.write_null(index)?;
            continue;
        };
        let bad = || {
            CoreError::illegal_argument(format!(
                "cannot write {} {value} to {}.{} of type {:?}",
                value.type_name(),
                collection.name,
                property.name,
                property.data_type
            ))
        };
        match (property.data_type, value) {
            (DataType::Bool, Value::Bool(b)) => writer.write_bool(index, *b)?,
            (DataType::Byte, Value::Integer(i)) => {
                writer.write_byte(index, u8::try_from(*i).map_err(|_| bad())?)?;
            }
            (DataType::Int, Value::Integer(i)) => {
                writer.write_int(index, i32::try_from(*i).map_err(|_| bad())?)?;
            }
            (DataType::Long, Value::Integer(i)) => writer.write_long(index, *i)?,
            (DataType::Float, v) => writer.write_float(index, v.as_f64().ok_or_else(bad)? as f32)?,
            (DataType::Double, v) => writer.write_double(index, v.as_f64().ok_or_else(bad)?)?,
            (DataType::String, Value::String(s)) => writer.write_string(index, s)?,
            _ => return Err(bad()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use objdb_codec::{InstanceSchema, ObjectReader};

    fn schema() -> InstanceSchema {
        InstanceSchema::from_json(
            r#"[{"name":"Item","properties":[
                {"name":"flag","type":"Bool"},
                {"name":"small","type":"Byte"},
                {"name":"count","type":"Int"},
                {"name":"price","type":"Double"},
                {"name":"label","type":"String"},
                {"name":"tags","type":"StringList"}
            ]}]"#,
        )
        .unwrap()
    }

    #[test]
    fn patch_keeps_unlisted_properties() {
        let schema = schema();
        let mut writer = ObjectWriter::for_collection(&schema, 0).unwrap();
        writer.write_string(4, "old").unwrap();
        writer.write_int(2, 7).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = ObjectReader::new(1, &bytes, &schema, 0).unwrap();

        let mut writer = ObjectWriter::from_reader(&reader);
        apply_patch(
            &mut writer,
            &[
                (3, Some(Value::Integer(2))),
                (0, Some(Value::Bool(true))),
                (2, None),
            ],
        )
        .unwrap();
        let bytes = writer.finish().unwrap();
        let reader = ObjectReader::new(1, &bytes, &schema, 0).unwrap();
        assert_eq!(reader.read_string(4), Some(("old", true)));
        assert_eq!(reader.read_double(3), Some(2.0));
        assert_eq!(reader.read_bool(0), Some(true));
        assert_eq!(reader.read_int(2), None);
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let schema = schema();
        let mut writer = ObjectWriter::for_collection(&schema, 0).unwrap();
        for patch in [
            (1, Some(Value::Integer(300))),
            (2, Some(Value::Integer(i64::MAX))),
            (4, Some(Value::Integer(1))),
            (5, Some(Value::String("a".into()))),
            (9, None),
        ] {
            let err = apply_patch(&mut writer, &[patch]).unwrap_err();
            assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err}");
        }
    }
}
