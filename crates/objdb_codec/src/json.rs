//! JSON import and export of encoded objects.

use crate::error::{CodecError, CodecResult};
use crate::reader::{Field, ObjectReader};
use crate::schema::{CollectionSchema, DataType};
use crate::writer::{ListWriter, ObjectWriter};
use serde_json::{Map, Number, Value as Json};

fn field_json(field: Field<'_>) -> Json {
    match field {
        Field::Null => Json::Null,
        Field::Bool(b) => Json::Bool(b),
        Field::Int(i) => Json::Number(i.into()),
        Field::Float(f) => Number::from_f64(f).map_or(Json::Null, Json::Number),
        Field::String(s) => Json::String(s.to_owned()),
        Field::Object(o) => o.to_json(),
        Field::List(l) => Json::Array(l.iter().map(field_json).collect()),
    }
}

impl ObjectReader<'_> {
    /// Converts to a JSON object keyed by property name. Top-level objects
    /// carry their id under the collection's id name.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let collection = self.collection();
        let mut map = Map::new();
        if !collection.embedded {
            map.insert(collection.id_name.clone(), Json::Number(self.read_id().into()));
        }
        for (index, property) in collection.properties.iter().enumerate() {
            map.insert(property.name.clone(), field_json(self.read_field(index as u16)));
        }
        Json::Object(map)
    }

    /// [`Self::to_json`] rendered as text.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

/// Id field of a JSON object, if present and not null.
///
/// # Errors
///
/// [`CodecError::Json`] if the id is not an integer.
pub fn json_id(collection: &CollectionSchema, object: &Map<String, Json>) -> CodecResult<Option<i64>> {
    match object.get(&collection.id_name) {
        None | Some(Json::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| CodecError::Json(format!("id '{value}' is not an integer"))),
    }
}

fn mismatch(name: &str, data_type: DataType, value: &Json) -> CodecError {
    CodecError::Json(format!("'{name}' expects {data_type:?}, got {value}"))
}

impl ObjectWriter<'_> {
    /// Writes every schema property found in `object`. Unknown keys and the
    /// id field are ignored; absent properties stay null.
    ///
    /// # Errors
    ///
    /// [`CodecError::Json`] when a value does not fit its property type.
    pub fn write_json(&mut self, object: &Map<String, Json>) -> CodecResult<()> {
        let collection = self.collection();
        for (index, property) in collection.properties.iter().enumerate() {
            let index = index as u16;
            let Some(value) = object.get(&property.name) else {
                continue;
            };
            let name = property.name.as_str();
            let data_type = property.data_type;
            let bad = || mismatch(name, data_type, value);
            match (data_type, value) {
                (_, Json::Null) => self.write_null(index)?,
                (DataType::Bool, v) => self.write_bool(index, v.as_bool().ok_or_else(bad)?)?,
                (DataType::Byte, v) => {
                    let byte = v.as_u64().and_then(|b| u8::try_from(b).ok()).ok_or_else(bad)?;
                    self.write_byte(index, byte)?;
                }
                (DataType::Int, v) => {
                    let int = v.as_i64().and_then(|i| i32::try_from(i).ok()).ok_or_else(bad)?;
                    self.write_int(index, int)?;
                }
                (DataType::Long, v) => self.write_long(index, v.as_i64().ok_or_else(bad)?)?,
                (DataType::Float, v) => self.write_float(index, v.as_f64().ok_or_else(bad)? as f32)?,
                (DataType::Double, v) => self.write_double(index, v.as_f64().ok_or_else(bad)?)?,
                (DataType::String, v) => self.write_string(index, v.as_str().ok_or_else(bad)?)?,
                (DataType::Object, v) => {
                    let nested = v.as_object().ok_or_else(bad)?;
                    let mut child = self.write_object(index)?;
                    child.write_json(nested)?;
                    self.write_object_end(child)?;
                }
                (_, v) => {
                    let items = v.as_array().ok_or_else(bad)?;
                    let len = u32::try_from(items.len()).map_err(|_| CodecError::TooLarge)?;
                    let mut list = self.write_list(index, len)?;
                    write_json_list(&mut list, name, items)?;
                    self.write_list_end(list)?;
                }
            }
        }
        Ok(())
    }
}

fn write_json_list(list: &mut ListWriter<'_>, name: &str, items: &[Json]) -> CodecResult<()> {
    let element = list.element_type();
    for (i, item) in items.iter().enumerate() {
        let i = i as u32;
        let bad = || mismatch(name, element, item);
        match (element, item) {
            (_, Json::Null) => list.write_null(i)?,
            (DataType::Bool, v) => list.write_bool(i, v.as_bool().ok_or_else(bad)?)?,
            (DataType::Byte, v) => {
                let byte = v.as_u64().and_then(|b| u8::try_from(b).ok()).ok_or_else(bad)?;
                list.write_byte(i, byte)?;
            }
            (DataType::Int, v) => {
                let int = v.as_i64().and_then(|x| i32::try_from(x).ok()).ok_or_else(bad)?;
                list.write_int(i, int)?;
            }
            (DataType::Long, v) => list.write_long(i, v.as_i64().ok_or_else(bad)?)?,
            (DataType::Float, v) => list.write_float(i, v.as_f64().ok_or_else(bad)? as f32)?,
            (DataType::Double, v) => list.write_double(i, v.as_f64().ok_or_else(bad)?)?,
            (DataType::String, v) => list.write_string(i, v.as_str().ok_or_else(bad)?)?,
            (DataType::Object, v) => {
                let nested = v.as_object().ok_or_else(bad)?;
                let mut child = list.write_object(i)?;
                child.write_json(nested)?;
                list.write_object_end(child)?;
            }
            (_, _) => return Err(bad()),
        }
    }
    Ok(())
}
