//! Streaming object writers.
//!
//! A writer starts with every slot null and accepts property writes in any
//! order. Variable-size values are kept aside and laid out in property order
//! by `finish`, so the encoding does not depend on write order.

use crate::error::{CodecError, CodecResult};
use crate::layout::{
    push_chunk, Record, BOOL_FALSE, BOOL_NULL, BOOL_TRUE, CHUNK_HEADER, LIST_HEADER,
    MAX_RECORD_SIZE, NULL_INT, NULL_LONG, OBJECT_HEADER,
};
use crate::reader::ObjectReader;
use crate::schema::{CollectionSchema, DataType, InstanceSchema, PropertySchema};

/// Null bytes for a slot of `data_type`.
fn null_slot(data_type: DataType) -> Vec<u8> {
    match data_type {
        DataType::Bool => vec![BOOL_NULL],
        DataType::Byte => vec![0],
        DataType::Int => NULL_INT.to_le_bytes().to_vec(),
        DataType::Long => NULL_LONG.to_le_bytes().to_vec(),
        DataType::Float => f32::NAN.to_le_bytes().to_vec(),
        DataType::Double => f64::NAN.to_le_bytes().to_vec(),
        _ => vec![0; 4],
    }
}

fn bool_byte(value: bool) -> u8 {
    if value {
        BOOL_TRUE
    } else {
        BOOL_FALSE
    }
}

/// Static slots plus pending heap chunks, shared by object and list writers.
#[derive(Debug, Clone)]
struct Slots {
    bytes: Vec<u8>,
    chunks: Vec<Option<Vec<u8>>>,
}

impl Slots {
    fn set(&mut self, pos: usize, value: &[u8]) {
        self.bytes[pos..pos + value.len()].copy_from_slice(value);
    }

    /// Lays out `header | slots | chunks`; `positions[i]` is the slot of
    /// chunk `i` relative to the start of `bytes`.
    fn assemble(self, header: &[u8], positions: impl Iterator<Item = usize>) -> CodecResult<Vec<u8>> {
        let heap: usize = self
            .chunks
            .iter()
            .flatten()
            .map(|c| c.len() + CHUNK_HEADER)
            .sum();
        let mut out = Vec::with_capacity(header.len() + self.bytes.len() + heap);
        out.extend_from_slice(header);
        out.extend_from_slice(&self.bytes);
        for (chunk, pos) in self.chunks.into_iter().zip(positions) {
            if let Some(payload) = chunk {
                let offset = push_chunk(&mut out, &payload).ok_or(CodecError::TooLarge)?;
                let at = header.len() + pos;
                out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
            }
        }
        if u32::try_from(out.len()).is_err() {
            return Err(CodecError::TooLarge);
        }
        Ok(out)
    }
}

/// Writer for one object.
#[derive(Debug, Clone)]
pub struct ObjectWriter<'a> {
    schema: &'a InstanceSchema,
    collection: &'a CollectionSchema,
    slots: Slots,
    written: Vec<bool>,
    /// Property or element index in the writer that created this one.
    parent: Option<u32>,
    /// Bound on the bytes a single list may reserve.
    max_size: usize,
}

impl<'a> ObjectWriter<'a> {
    /// Starts an object of `collection`.
    #[must_use]
    pub fn new(schema: &'a InstanceSchema, collection: &'a CollectionSchema) -> Self {
        let mut bytes = Vec::with_capacity(collection.static_size());
        for property in &collection.properties {
            bytes.extend_from_slice(&null_slot(property.data_type));
        }
        Self {
            schema,
            collection,
            slots: Slots {
                bytes,
                chunks: vec![None; collection.properties.len()],
            },
            written: vec![false; collection.properties.len()],
            parent: None,
            max_size: MAX_RECORD_SIZE,
        }
    }

    /// Limits how many bytes a list started by this writer, or by any
    /// writer nested in it, may reserve. Defaults to [`MAX_RECORD_SIZE`].
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.min(MAX_RECORD_SIZE);
        self
    }

    /// Starts an object of the collection at `index`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownCollection`] if out of range.
    pub fn for_collection(schema: &'a InstanceSchema, index: usize) -> CodecResult<Self> {
        Ok(Self::new(schema, schema.collection(index)?))
    }

    /// Starts a writer holding a copy of every property of `reader`.
    ///
    /// Properties absent from an older record stay null and unwritten.
    #[must_use]
    pub fn from_reader(reader: &ObjectReader<'a>) -> Self {
        let mut writer = Self::new(reader.schema(), reader.collection());
        let bytes = reader.as_bytes();
        let static_end = bytes
            .get(..OBJECT_HEADER)
            .and_then(|h| h.try_into().ok())
            .map_or(OBJECT_HEADER, |h: [u8; 2]| {
                OBJECT_HEADER + usize::from(u16::from_le_bytes(h))
            });
        let record = Record { bytes, static_end };
        for (index, property) in writer.collection.properties.iter().enumerate() {
            let pos = property.offset;
            let slot = pos - OBJECT_HEADER;
            let size = property.data_type.static_size();
            if property.data_type.is_dynamic() {
                if let Some(chunk) = record.chunk(pos) {
                    writer.slots.chunks[index] = Some(chunk.to_vec());
                    writer.written[index] = true;
                }
            } else if let Some(raw) = bytes.get(pos..pos + size).filter(|_| pos + size <= static_end) {
                writer.slots.bytes[slot..slot + size].copy_from_slice(raw);
                writer.written[index] = true;
            }
        }
        writer
    }

    /// Schema of the object being written.
    #[must_use]
    pub fn collection(&self) -> &'a CollectionSchema {
        self.collection
    }

    fn property(&self, index: u16) -> CodecResult<&'a PropertySchema> {
        self.collection
            .property(index)
            .ok_or_else(|| CodecError::UnknownProperty {
                collection: self.collection.name.clone(),
                index,
            })
    }

    fn typed(&self, index: u16, data_type: DataType, actual: &'static str) -> CodecResult<usize> {
        let property = self.property(index)?;
        if property.data_type != data_type {
            return Err(CodecError::TypeMismatch {
                property: property.name.clone(),
                expected: property.data_type,
                actual,
            });
        }
        Ok(property.offset - OBJECT_HEADER)
    }

    fn put(&mut self, index: u16, data_type: DataType, actual: &'static str, value: &[u8]) -> CodecResult<()> {
        let slot = self.typed(index, data_type, actual)?;
        self.slots.set(slot, value);
        self.written[usize::from(index)] = true;
        Ok(())
    }

    /// Writes null.
    ///
    /// # Errors
    ///
    /// [`CodecError::NullNotAllowed`] for non-nullable properties.
    pub fn write_null(&mut self, index: u16) -> CodecResult<()> {
        let property = self.property(index)?;
        if !property.nullable {
            return Err(CodecError::NullNotAllowed(property.name.clone()));
        }
        let slot = property.offset - OBJECT_HEADER;
        self.slots.set(slot, &null_slot(property.data_type));
        self.slots.chunks[usize::from(index)] = None;
        self.written[usize::from(index)] = true;
        Ok(())
    }

    /// Writes a `Bool`.
    ///
    /// # Errors
    ///
    /// On unknown index or type mismatch, as every `write_*` method.
    pub fn write_bool(&mut self, index: u16, value: bool) -> CodecResult<()> {
        self.put(index, DataType::Bool, "bool", &[bool_byte(value)])
    }

    /// Writes a `Byte`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_byte(&mut self, index: u16, value: u8) -> CodecResult<()> {
        self.put(index, DataType::Byte, "byte", &[value])
    }

    /// Writes an `Int`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_int(&mut self, index: u16, value: i32) -> CodecResult<()> {
        self.put(index, DataType::Int, "int", &value.to_le_bytes())
    }

    /// Writes a `Float`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_float(&mut self, index: u16, value: f32) -> CodecResult<()> {
        self.put(index, DataType::Float, "float", &value.to_le_bytes())
    }

    /// Writes a `Long`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_long(&mut self, index: u16, value: i64) -> CodecResult<()> {
        self.put(index, DataType::Long, "long", &value.to_le_bytes())
    }

    /// Writes a `Double`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_double(&mut self, index: u16, value: f64) -> CodecResult<()> {
        self.put(index, DataType::Double, "double", &value.to_le_bytes())
    }

    /// Writes a `String`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_string(&mut self, index: u16, value: &str) -> CodecResult<()> {
        self.typed(index, DataType::String, "string")?;
        self.slots.chunks[usize::from(index)] = Some(value.as_bytes().to_vec());
        self.written[usize::from(index)] = true;
        Ok(())
    }

    /// Starts the embedded object stored at `index`. Hand it back with
    /// [`Self::write_object_end`]; dropping it leaves the property untouched.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_object(&mut self, index: u16) -> CodecResult<ObjectWriter<'a>> {
        self.typed(index, DataType::Object, "object")?;
        let target = self.target(index)?;
        let mut child = ObjectWriter::new(self.schema, target).with_max_size(self.max_size);
        child.parent = Some(u32::from(index));
        Ok(child)
    }

    /// Finishes `child` and stores it at the index it was created for.
    ///
    /// # Errors
    ///
    /// [`CodecError::ForeignWriter`] if `child` came from elsewhere, or any
    /// error from finishing it.
    pub fn write_object_end(&mut self, child: ObjectWriter<'a>) -> CodecResult<()> {
        let index = child
            .parent
            .and_then(|i| u16::try_from(i).ok())
            .filter(|i| {
                self.target(*i).is_ok_and(|t| t.name == child.collection.name)
                    && self.property(*i).is_ok_and(|p| p.data_type == DataType::Object)
            })
            .ok_or(CodecError::ForeignWriter)?;
        let bytes = child.finish()?;
        self.slots.chunks[usize::from(index)] = Some(bytes);
        self.written[usize::from(index)] = true;
        Ok(())
    }

    /// Starts the list of `len` elements stored at `index`. Hand it back
    /// with [`Self::write_list_end`].
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_list(&mut self, index: u16, len: u32) -> CodecResult<ListWriter<'a>> {
        let property = self.property(index)?;
        let Some(element) = property.data_type.element_type() else {
            return Err(CodecError::TypeMismatch {
                property: property.name.clone(),
                expected: property.data_type,
                actual: "list",
            });
        };
        let target = match property.target_index {
            Some(_) => Some(self.target(index)?),
            None => None,
        };
        let reserved = (len as usize).saturating_mul(null_slot(element).len());
        if reserved > self.max_size {
            return Err(CodecError::TooLarge);
        }
        Ok(ListWriter::new(self.schema, element, target, index, len, self.max_size))
    }

    /// Finishes `list` and stores it at the index it was created for.
    ///
    /// # Errors
    ///
    /// [`CodecError::ForeignWriter`] if `list` came from elsewhere.
    pub fn write_list_end(&mut self, list: ListWriter<'a>) -> CodecResult<()> {
        let index = list.parent;
        let matches = self
            .property(index)
            .is_ok_and(|p| p.data_type.element_type() == Some(list.element));
        if !matches {
            return Err(CodecError::ForeignWriter);
        }
        let bytes = list.finish()?;
        self.slots.chunks[usize::from(index)] = Some(bytes);
        self.written[usize::from(index)] = true;
        Ok(())
    }

    fn target(&self, index: u16) -> CodecResult<&'a CollectionSchema> {
        let property = self.property(index)?;
        let target = property
            .target_index
            .ok_or_else(|| CodecError::InvalidSchema(format!("'{}' has no target", property.name)))?;
        self.schema.collection(target)
    }

    /// Validates required properties and produces the encoded record.
    ///
    /// # Errors
    ///
    /// [`CodecError::MissingProperty`] for an unwritten non-nullable
    /// property; [`CodecError::TooLarge`] past 4 GiB.
    pub fn finish(self) -> CodecResult<Vec<u8>> {
        let collection = self.collection;
        if let Some(missing) = collection
            .properties
            .iter()
            .zip(&self.written)
            .find(|(p, written)| !p.nullable && !**written)
        {
            return Err(CodecError::MissingProperty {
                collection: collection.name.clone(),
                property: missing.0.name.clone(),
            });
        }
        let static_len = u16::try_from(self.slots.bytes.len()).map_err(|_| CodecError::TooLarge)?;
        let positions = collection.properties.iter().map(|p| p.offset - OBJECT_HEADER);
        self.slots.assemble(&static_len.to_le_bytes(), positions)
    }
}

/// Writer for one list.
#[derive(Debug, Clone)]
pub struct ListWriter<'a> {
    schema: &'a InstanceSchema,
    element: DataType,
    target: Option<&'a CollectionSchema>,
    slots: Slots,
    parent: u16,
    len: u32,
    max_size: usize,
}

impl<'a> ListWriter<'a> {
    fn new(
        schema: &'a InstanceSchema,
        element: DataType,
        target: Option<&'a CollectionSchema>,
        parent: u16,
        len: u32,
        max_size: usize,
    ) -> Self {
        let null = null_slot(element);
        let mut bytes = Vec::with_capacity(null.len() * len as usize);
        for _ in 0..len {
            bytes.extend_from_slice(&null);
        }
        Self {
            schema,
            element,
            target,
            slots: Slots {
                bytes,
                chunks: vec![None; len as usize],
            },
            parent,
            len,
            max_size,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the list has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element type.
    #[must_use]
    pub fn element_type(&self) -> DataType {
        self.element
    }

    fn typed(&self, index: u32, data_type: DataType, actual: &'static str) -> CodecResult<usize> {
        if index >= self.len {
            return Err(CodecError::ListIndexOutOfRange {
                index,
                len: self.len,
            });
        }
        if self.element != data_type {
            return Err(CodecError::TypeMismatch {
                property: format!("[{index}]"),
                expected: self.element,
                actual,
            });
        }
        Ok(index as usize * self.element.static_size())
    }

    fn put(&mut self, index: u32, data_type: DataType, actual: &'static str, value: &[u8]) -> CodecResult<()> {
        let slot = self.typed(index, data_type, actual)?;
        self.slots.set(slot, value);
        Ok(())
    }

    /// Sets element `index` to null (elements start out null).
    ///
    /// # Errors
    ///
    /// [`CodecError::ListIndexOutOfRange`].
    pub fn write_null(&mut self, index: u32) -> CodecResult<()> {
        let slot = self.typed(index, self.element, "null")?;
        self.slots.set(slot, &null_slot(self.element));
        self.slots.chunks[index as usize] = None;
        Ok(())
    }

    /// Writes a `Bool` element.
    ///
    /// # Errors
    ///
    /// On range or type mismatch, as every `write_*` method.
    pub fn write_bool(&mut self, index: u32, value: bool) -> CodecResult<()> {
        self.put(index, DataType::Bool, "bool", &[bool_byte(value)])
    }

    /// Writes a `Byte` element.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_byte(&mut self, index: u32, value: u8) -> CodecResult<()> {
        self.put(index, DataType::Byte, "byte", &[value])
    }

    /// Writes an `Int` element.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_int(&mut self, index: u32, value: i32) -> CodecResult<()> {
        self.put(index, DataType::Int, "int", &value.to_le_bytes())
    }

    /// Writes a `Float` element.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_float(&mut self, index: u32, value: f32) -> CodecResult<()> {
        self.put(index, DataType::Float, "float", &value.to_le_bytes())
    }

    /// Writes a `Long` element.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_long(&mut self, index: u32, value: i64) -> CodecResult<()> {
        self.put(index, DataType::Long, "long", &value.to_le_bytes())
    }

    /// Writes a `Double` element.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_double(&mut self, index: u32, value: f64) -> CodecResult<()> {
        self.put(index, DataType::Double, "double", &value.to_le_bytes())
    }

    /// Writes a `String` element.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_string(&mut self, index: u32, value: &str) -> CodecResult<()> {
        self.typed(index, DataType::String, "string")?;
        self.slots.chunks[index as usize] = Some(value.as_bytes().to_vec());
        Ok(())
    }

    /// Starts the embedded object at element `index`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_bool`].
    pub fn write_object(&mut self, index: u32) -> CodecResult<ObjectWriter<'a>> {
        self.typed(index, DataType::Object, "object")?;
        let target = self
            .target
            .ok_or_else(|| CodecError::InvalidSchema("object list without target".into()))?;
        let mut child = ObjectWriter::new(self.schema, target).with_max_size(self.max_size);
        child.parent = Some(index);
        Ok(child)
    }

    /// Finishes `child` and stores it at the element it was created for.
    ///
    /// # Errors
    ///
    /// [`CodecError::ForeignWriter`] if `child` came from elsewhere.
    pub fn write_object_end(&mut self, child: ObjectWriter<'a>) -> CodecResult<()> {
        let same_type = self
            .target
            .is_some_and(|t| t.name == child.collection.name);
        let index = child
            .parent
            .filter(|i| *i < self.len && same_type)
            .ok_or(CodecError::ForeignWriter)?;
        let bytes = child.finish()?;
        self.slots.chunks[index as usize] = Some(bytes);
        Ok(())
    }

    fn finish(self) -> CodecResult<Vec<u8>> {
        let width = self.element.static_size();
        let positions = (0..self.len as usize).map(|i| i * width);
        let header = self.len.to_le_bytes();
        debug_assert_eq!(header.len(), LIST_HEADER);
        self.slots.assemble(&header, positions)
    }
}
