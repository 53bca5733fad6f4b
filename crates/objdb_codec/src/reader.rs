//! Zero-copy readers over encoded records.

use crate::error::{CodecError, CodecResult};
use crate::layout::{
    Record, BOOL_FALSE, BOOL_NULL, BOOL_TRUE, LIST_HEADER, NULL_INT, NULL_LONG, OBJECT_HEADER,
};
use crate::schema::{CollectionSchema, DataType, InstanceSchema};

/// A decoded property value borrowing from the record.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    /// Null or missing.
    Null,
    /// Bool.
    Bool(bool),
    /// Byte, Int or Long.
    Int(i64),
    /// Float or Double.
    Float(f64),
    /// String.
    String(&'a str),
    /// Embedded object.
    Object(ObjectReader<'a>),
    /// List.
    List(ListReader<'a>),
}

impl Field<'_> {
    /// Whether this is [`Field::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Decodes the scalar stored at `pos`.
fn scalar<'a>(record: &Record<'a>, pos: usize, data_type: DataType) -> Field<'a> {
    let decoded = match data_type {
        DataType::Bool => record.fixed::<1>(pos).and_then(|[b]| match b {
            BOOL_FALSE => Some(Field::Bool(false)),
            BOOL_TRUE => Some(Field::Bool(true)),
            _ => None,
        }),
        DataType::Byte => record.fixed::<1>(pos).map(|[b]| Field::Int(i64::from(b))),
        DataType::Int => record
            .fixed::<4>(pos)
            .map(i32::from_le_bytes)
            .filter(|v| *v != NULL_INT)
            .map(|v| Field::Int(i64::from(v))),
        DataType::Long => record
            .fixed::<8>(pos)
            .map(i64::from_le_bytes)
            .filter(|v| *v != NULL_LONG)
            .map(Field::Int),
        DataType::Float => record
            .fixed::<4>(pos)
            .map(f32::from_le_bytes)
            .filter(|v| !v.is_nan())
            .map(|v| Field::Float(f64::from(v))),
        DataType::Double => record
            .fixed::<8>(pos)
            .map(f64::from_le_bytes)
            .filter(|v| !v.is_nan())
            .map(Field::Float),
        DataType::String => record
            .chunk(pos)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(Field::String),
        _ => None,
    };
    decoded.unwrap_or(Field::Null)
}

/// Reader over one object record.
///
/// Cheap to copy. Nested readers borrow the same buffer.
#[derive(Clone, Copy)]
pub struct ObjectReader<'a> {
    id: i64,
    record: Record<'a>,
    collection: &'a CollectionSchema,
    schema: &'a InstanceSchema,
}

impl<'a> ObjectReader<'a> {
    /// Opens a reader over `bytes`, an object of collection `collection`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownCollection`] or [`CodecError::Malformed`] if the
    /// header is truncated.
    pub fn new(
        id: i64,
        bytes: &'a [u8],
        schema: &'a InstanceSchema,
        collection: usize,
    ) -> CodecResult<Self> {
        let collection = schema.collection(collection)?;
        Self::with_collection(id, bytes, schema, collection)
            .ok_or_else(|| CodecError::Malformed(format!("{} bytes", bytes.len())))
    }

    fn with_collection(
        id: i64,
        bytes: &'a [u8],
        schema: &'a InstanceSchema,
        collection: &'a CollectionSchema,
    ) -> Option<Self> {
        let header: [u8; 2] = bytes.get(..OBJECT_HEADER)?.try_into().ok()?;
        let static_end = OBJECT_HEADER + usize::from(u16::from_le_bytes(header));
        if static_end > bytes.len() {
            return None;
        }
        Some(Self {
            id,
            record: Record { bytes, static_end },
            collection,
            schema,
        })
    }

    /// Object id; embedded objects report `0`.
    #[must_use]
    pub fn read_id(&self) -> i64 {
        self.id
    }

    /// Schema this record is read with.
    #[must_use]
    pub fn collection(&self) -> &'a CollectionSchema {
        self.collection
    }

    /// Instance schema, for resolving embedded types.
    #[must_use]
    pub fn schema(&self) -> &'a InstanceSchema {
        self.schema
    }

    /// Encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.record.bytes
    }

    /// Slot position of `index` if the property has type `data_type`.
    fn slot(&self, index: u16, data_type: DataType) -> Option<usize> {
        self.collection
            .property(index)
            .filter(|p| p.data_type == data_type)
            .map(|p| p.offset)
    }

    /// Whether the property is null or absent from this record.
    ///
    /// `Byte` properties are null only when absent.
    #[must_use]
    pub fn is_null(&self, index: u16) -> bool {
        self.read_field(index).is_null()
    }

    /// Reads a `Bool` property.
    #[must_use]
    pub fn read_bool(&self, index: u16) -> Option<bool> {
        let pos = self.slot(index, DataType::Bool)?;
        match self.record.fixed::<1>(pos)? {
            [BOOL_NULL] => None,
            [b] => Some(b == BOOL_TRUE),
        }
    }

    /// Reads a `Byte` property; `0` when absent.
    #[must_use]
    pub fn read_byte(&self, index: u16) -> u8 {
        self.slot(index, DataType::Byte)
            .and_then(|pos| self.record.fixed::<1>(pos))
            .map_or(0, |[b]| b)
    }

    /// Reads an `Int` property.
    #[must_use]
    pub fn read_int(&self, index: u16) -> Option<i32> {
        let pos = self.slot(index, DataType::Int)?;
        Some(i32::from_le_bytes(self.record.fixed(pos)?)).filter(|v| *v != NULL_INT)
    }

    /// Reads a `Float` property.
    #[must_use]
    pub fn read_float(&self, index: u16) -> Option<f32> {
        let pos = self.slot(index, DataType::Float)?;
        Some(f32::from_le_bytes(self.record.fixed(pos)?)).filter(|v| !v.is_nan())
    }

    /// Reads a `Long` property.
    #[must_use]
    pub fn read_long(&self, index: u16) -> Option<i64> {
        let pos = self.slot(index, DataType::Long)?;
        Some(i64::from_le_bytes(self.record.fixed(pos)?)).filter(|v| *v != NULL_LONG)
    }

    /// Reads a `Double` property.
    #[must_use]
    pub fn read_double(&self, index: u16) -> Option<f64> {
        let pos = self.slot(index, DataType::Double)?;
        Some(f64::from_le_bytes(self.record.fixed(pos)?)).filter(|v| !v.is_nan())
    }

    /// Reads a `String` property along with whether it is pure ASCII.
    #[must_use]
    pub fn read_string(&self, index: u16) -> Option<(&'a str, bool)> {
        let pos = self.slot(index, DataType::String)?;
        let text = std::str::from_utf8(self.record.chunk(pos)?).ok()?;
        Some((text, text.is_ascii()))
    }

    /// Reads an `Object` property.
    #[must_use]
    pub fn read_object(&self, index: u16) -> Option<ObjectReader<'a>> {
        let property = self.collection.property(index)?;
        if property.data_type != DataType::Object {
            return None;
        }
        let target = self.schema.collection(property.target_index?).ok()?;
        let bytes = self.record.chunk(property.offset)?;
        Self::with_collection(0, bytes, self.schema, target)
    }

    /// Reads a list property of any element type.
    #[must_use]
    pub fn read_list(&self, index: u16) -> Option<ListReader<'a>> {
        let property = self.collection.property(index)?;
        let element = property.data_type.element_type()?;
        let target = match property.target_index {
            Some(i) => Some(self.schema.collection(i).ok()?),
            None => None,
        };
        let bytes = self.record.chunk(property.offset)?;
        ListReader::new(bytes, element, target, self.schema)
    }

    /// Reads any property as a [`Field`].
    #[must_use]
    pub fn read_field(&self, index: u16) -> Field<'a> {
        let Some(property) = self.collection.property(index) else {
            return Field::Null;
        };
        match property.data_type {
            DataType::Object => self.read_object(index).map_or(Field::Null, Field::Object),
            t if t.is_list() => self.read_list(index).map_or(Field::Null, Field::List),
            t => scalar(&self.record, property.offset, t),
        }
    }
}

impl std::fmt::Debug for ObjectReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("collection", &self.collection.name)
            .field("id", &self.id)
            .field("len", &self.record.bytes.len())
            .finish()
    }
}

/// Reader over one list record.
#[derive(Clone, Copy)]
pub struct ListReader<'a> {
    record: Record<'a>,
    len: u32,
    element: DataType,
    target: Option<&'a CollectionSchema>,
    schema: &'a InstanceSchema,
}

impl<'a> ListReader<'a> {
    fn new(
        bytes: &'a [u8],
        element: DataType,
        target: Option<&'a CollectionSchema>,
        schema: &'a InstanceSchema,
    ) -> Option<Self> {
        let header: [u8; 4] = bytes.get(..LIST_HEADER)?.try_into().ok()?;
        let len = u32::from_le_bytes(header);
        let static_end = (len as usize)
            .checked_mul(element.static_size())?
            .checked_add(LIST_HEADER)?;
        if static_end > bytes.len() {
            return None;
        }
        Some(Self {
            record: Record { bytes, static_end },
            len,
            element,
            target,
            schema,
        })
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

    fn pos(&self, index: u32) -> Option<usize> {
        (index < self.len).then(|| LIST_HEADER + index as usize * self.element.static_size())
    }

    /// Whether the element is null. Out-of-range elements are null.
    #[must_use]
    pub fn is_null(&self, index: u32) -> bool {
        self.read_field(index).is_null()
    }

    /// Reads element `index` as a [`Field`].
    #[must_use]
    pub fn read_field(&self, index: u32) -> Field<'a> {
        match self.element {
            DataType::Object => self.read_object(index).map_or(Field::Null, Field::Object),
            t => self
                .pos(index)
                .map_or(Field::Null, |pos| scalar(&self.record, pos, t)),
        }
    }

    /// Reads a `Bool` element.
    #[must_use]
    pub fn read_bool(&self, index: u32) -> Option<bool> {
        match self.read_field(index) {
            Field::Bool(b) if self.element == DataType::Bool => Some(b),
            _ => None,
        }
    }

    /// Reads a `Byte` element; `0` when out of range.
    #[must_use]
    pub fn read_byte(&self, index: u32) -> u8 {
        match self.read_field(index) {
            Field::Int(v) if self.element == DataType::Byte => v as u8,
            _ => 0,
        }
    }

    /// Reads an `Int` element.
    #[must_use]
    pub fn read_int(&self, index: u32) -> Option<i32> {
        match self.read_field(index) {
            Field::Int(v) if self.element == DataType::Int => i32::try_from(v).ok(),
            _ => None,
        }
    }

    /// Reads a `Float` element.
    #[must_use]
    pub fn read_float(&self, index: u32) -> Option<f32> {
        match self.read_field(index) {
            Field::Float(v) if self.element == DataType::Float => Some(v as f32),
            _ => None,
        }
    }

    /// Reads a `Long` element.
    #[must_use]
    pub fn read_long(&self, index: u32) -> Option<i64> {
        match self.read_field(index) {
            Field::Int(v) if self.element == DataType::Long => Some(v),
            _ => None,
        }
    }

    /// Reads a `Double` element.
    #[must_use]
    pub fn read_double(&self, index: u32) -> Option<f64> {
        match self.read_field(index) {
            Field::Float(v) if self.element == DataType::Double => Some(v),
            _ => None,
        }
    }

    /// Reads a `String` element along with whether it is pure ASCII.
    #[must_use]
    pub fn read_string(&self, index: u32) -> Option<(&'a str, bool)> {
        match self.read_field(index) {
            Field::String(s) => Some((s, s.is_ascii())),
            _ => None,
        }
    }

    /// Reads an embedded object element.
    #[must_use]
    pub fn read_object(&self, index: u32) -> Option<ObjectReader<'a>> {
        let bytes = self.record.chunk(self.pos(index)?)?;
        ObjectReader::with_collection(0, bytes, self.schema, self.target?)
    }

    /// Iterates over all elements.
    pub fn iter(&self) -> impl Iterator<Item = Field<'a>> + 'a {
        let list = *self;
        (0..self.len).map(move |i| list.read_field(i))
    }
}

impl std::fmt::Debug for ListReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListReader")
            .field("element", &self.element)
            .field("len", &self.len)
            .finish()
    }
}
