//! Collection schemas.
//!
//! Schemas arrive as JSON (an array of collections) and are compiled once:
//! slot offsets are laid out, embedded targets and index properties are
//! resolved to positions. After that they are immutable.

use crate::error::{CodecError, CodecResult};
use crate::layout::{OBJECT_HEADER, SLOT_OFFSET};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `true`/`false`.
    Bool,
    /// Unsigned 8-bit integer; has no null representation.
    Byte,
    /// Signed 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// Signed 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// UTF-8 text.
    String,
    /// Embedded object, see [`PropertySchema::target`].
    Object,
    /// List of bools.
    BoolList,
    /// List of bytes.
    ByteList,
    /// List of 32-bit integers.
    IntList,
    /// List of 32-bit floats.
    FloatList,
    /// List of 64-bit integers.
    LongList,
    /// List of 64-bit floats.
    DoubleList,
    /// List of strings.
    StringList,
    /// List of embedded objects.
    ObjectList,
}

impl DataType {
    /// Width of this type's slot in a static section.
    #[must_use]
    pub const fn static_size(self) -> usize {
        match self {
            Self::Bool | Self::Byte => 1,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
            _ => SLOT_OFFSET,
        }
    }

    /// Element type of a list type.
    #[must_use]
    pub const fn element_type(self) -> Option<Self> {
        match self {
            Self::BoolList => Some(Self::Bool),
            Self::ByteList => Some(Self::Byte),
            Self::IntList => Some(Self::Int),
            Self::FloatList => Some(Self::Float),
            Self::LongList => Some(Self::Long),
            Self::DoubleList => Some(Self::Double),
            Self::StringList => Some(Self::String),
            Self::ObjectList => Some(Self::Object),
            _ => None,
        }
    }

    /// Whether this is a list type.
    #[must_use]
    pub const fn is_list(self) -> bool {
        self.element_type().is_some()
    }

    /// Whether values live in the heap rather than in the slot.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::String | Self::Object) || self.is_list()
    }

    /// Whether values of this type refer to an embedded collection.
    #[must_use]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object | Self::ObjectList)
    }

    /// Byte, Int or Long, or a list of them.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Int | Self::Long | Self::ByteList | Self::IntList | Self::LongList
        )
    }

    /// Float or Double, or a list of them.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float | Self::Double | Self::FloatList | Self::DoubleList
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_id_name() -> String {
    "id".to_owned()
}

/// One property slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    /// Property name, unique within the collection.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether null may be stored. Defaults to `true`.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Embedded collection for `Object`/`ObjectList` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip)]
    pub(crate) offset: usize,
    #[serde(skip)]
    pub(crate) target_index: Option<usize>,
}

impl PropertySchema {
    /// Creates a nullable property.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            target: None,
            offset: 0,
            target_index: None,
        }
    }

    /// Marks the property non-nullable.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the embedded collection of an object property.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Byte offset of this property's slot within an object record.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Position of the embedded collection in the instance schema.
    #[must_use]
    pub fn target_index(&self) -> Option<usize> {
        self.target_index
    }
}

/// A secondary index over one or more properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Indexed property names, in key order.
    pub properties: Vec<String>,
    /// Whether two live objects may share a key.
    #[serde(default)]
    pub unique: bool,
    /// Whether string keys compare case-sensitively.
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(skip)]
    pub(crate) property_indices: Vec<u16>,
}

impl IndexSchema {
    /// Creates a non-unique, case-sensitive index.
    pub fn new(name: impl Into<String>, properties: &[&str]) -> Self {
        Self {
            name: name.into(),
            properties: properties.iter().map(|p| (*p).to_owned()).collect(),
            unique: false,
            case_sensitive: true,
            property_indices: Vec::new(),
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Positions of the indexed properties.
    #[must_use]
    pub fn property_indices(&self) -> &[u16] {
        &self.property_indices
    }
}

/// A collection (or an embedded object type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// JSON key of the id field.
    #[serde(default = "default_id_name")]
    pub id_name: String,
    /// Embedded types have no id and cannot be stored on their own.
    #[serde(default)]
    pub embedded: bool,
    /// Whether inserts without an id get one allocated.
    #[serde(default)]
    pub auto_increment: bool,
    /// Properties in slot order.
    pub properties: Vec<PropertySchema>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
    #[serde(skip)]
    pub(crate) static_size: usize,
}

impl CollectionSchema {
    /// Creates a collection with the given properties and no indexes.
    pub fn new(name: impl Into<String>, properties: Vec<PropertySchema>) -> Self {
        Self {
            name: name.into(),
            id_name: default_id_name(),
            embedded: false,
            auto_increment: false,
            properties,
            indexes: Vec::new(),
            static_size: 0,
        }
    }

    /// Adds an index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Marks the collection as an embedded type.
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Enables id allocation.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Property at `index`.
    #[must_use]
    pub fn property(&self, index: u16) -> Option<&PropertySchema> {
        self.properties.get(usize::from(index))
    }

    /// Position of the property called `name`.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<u16> {
        self.properties
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// Size of the static section of a record written with this schema.
    #[must_use]
    pub fn static_size(&self) -> usize {
        self.static_size
    }

    fn compile(&mut self, names: &[(String, bool)]) -> CodecResult<()> {
        let invalid = |msg: String| CodecError::InvalidSchema(format!("{}: {msg}", self.name));
        if self.properties.len() > usize::from(u16::MAX) {
            return Err(invalid("too many properties".into()));
        }

        let mut seen = HashSet::new();
        let mut offset = OBJECT_HEADER;
        for property in &mut self.properties {
            if !seen.insert(property.name.clone()) || property.name == self.id_name {
                return Err(invalid(format!("duplicate property '{}'", property.name)));
            }
            property.offset = offset;
            offset += property.data_type.static_size();

            property.target_index = match (&property.target, property.data_type.is_object()) {
                (Some(target), true) => {
                    let index = names
                        .iter()
                        .position(|(name, embedded)| name == target && *embedded)
                        .ok_or_else(|| {
                            CodecError::InvalidSchema(format!(
                                "{}: '{}' targets unknown embedded type '{target}'",
                                self.name, property.name
                            ))
                        })?;
                    Some(index)
                }
                (None, true) => {
                    return Err(invalid(format!("'{}' needs a target", property.name)));
                }
                (Some(_), false) => {
                    return Err(invalid(format!("'{}' is not an object", property.name)));
                }
                (None, false) => None,
            };
        }
        self.static_size = offset - OBJECT_HEADER;
        if self.static_size > usize::from(u16::MAX) {
            return Err(invalid("static section exceeds 64 KiB".into()));
        }

        for index in &mut self.indexes {
            if index.properties.is_empty() {
                return Err(CodecError::InvalidSchema(format!(
                    "{}: index '{}' has no properties",
                    self.name, index.name
                )));
            }
            index.property_indices = index
                .properties
                .iter()
                .map(|name| {
                    let position = self
                        .properties
                        .iter()
                        .position(|p| &p.name == name && !p.data_type.is_object())
                        .ok_or_else(|| {
                            CodecError::InvalidSchema(format!(
                                "{}: index '{}' names unknown property '{name}'",
                                self.name, index.name
                            ))
                        })?;
                    Ok(position as u16)
                })
                .collect::<CodecResult<_>>()?;
        }
        Ok(())
    }
}

/// The full set of collections of one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InstanceSchema {
    collections: Vec<CollectionSchema>,
}

impl InstanceSchema {
    /// Compiles a schema from its collections.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidSchema`] for duplicate names, unresolved targets,
    /// object properties without targets, or indexes over unknown
    /// properties.
    pub fn new(mut collections: Vec<CollectionSchema>) -> CodecResult<Self> {
        if collections.len() > usize::from(u16::MAX) {
            return Err(CodecError::InvalidSchema("too many collections".into()));
        }
        let names: Vec<(String, bool)> = collections
            .iter()
            .map(|c| (c.name.clone(), c.embedded))
            .collect();
        let mut seen = HashSet::new();
        for (name, _) in &names {
            if !seen.insert(name.as_str()) {
                return Err(CodecError::InvalidSchema(format!(
                    "duplicate collection '{name}'"
                )));
            }
        }
        for collection in &mut collections {
            collection.compile(&names)?;
        }
        Ok(Self { collections })
    }

    /// Parses and compiles a JSON array of collections.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidSchema`] if the JSON is malformed or the schema
    /// is inconsistent.
    pub fn from_json(json: &str) -> CodecResult<Self> {
        let collections: Vec<CollectionSchema> =
            serde_json::from_str(json).map_err(|e| CodecError::InvalidSchema(e.to_string()))?;
        Self::new(collections)
    }

    /// Serializes back to the JSON accepted by [`Self::from_json`].
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.collections).unwrap_or_else(|_| "[]".to_owned())
    }

    /// All collections, embedded types included, in index order.
    #[must_use]
    pub fn collections(&self) -> &[CollectionSchema] {
        &self.collections
    }

    /// Collection at `index`.
    ///
    /// # Errors
    ///
    /// [`CodecError::UnknownCollection`] if out of range.
    pub fn collection(&self, index: usize) -> CodecResult<&CollectionSchema> {
        self.collections
            .get(index)
            .ok_or(CodecError::UnknownCollection(index))
    }

    /// Index of the collection called `name`.
    #[must_use]
    pub fn collection_index(&self, name: &str) -> Option<u16> {
        self.collections
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// Checks that records written under `previous` stay readable under
    /// `self`: every old collection and property must still exist at the
    /// same position with the same type. New properties may be appended
    /// and new collections added.
    ///
    /// Returns a description of the first incompatibility.
    #[must_use]
    pub fn incompatibility_with(&self, previous: &Self) -> Option<String> {
        for (position, old) in previous.collections.iter().enumerate() {
            let Some(new) = self.collections.get(position) else {
                return Some(format!("collection '{}' was removed", old.name));
            };
            if new.name != old.name {
                return Some(format!(
                    "collection '{}' was replaced by '{}'",
                    old.name, new.name
                ));
            }
            for (slot, old_prop) in old.properties.iter().enumerate() {
                match new.properties.get(slot) {
                    None => {
                        return Some(format!("{}.{} was removed", old.name, old_prop.name));
                    }
                    Some(p) if p.name != old_prop.name || p.data_type != old_prop.data_type => {
                        return Some(format!(
                            "{}.{} changed from {:?} to {} {:?}",
                            old.name, old_prop.name, old_prop.data_type, p.name, p.data_type
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        None
    }
}
