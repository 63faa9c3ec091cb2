//! Attribute Registry - Declared attributes of a model
//!
//! Descriptors are created once while a model is defined and are read-only
//! afterwards. Every per-field decision of the adapter (atomic counters,
//! identifier coercion, unique indexes) is looked up here by name.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::OdmError;

/// Reserved field under which documents store their identifier
pub const ID_FIELD: &str = "_id";

/// Declared value type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttrType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Document,
    Array,
}

impl AttrType {
    pub fn is_date(&self) -> bool {
        matches!(self, AttrType::Date)
    }

    pub fn is_object_id(&self) -> bool {
        matches!(self, AttrType::ObjectId)
    }
}

impl FromStr for AttrType {
    type Err = OdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(AttrType::Any),
            "string" | "String" => Ok(AttrType::String),
            "number" | "Number" => Ok(AttrType::Number),
            "boolean" | "Boolean" => Ok(AttrType::Boolean),
            "date" | "Date" => Ok(AttrType::Date),
            "objectId" | "ObjectId" | "ObjectID" => Ok(AttrType::ObjectId),
            "document" | "object" | "Object" => Ok(AttrType::Document),
            "array" | "Array" => Ok(AttrType::Array),
            _ => Err(OdmError::Configuration(format!(
                "Unsupported attribute type: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::Any => "any",
            AttrType::String => "string",
            AttrType::Number => "number",
            AttrType::Boolean => "boolean",
            AttrType::Date => "date",
            AttrType::ObjectId => "objectId",
            AttrType::Document => "document",
            AttrType::Array => "array",
        };
        write!(f, "{}", name)
    }
}

/// Options declared for a single attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub attr_type: AttrType,
    pub unique: bool,
    /// Persisted through `$inc` deltas instead of absolute overwrites
    pub atomic: bool,
    /// Holds the identifier of another document
    pub references: bool,
    pub primary_key: bool,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: AttrType::Any,
            unique: false,
            atomic: false,
            references: false,
            primary_key: false,
        }
    }

    pub fn typed(mut self, attr_type: AttrType) -> Self {
        self.attr_type = attr_type;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn atomic(mut self) -> Self {
        self.atomic = true;
        self
    }

    pub fn references(mut self) -> Self {
        self.references = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Values of this attribute are native identifiers
    pub fn is_identifier(&self) -> bool {
        self.attr_type.is_object_id() || self.references
    }
}

/// Per-model mapping from attribute name to its descriptor
#[derive(Debug, Clone)]
pub struct AttributeRegistry {
    model: String,
    descriptors: Vec<AttributeDescriptor>,
    by_name: HashMap<String, usize>,
    primary_key: String,
}

impl AttributeRegistry {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            descriptors: Vec::new(),
            by_name: HashMap::new(),
            primary_key: ID_FIELD.to_string(),
        }
    }

    /// Declare (or redeclare) an attribute.
    ///
    /// `_id` and `id` are implied primary keys. An `_id` without an explicit
    /// type is an ObjectId.
    pub fn define(&mut self, mut descriptor: AttributeDescriptor) {
        if descriptor.name == ID_FIELD || descriptor.name == "id" {
            descriptor.primary_key = true;
        }
        if descriptor.name == ID_FIELD && descriptor.attr_type == AttrType::Any {
            descriptor.attr_type = AttrType::ObjectId;
        }
        if descriptor.primary_key {
            self.primary_key = descriptor.name.clone();
            for other in self.descriptors.iter_mut() {
                if other.name != descriptor.name {
                    other.primary_key = false;
                }
            }
        }

        match self.by_name.get(&descriptor.name) {
            Some(&index) => self.descriptors[index] = descriptor,
            None => {
                self.by_name
                    .insert(descriptor.name.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.by_name.get(name).map(|&index| &self.descriptors[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Name of the primary key attribute (`_id` unless declared otherwise)
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key == name
    }

    /// The primary key stores native identifiers
    pub fn primary_key_is_identifier(&self) -> bool {
        match self.get(&self.primary_key) {
            Some(descriptor) => descriptor.is_identifier(),
            None => self.primary_key == ID_FIELD,
        }
    }

    pub fn is_atomic(&self, name: &str) -> bool {
        self.get(name).map(|d| d.atomic).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.descriptors.iter()
    }

    pub fn unique_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.descriptors.iter().filter(|d| d.unique)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
