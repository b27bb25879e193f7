//! Model schema and value validation.
//!
//! Mutable models keep one current value per primary key. Immutable models
//! are content-addressed: a value's key is the hash of its canonical JSON, so
//! adding the same value twice is a no-op and never conflicts.

use crate::error::ModelError;
use arbor_core::Hasher;
use serde_json::Value;
use std::collections::BTreeMap;

/// Type of a model property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    /// Any JSON value.
    Json,
}

impl PropertyType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Integer => value.is_i64() || value.is_u64(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Json => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyType,
    /// Optional properties may be absent or null.
    pub optional: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Property {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Mutable { primary_key: String },
    Immutable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub kind: ModelKind,
    pub properties: Vec<Property>,
}

impl Model {
    pub fn is_mutable(&self) -> bool {
        matches!(self.kind, ModelKind::Mutable { .. })
    }

    /// Check `value` against the declared properties.
    pub fn validate(&self, value: &Value) -> Result<(), ModelError> {
        let object = value
            .as_object()
            .ok_or_else(|| ModelError::schema(&self.name, "value must be an object"))?;

        for name in object.keys() {
            if !self.properties.iter().any(|p| &p.name == name) {
                return Err(ModelError::schema(&self.name, format!("unknown property {name}")));
            }
        }
        for property in &self.properties {
            match object.get(&property.name) {
                None | Some(Value::Null) if property.optional => {}
                None => {
                    return Err(ModelError::schema(&self.name, format!("missing property {}", property.name)));
                }
                Some(field) if !property.kind.accepts(field) => {
                    return Err(ModelError::schema(
                        &self.name,
                        format!("property {} must be {:?}", property.name, property.kind),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Key under which `value` is stored.
    pub fn key_of(&self, value: &Value) -> Result<String, ModelError> {
        match &self.kind {
            ModelKind::Mutable { primary_key } => value
                .get(primary_key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ModelError::schema(&self.name, format!("primary key {primary_key} must be a string"))),
            ModelKind::Immutable => Ok(content_key(value)),
        }
    }
}

/// Hash of a value's canonical JSON. Object keys serialize in sorted order.
pub fn content_key(value: &Value) -> String {
    Hasher::hash(value.to_string().as_bytes()).to_hex()
}

/// The set of models an application declares.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelSchema {
    models: BTreeMap<String, Model>,
}

impl ModelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a mutable model keyed by `primary_key`, a string property.
    pub fn mutable(mut self, name: &str, primary_key: &str, mut properties: Vec<Property>) -> Self {
        if !properties.iter().any(|p| p.name == primary_key) {
            properties.insert(0, Property::new(primary_key, PropertyType::String));
        }
        self.models.insert(
            name.to_string(),
            Model {
                name: name.to_string(),
                kind: ModelKind::Mutable {
                    primary_key: primary_key.to_string(),
                },
                properties,
            },
        );
        self
    }

    pub fn immutable(mut self, name: &str, properties: Vec<Property>) -> Self {
        self.models.insert(
            name.to_string(),
            Model {
                name: name.to_string(),
                kind: ModelKind::Immutable,
                properties,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Result<&Model, ModelError> {
        self.models
            .get(name)
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }
}
