use crate::model::{Id, RelationshipDirection, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Extended-data key holding the cache row's creation timestamp.
pub const DATE_CACHE_CREATED: &str = "DateCacheCreated";
/// Extended-data key holding the overall completeness verdict.
pub const COMPLETE: &str = "Complete";
/// Extended-data key holding related instance ids, keyed by relationship.
pub const REL_INSTANCE_ID: &str = "relInstID";

pub fn aspect_complete_key(aspect: &str) -> String {
    format!("{}Complete", aspect)
}

pub fn aspect_created_key(aspect: &str) -> String {
    format!("{}DateCreated", aspect)
}

/// Lazily opened binary payload. Only the coordinates of the blob are kept;
/// the bytes are read on demand through [`crate::store::DbQuerier::open_stream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHandle {
    pub table: String,
    pub column: String,
    pub id_column: String,
    pub instance_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Literal(Value),
    Stream(StreamHandle),
}

impl PropertyValue {
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            PropertyValue::Literal(v) => Some(v),
            PropertyValue::Stream(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Literal(Value::Null))
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Literal(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub relationship: String,
    pub direction: RelationshipDirection,
    pub target: Instance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "class")]
    pub class_name: String,
    pub id: Id,
    pub fields: Vec<Field>,
    /// Side channel for metadata that is never a visible property.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extended_data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipEdge>,
}

impl Instance {
    pub fn new(class_name: impl Into<String>, id: impl Into<Id>) -> Self {
        Self {
            class_name: class_name.into(),
            id: id.into(),
            fields: Vec::new(),
            extended_data: HashMap::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, PropertyValue::Literal(value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_literal(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(PropertyValue::as_literal)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get_literal(name).and_then(Value::as_str)
    }

    /// Replace the field in place, keeping its position, or append it.
    pub fn set(&mut self, name: &str, value: PropertyValue) {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => self.fields.push(Field {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn set_extended(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extended_data.insert(key.into(), value);
    }

    pub fn extended(&self, key: &str) -> Option<&serde_json::Value> {
        self.extended_data.get(key)
    }

    pub fn extended_bool(&self, key: &str) -> Option<bool> {
        self.extended(key).and_then(|v| match v {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        })
    }

    /// Overall completeness as computed by the cache manager; instances that
    /// never went through the cache are considered complete.
    pub fn is_complete(&self) -> bool {
        self.extended_bool(COMPLETE).unwrap_or(true)
    }

    pub fn related_instance_id(&self, relationship: &str) -> Option<&str> {
        self.extended(REL_INSTANCE_ID)
            .and_then(|v| v.get(relationship))
            .and_then(|v| v.as_str())
    }

    pub fn set_related_instance_id(&mut self, relationship: &str, id: &str) {
        let entry = self
            .extended_data
            .entry(REL_INSTANCE_ID.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(map) = entry {
            map.insert(
                relationship.to_string(),
                serde_json::Value::String(id.to_string()),
            );
        }
    }

    pub fn add_related(
        &mut self,
        relationship: impl Into<String>,
        direction: RelationshipDirection,
        target: Instance,
    ) {
        self.relationships.push(RelationshipEdge {
            relationship: relationship.into(),
            direction,
            target,
        });
    }
}
