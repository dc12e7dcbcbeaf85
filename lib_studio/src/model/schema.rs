//! # Topics and Schemas
//!
//! Topics are supplied by the data source and replaced wholesale on reconnect.
//! Schemas (`Datatypes`) describe message shapes; a field whose type names
//! another schema in the same set is a complex (nested) field.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A named, schema-typed channel of messages. Identity is the `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub name: String,
    pub schema_name: String,
}

impl Topic {
    pub fn new(name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_name: schema_name.into(),
        }
    }
}

/// One field of a schema definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    /// Primitive type name (`float64`, `string`, ...) or the name of another schema.
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub is_array: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            is_array: false,
        }
    }

    pub fn array(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            is_array: true,
            ..Self::new(name, field_type)
        }
    }
}

/// The structural type describing one message shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(alias = "definitions")]
    pub fields: Vec<FieldDefinition>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// All schemas known to the current data source, keyed by schema name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datatypes {
    schemas: BTreeMap<String, Schema>,
}

impl Datatypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: Schema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn with(mut self, schema: Schema) -> Self {
        self.insert(schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// Hash of `name` and of every schema reachable from it. Two calls return
    /// the same value exactly when none of those definitions changed.
    pub fn closure_fingerprint(&self, name: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        let mut seen: Vec<&str> = Vec::new();
        let mut pending = vec![name];
        while let Some(current) = pending.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            current.hash(&mut hasher);
            if let Some(schema) = self.schemas.get(current) {
                schema.hash(&mut hasher);
                for field in &schema.fields {
                    if self.schemas.contains_key(&field.field_type) {
                        pending.push(field.field_type.as_str());
                    }
                }
            }
        }
        hasher.finish()
    }
}

impl FromIterator<Schema> for Datatypes {
    fn from_iter<T: IntoIterator<Item = Schema>>(iter: T) -> Self {
        let mut datatypes = Datatypes::new();
        for schema in iter {
            datatypes.insert(schema);
        }
        datatypes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_types() -> Datatypes {
        Datatypes::new()
            .with(Schema::new(
                "geometry/Pose",
                vec![FieldDefinition::new("position", "geometry/Point")],
            ))
            .with(Schema::new(
                "geometry/Point",
                vec![FieldDefinition::new("x", "float64")],
            ))
    }

    #[test]
    fn fingerprint_tracks_nested_schema_changes() {
        let before = pose_types();
        let mut after = pose_types();
        after.insert(Schema::new(
            "geometry/Point",
            vec![FieldDefinition::new("x", "float64"), FieldDefinition::new("y", "float64")],
        ));
        assert_eq!(
            before.closure_fingerprint("geometry/Pose"),
            pose_types().closure_fingerprint("geometry/Pose")
        );
        assert_ne!(
            before.closure_fingerprint("geometry/Pose"),
            after.closure_fingerprint("geometry/Pose")
        );
    }

    #[test]
    fn deserializes_definitions_alias() {
        let json = r#"{"std_srvs/SetBool_Request": {"name": "std_srvs/SetBool_Request", "definitions": [{"name": "data", "type": "bool"}]}}"#;
        let types: Datatypes = serde_json::from_str(json).unwrap();
        let schema = types.get("std_srvs/SetBool_Request").unwrap();
        assert_eq!(schema.fields[0].field_type, "bool");
        assert!(!schema.fields[0].is_array);
    }
}
