//! Field paths derived from schemas.
//!
//! For a topic with schema `geometry/Pose` this yields suffixes such as
//! `.position`, `.position.x`, `.covariance[:]`, each of which can be appended
//! to the topic name to form a valid message path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Datatypes, FieldDefinition};

/// Nesting limit when walking schemas; also stops self-referencing types.
pub const MAX_FIELD_DEPTH: usize = 10;

/// One addressable field below a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// Field definitions from the message root down to this field.
    pub steps: Vec<FieldDefinition>,
    /// Path text to append to the topic name, e.g. `.status[:].level`.
    pub suffix: String,
    /// False when the field's type is another schema.
    pub is_leaf: bool,
}

impl FieldPath {
    pub fn field_type(&self) -> &str {
        self.steps.last().map(|f| f.field_type.as_str()).unwrap_or("")
    }
}

/// Every field path of `schema_name`, depth-first in declaration order.
pub fn field_paths(datatypes: &Datatypes, schema_name: &str) -> Vec<FieldPath> {
    let mut out = Vec::new();
    let mut visiting = vec![schema_name.to_string()];
    walk(datatypes, schema_name, &mut Vec::new(), "", &mut visiting, &mut out);
    out
}

fn walk(
    datatypes: &Datatypes,
    schema_name: &str,
    steps: &mut Vec<FieldDefinition>,
    prefix: &str,
    visiting: &mut Vec<String>,
    out: &mut Vec<FieldPath>,
) {
    let Some(schema) = datatypes.get(schema_name) else {
        return;
    };
    for field in &schema.fields {
        let mut suffix = format!("{}.{}", prefix, field.name);
        if field.is_array {
            suffix.push_str("[:]");
        }
        let complex = datatypes.contains(&field.field_type);
        steps.push(field.clone());
        out.push(FieldPath {
            steps: steps.clone(),
            suffix: suffix.clone(),
            is_leaf: !complex,
        });
        if complex && steps.len() < MAX_FIELD_DEPTH && !visiting.contains(&field.field_type) {
            visiting.push(field.field_type.clone());
            walk(datatypes, &field.field_type, steps, &suffix, visiting, out);
            visiting.pop();
        }
        steps.pop();
    }
}

/// Per-schema memo of `field_paths`, invalidated when the schema or anything it
/// references changes.
#[derive(Debug, Default)]
pub struct SchemaFieldCache {
    entries: HashMap<String, (u64, Arc<[FieldPath]>)>,
}

impl SchemaFieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, datatypes: &Datatypes, schema_name: &str) -> Arc<[FieldPath]> {
        let fingerprint = datatypes.closure_fingerprint(schema_name);
        if let Some((cached, paths)) = self.entries.get(schema_name) {
            if *cached == fingerprint {
                return Arc::clone(paths);
            }
        }
        log::debug!("Building field paths for schema {}", schema_name);
        let paths: Arc<[FieldPath]> = field_paths(datatypes, schema_name).into();
        self.entries
            .insert(schema_name.to_string(), (fingerprint, Arc::clone(&paths)));
        paths
    }

    /// Drops entries for schemas no longer present.
    pub fn retain_known(&mut self, datatypes: &Datatypes) {
        self.entries.retain(|name, _| datatypes.contains(name));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;

    fn diagnostics() -> Datatypes {
        Datatypes::new()
            .with(Schema::new(
                "diag/Array",
                vec![
                    FieldDefinition::new("stamp", "time"),
                    FieldDefinition::array("status", "diag/Status"),
                ],
            ))
            .with(Schema::new(
                "diag/Status",
                vec![
                    FieldDefinition::new("level", "int8"),
                    FieldDefinition::new("name", "string"),
                ],
            ))
    }

    #[test]
    fn lists_nested_paths_in_declaration_order() {
        let suffixes: Vec<_> = field_paths(&diagnostics(), "diag/Array")
            .into_iter()
            .map(|p| (p.suffix, p.is_leaf))
            .collect();
        assert_eq!(
            suffixes,
            vec![
                (".stamp".to_string(), true),
                (".status[:]".to_string(), false),
                (".status[:].level".to_string(), true),
                (".status[:].name".to_string(), true),
            ]
        );
    }

    #[test]
    fn self_referencing_schema_terminates() {
        let types = Datatypes::new().with(Schema::new(
            "tree/Node",
            vec![
                FieldDefinition::new("value", "int32"),
                FieldDefinition::array("children", "tree/Node"),
            ],
        ));
        let paths = field_paths(&types, "tree/Node");
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[1].field_type(), "tree/Node");
    }

    #[test]
    fn cache_invalidates_on_nested_change() {
        let mut cache = SchemaFieldCache::new();
        let types = diagnostics();
        let first = cache.get_or_build(&types, "diag/Array");
        let again = cache.get_or_build(&types, "diag/Array");
        assert!(Arc::ptr_eq(&first, &again));

        let changed = diagnostics().with(Schema::new(
            "diag/Status",
            vec![FieldDefinition::new("level", "int8")],
        ));
        let rebuilt = cache.get_or_build(&changed, "diag/Array");
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.len(), 3);
    }
}
