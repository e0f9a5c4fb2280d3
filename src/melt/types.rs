use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Transient per-entity identifier assigned during analysis
pub type TempId = u64;

/// One row of an entity before identifier resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub temp_id: TempId,

    /// Scalar fields only; nested values live in child entities
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(temp_id: TempId) -> Self {
        Record {
            temp_id,
            fields: Map::new(),
        }
    }
}

/// A discovered record type, destined to become one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The table name, e.g. "rootTable", "rootTable_address", "posts"
    pub name: String,

    /// Records in discovery order (temp ids ascending)
    pub records: Vec<Record>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Entity {
            name: name.into(),
            records: Vec::new(),
        }
    }
}

/// Parent/child edges between the records of two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// `{parent}_{child}_rel`
    pub name: String,
    pub parent: String,
    pub child: String,

    /// (parent temp id, child temp id) pairs in discovery order
    pub links: Vec<(TempId, TempId)>,
}

impl Relationship {
    pub fn new(parent: &str, child: &str) -> Self {
        Relationship {
            name: Self::name_for(parent, child),
            parent: parent.to_string(),
            child: child.to_string(),
            links: Vec::new(),
        }
    }

    pub fn name_for(parent: &str, child: &str) -> String {
        format!("{}_{}_rel", parent, child)
    }

    pub fn is_self_referential(&self) -> bool {
        self.parent == self.child
    }
}

/// Child entity name -> parent entity name.
///
/// A child name reused under another parent keeps only the most recent
/// parent.
pub type EntityHierarchy = BTreeMap<String, String>;

/// How entities spawned by array fields are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayNaming {
    /// `{field}`: same-named arrays under different parents share a table
    #[default]
    Bare,
    /// `{parent}{separator}{field}`, like nested objects
    Prefixed,
}

/// Configuration for the melting process
#[derive(Debug, Clone)]
pub struct MeltConfig {
    /// Name of the root entity table
    pub root_name: String,

    /// Separator for nested entity type names
    pub separator: String,

    /// Column used for scalars that have no field name of their own
    pub value_field: String,

    pub array_naming: ArrayNaming,

    /// Fields to always treat as scalar values (don't extract as entities).
    /// Nested values in these fields are stored as JSON text.
    pub scalar_fields: Vec<String>,

    /// Reject values that cannot be melted instead of skipping them
    pub strict: bool,
}

impl MeltConfig {
    pub fn with_root_name(mut self, root_name: impl Into<String>) -> Self {
        self.root_name = root_name.into();
        self
    }

    pub fn is_scalar_field(&self, field_name: &str) -> bool {
        self.scalar_fields.iter().any(|f| f == field_name)
    }

    pub fn nested_name(&self, parent: &str, field: &str) -> String {
        format!("{}{}{}", parent, self.separator, field)
    }

    pub fn array_name(&self, parent: &str, field: &str) -> String {
        match self.array_naming {
            ArrayNaming::Bare => field.to_string(),
            ArrayNaming::Prefixed => self.nested_name(parent, field),
        }
    }
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            root_name: String::from("rootTable"),
            separator: String::from("_"),
            value_field: String::from("value"),
            array_naming: ArrayNaming::Bare,
            scalar_fields: vec![],
            strict: false,
        }
    }
}

/// Output of structural analysis for one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    /// Entities in discovery order
    pub entities: Vec<Entity>,

    /// Relationships in discovery order
    pub relationships: Vec<Relationship>,

    pub hierarchy: EntityHierarchy,
}

impl Analysis {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }
}
