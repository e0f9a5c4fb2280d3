//! Identifier resolution and table finalization
//!
//! Entities are resolved from the leaves of the relationship graph towards
//! the root. Each gets dense ids `1..=N` in record order; relationships are
//! then rewritten into junction tables over those ids.

use crate::error::{ConvertError, Result};
use crate::melt::types::{Analysis, Entity, EntityHierarchy, Relationship, TempId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Name of the synthetic primary key column
pub const ID_COLUMN: &str = "id";

/// Where a document's own `id` field is kept, since `id` is the synthetic key.
/// Suffixed `_2`, `_3`, ... when the document already has a field of that name.
pub const SOURCE_ID_COLUMN: &str = "source_id";

/// Column for an entity's own `id` field that no record already uses
fn source_id_column(entity: &Entity) -> String {
    let used = |name: &str| entity.records.iter().any(|r| r.fields.contains_key(name));
    if !used(SOURCE_ID_COLUMN) {
        return SOURCE_ID_COLUMN.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", SOURCE_ID_COLUMN, n))
        .find(|name| !used(name))
        .unwrap_or_else(|| SOURCE_ID_COLUMN.to_string())
}

/// A finalized entity table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,

    /// Column names, `id` first, then first-seen order
    pub columns: Vec<String>,

    /// Every row holds every column in `columns`
    pub rows: Vec<Map<String, Value>>,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Sequential id of a row
    pub fn row_id(row: &Map<String, Value>) -> Option<u64> {
        row.get(ID_COLUMN).and_then(Value::as_u64)
    }

    /// Drop every column that is null in all rows and null-fill the rest
    pub fn prune_columns(&mut self) {
        let rows = &self.rows;
        self.columns.retain(|col| {
            col == ID_COLUMN
                || rows
                    .iter()
                    .any(|row| row.get(col).map_or(false, |v| !v.is_null()))
        });

        let columns = &self.columns;
        for row in self.rows.iter_mut() {
            let mut pruned = Map::new();
            for col in columns {
                pruned.insert(col.clone(), row.remove(col).unwrap_or(Value::Null));
            }
            *row = pruned;
        }
    }
}

/// A finalized relationship: one row per parent/child edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionTable {
    pub name: String,
    pub parent: String,
    pub child: String,
    pub parent_column: String,
    pub child_column: String,

    /// (parent id, child id) in the sequential ids of the two tables
    pub rows: Vec<(u64, u64)>,
}

impl JunctionTable {
    pub fn columns(&self) -> [&str; 2] {
        [&self.parent_column, &self.child_column]
    }

    /// Rows as column maps, the shape rows are written out in
    pub fn row_maps(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|&(parent, child)| {
                let mut row = Map::new();
                row.insert(self.parent_column.clone(), Value::from(parent));
                row.insert(self.child_column.clone(), Value::from(child));
                row
            })
            .collect()
    }
}

/// Column name referencing an entity's `id`
pub fn reference_column(entity: &str) -> String {
    format!("{}_{}", entity, ID_COLUMN)
}

/// The relational form of one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Normalized {
    /// Entity tables in discovery order
    pub tables: Vec<Table>,

    /// Junction tables in discovery order
    pub junctions: Vec<JunctionTable>,

    pub hierarchy: EntityHierarchy,

    /// Order in which entities received their ids
    pub resolution_order: Vec<String>,
}

impl Normalized {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn junction(&self, name: &str) -> Option<&JunctionTable> {
        self.junctions.iter().find(|j| j.name == name)
    }

    /// Prune all-null columns and drop tables without rows. Idempotent.
    pub fn prune(&mut self) {
        for table in self.tables.iter_mut() {
            table.prune_columns();
        }
        self.tables.retain(|t| !t.rows.is_empty());
        self.junctions.retain(|j| !j.rows.is_empty());
    }
}

/// Builds finalized tables from an [`Analysis`]
pub struct TableBuilder {
    analysis: Analysis,
    tables: BTreeMap<usize, Table>,
    /// entity name -> (temp id -> sequential id)
    id_maps: HashMap<String, HashMap<TempId, u64>>,
    resolution_order: Vec<String>,
}

impl TableBuilder {
    pub fn new(analysis: Analysis) -> Self {
        TableBuilder {
            analysis,
            tables: BTreeMap::new(),
            id_maps: HashMap::new(),
            resolution_order: Vec::new(),
        }
    }

    /// Resolve every entity and relationship. Columns are not pruned here.
    pub fn build(mut self) -> Result<Normalized> {
        let count = self.analysis.entities.len();
        let children = self.child_entities();
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (parent, kids) in children.iter().enumerate() {
            for &child in kids {
                parents[child].push(parent);
            }
        }
        let mut waiting: Vec<usize> = children.iter().map(HashSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..count).filter(|&idx| waiting[idx] == 0).collect();
        let mut resolved = vec![false; count];

        // Leaves first; an entity becomes eligible once all its children are
        // resolved, lowest discovery index first
        while let Some(idx) = ready.pop_first() {
            self.resolve_entity(idx);
            resolved[idx] = true;
            for &parent in &parents[idx] {
                waiting[parent] -= 1;
                if waiting[parent] == 0 {
                    ready.insert(parent);
                }
            }
        }

        for idx in 0..count {
            if !resolved[idx] {
                log::warn!(
                    "Entity '{}' is isolated or part of a cycle; resolving it out of order",
                    self.analysis.entities[idx].name
                );
                self.resolve_entity(idx);
                resolved[idx] = true;
            }
        }

        let junctions = self
            .analysis
            .relationships
            .iter()
            .map(|rel| self.resolve_relationship(rel))
            .collect::<Result<Vec<_>>>()?;

        Ok(Normalized {
            tables: self.tables.into_values().collect(),
            junctions,
            hierarchy: self.analysis.hierarchy,
            resolution_order: self.resolution_order,
        })
    }

    /// Child entity indices per entity index, from the relationship records
    fn child_entities(&self) -> Vec<HashSet<usize>> {
        let index: HashMap<&str, usize> = self
            .analysis
            .entities
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.name.as_str(), idx))
            .collect();

        let mut children = vec![HashSet::new(); self.analysis.entities.len()];
        for rel in self.analysis.relationships.iter().filter(|r| !r.links.is_empty()) {
            if let (Some(&parent), Some(&child)) =
                (index.get(rel.parent.as_str()), index.get(rel.child.as_str()))
            {
                children[parent].insert(child);
            }
        }
        children
    }

    fn resolve_entity(&mut self, idx: usize) {
        let entity: &Entity = &self.analysis.entities[idx];
        let mut id_map = HashMap::with_capacity(entity.records.len());
        let mut columns = vec![ID_COLUMN.to_string()];
        let source_id = source_id_column(entity);
        let mut seen: HashSet<&str> = HashSet::new();
        let mut rows = Vec::with_capacity(entity.records.len());

        for (offset, record) in entity.records.iter().enumerate() {
            let id = offset as u64 + 1;
            id_map.insert(record.temp_id, id);

            let mut row = Map::new();
            row.insert(ID_COLUMN.to_string(), Value::from(id));
            for (key, value) in record.fields.iter() {
                let key = if key == ID_COLUMN { source_id.as_str() } else { key.as_str() };
                if seen.insert(key) {
                    columns.push(key.to_string());
                }
                row.insert(key.to_string(), normalize_value(value));
            }
            rows.push(row);
        }

        log::debug!("Resolved entity '{}' ({} rows)", entity.name, rows.len());
        self.resolution_order.push(entity.name.clone());
        self.id_maps.insert(entity.name.clone(), id_map);
        self.tables.insert(
            idx,
            Table {
                name: entity.name.clone(),
                columns,
                rows,
            },
        );
    }

    fn resolve_relationship(&self, rel: &Relationship) -> Result<JunctionTable> {
        let parent_ids = self.id_map(rel, &rel.parent)?;
        let child_ids = self.id_map(rel, &rel.child)?;

        let rows = rel
            .links
            .iter()
            .map(|&(parent, child)| {
                let parent_id = lookup(parent_ids, rel, &rel.parent, parent)?;
                let child_id = lookup(child_ids, rel, &rel.child, child)?;
                Ok((parent_id, child_id))
            })
            .collect::<Result<Vec<_>>>()?;

        let parent_column = if rel.is_self_referential() {
            format!("parent_{}", reference_column(&rel.parent))
        } else {
            reference_column(&rel.parent)
        };

        Ok(JunctionTable {
            name: rel.name.clone(),
            parent: rel.parent.clone(),
            child: rel.child.clone(),
            parent_column,
            child_column: reference_column(&rel.child),
            rows,
        })
    }

    fn id_map(&self, rel: &Relationship, entity: &str) -> Result<&HashMap<TempId, u64>> {
        self.id_maps.get(entity).ok_or_else(|| {
            ConvertError::consistency(format!(
                "relationship '{}' references entity '{}' before its ids were assigned",
                rel.name, entity
            ))
        })
    }
}

fn lookup(ids: &HashMap<TempId, u64>, rel: &Relationship, entity: &str, temp_id: TempId) -> Result<u64> {
    ids.get(&temp_id).copied().ok_or_else(|| {
        ConvertError::consistency(format!(
            "relationship '{}' references unknown temp id {} of entity '{}'",
            rel.name, temp_id, entity
        ))
    })
}

/// Booleans become 0/1; null and empty strings become null
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Bool(true) => Value::from(1),
        Value::Bool(false) => Value::from(0),
        Value::String(s) if s.is_empty() => Value::Null,
        other => other.clone(),
    }
}
