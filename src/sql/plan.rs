//! Pre-computed table schemas
//!
//! Column sets, types and text widths are derived from the in-memory tables
//! before any `CREATE TABLE` is issued, so the adaptive insert path is only
//! needed for tables that already exist in the store.
//!
//! Store names are assigned here too: sanitizing can map distinct names to
//! the same identifier, so names are made unique per schema (tables) and
//! per table (columns).

use crate::melt::tables::{JunctionTable, Normalized, Table, ID_COLUMN};
use crate::sql::statement::{
    unique_identifier, ColumnDef, ForeignKey, JunctionDef, QualifiedName, TableDef, RESERVED_COLUMNS,
};
use crate::sql::types::{SqlType, Width};
use std::collections::{HashMap, HashSet};

/// How column types are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Typing {
    /// Unify the types of all values and size text columns to the widest value
    Preflight,
    /// First non-null value decides; text starts at the default width
    FirstSeen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    /// Column name in the normalized table
    pub column: String,
    /// Sanitized column name in the store
    pub sql_name: String,
    pub sql_type: SqlType,
}

/// Pre-computed schema for one entity table
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub table: String,
    pub name: QualifiedName,
    pub columns: Vec<ColumnPlan>,
    pub is_root: bool,
}

impl TablePlan {
    /// `name` is the table's store name, already unique in its schema
    pub fn from_table(table: &Table, name: QualifiedName, typing: Typing, is_root: bool) -> Self {
        let mut taken: HashSet<String> = RESERVED_COLUMNS.iter().map(|c| c.to_lowercase()).collect();
        let columns = table
            .columns
            .iter()
            .filter(|c| c.as_str() != ID_COLUMN)
            .map(|column| ColumnPlan {
                column: column.clone(),
                sql_name: unique_identifier(column, &mut taken),
                sql_type: column_type(table, column, typing),
            })
            .collect();

        TablePlan {
            table: table.name.clone(),
            name,
            columns,
            is_root,
        }
    }

    pub fn column(&self, column: &str) -> Option<&ColumnPlan> {
        self.columns.iter().find(|c| c.column == column)
    }

    pub fn table_def(&self, mark_current: bool, audit_column: bool) -> TableDef {
        TableDef {
            name: self.name.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| ColumnDef {
                    name: c.sql_name.clone(),
                    sql_type: c.sql_type,
                })
                .collect(),
            current_marker: mark_current && self.is_root,
            audit_column,
        }
    }
}

fn column_type(table: &Table, column: &str, typing: Typing) -> SqlType {
    let mut values = table
        .rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|v| !v.is_null());

    match typing {
        Typing::Preflight => values
            .map(SqlType::infer)
            .reduce(SqlType::unify)
            .unwrap_or(SqlType::TEXT),
        Typing::FirstSeen => match values.next().map(SqlType::infer) {
            Some(SqlType::NVarChar(_)) | None => SqlType::NVarChar(Width::DEFAULT),
            Some(other) => other,
        },
    }
}

/// Store names for one junction table and the tables it references
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionPlan {
    pub junction: String,
    pub name: QualifiedName,
    pub parent: QualifiedName,
    pub child: QualifiedName,
    pub parent_column: String,
    pub child_column: String,
}

impl JunctionPlan {
    fn new(junction: &JunctionTable, name: QualifiedName, parent: QualifiedName, child: QualifiedName) -> Self {
        let mut taken: HashSet<String> = HashSet::from(["inserted".to_string()]);
        let parent_column = unique_identifier(&junction.parent_column, &mut taken);
        let child_column = unique_identifier(&junction.child_column, &mut taken);

        JunctionPlan {
            junction: junction.name.clone(),
            name,
            parent,
            child,
            parent_column,
            child_column,
        }
    }

    pub fn junction_def(&self, audit_column: bool) -> JunctionDef {
        JunctionDef {
            name: self.name.clone(),
            foreign_keys: vec![
                ForeignKey {
                    column: self.parent_column.clone(),
                    references: self.parent.clone(),
                },
                ForeignKey {
                    column: self.child_column.clone(),
                    references: self.child.clone(),
                },
            ],
            audit_column,
        }
    }
}

/// Plans for every table of a normalized document
#[derive(Debug, Clone)]
pub struct SchemaPlan {
    pub table_plans: HashMap<String, TablePlan>,

    /// Junctions whose endpoint tables both have plans
    pub junction_plans: HashMap<String, JunctionPlan>,
}

impl SchemaPlan {
    pub fn from_normalized(normalized: &Normalized, schema: &str, root_table: &str, typing: Typing) -> Self {
        // entity tables claim names first, in discovery order
        let mut taken = HashSet::new();
        let mut table_plans = HashMap::with_capacity(normalized.tables.len());
        for table in &normalized.tables {
            let name = QualifiedName::new(schema, &unique_identifier(&table.name, &mut taken));
            let plan = TablePlan::from_table(table, name, typing, table.name == root_table);
            table_plans.insert(table.name.clone(), plan);
        }

        let mut junction_plans = HashMap::with_capacity(normalized.junctions.len());
        for junction in &normalized.junctions {
            let (Some(parent), Some(child)) = (table_plans.get(&junction.parent), table_plans.get(&junction.child))
            else {
                continue;
            };
            let name = QualifiedName::new(schema, &unique_identifier(&junction.name, &mut taken));
            let plan = JunctionPlan::new(junction, name, parent.name.clone(), child.name.clone());
            junction_plans.insert(junction.name.clone(), plan);
        }

        SchemaPlan {
            table_plans,
            junction_plans,
        }
    }

    pub fn get_plan(&self, table: &str) -> Option<&TablePlan> {
        self.table_plans.get(table)
    }

    pub fn get_junction_plan(&self, junction: &str) -> Option<&JunctionPlan> {
        self.junction_plans.get(junction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::extractor::StructureAnalyzer;
    use crate::melt::tables::TableBuilder;
    use crate::melt::types::MeltConfig;
    use serde_json::json;

    fn normalized(value: serde_json::Value) -> Normalized {
        let analysis = StructureAnalyzer::new(MeltConfig::default().with_root_name("root"))
            .analyze(value)
            .unwrap();
        let mut normalized = TableBuilder::new(analysis).build().unwrap();
        normalized.prune();
        normalized
    }

    #[test]
    fn test_preflight_plan() {
        let doc = normalized(json!([
            {"n": 1, "score": 2, "bio": "short", "when": "2024-01-01"},
            {"n": 2, "score": 2.5, "bio": "x".repeat(700), "when": "2024-02-01T10:00:00Z"}
        ]));
        let plan = SchemaPlan::from_normalized(&doc, "dbo", "root", Typing::Preflight);
        let root = plan.get_plan("root").unwrap();

        assert!(root.is_root);
        assert_eq!(root.name.to_string(), "[dbo].[root]");
        assert_eq!(root.column("n").unwrap().sql_type, SqlType::Int);
        assert_eq!(root.column("score").unwrap().sql_type, SqlType::Float);
        assert_eq!(
            root.column("bio").unwrap().sql_type,
            SqlType::NVarChar(Width::Bounded(1000))
        );
        assert_eq!(root.column("when").unwrap().sql_type, SqlType::DateTime);
        assert!(root.column("id").is_none());
    }

    #[test]
    fn test_first_seen_plan() {
        let doc = normalized(json!([
            {"score": 2, "bio": "short"},
            {"score": 2.5, "bio": "x".repeat(700)}
        ]));
        let plan = SchemaPlan::from_normalized(&doc, "dbo", "root", Typing::FirstSeen);
        let root = plan.get_plan("root").unwrap();

        assert_eq!(root.column("score").unwrap().sql_type, SqlType::Int);
        assert_eq!(root.column("bio").unwrap().sql_type, SqlType::TEXT);
    }

    #[test]
    fn test_current_marker_only_on_root() {
        let doc = normalized(json!({"a": 1, "b": {"c": 2}}));
        let plan = SchemaPlan::from_normalized(&doc, "dbo", "root", Typing::Preflight);

        assert!(plan.get_plan("root").unwrap().table_def(true, true).current_marker);
        assert!(!plan.get_plan("root_b").unwrap().table_def(true, true).current_marker);
        assert!(!plan.get_plan("root").unwrap().table_def(false, true).current_marker);
    }

    #[test]
    fn test_sanitized_column_names() {
        let doc = normalized(json!({"first name": "Ada"}));
        let plan = SchemaPlan::from_normalized(&doc, "my schema", "root", Typing::Preflight);
        let root = plan.get_plan("root").unwrap();

        assert_eq!(root.name.schema, "my_schema");
        assert_eq!(root.column("first name").unwrap().sql_name, "first_name");
    }

    #[test]
    fn test_colliding_column_names() {
        let doc = normalized(json!({
            "first name": "Ada",
            "first_name": "Grace",
            "ID": 7,
            "IsCurrent": false,
            "inserted": "today"
        }));
        let plan = SchemaPlan::from_normalized(&doc, "dbo", "root", Typing::Preflight);
        let root = plan.get_plan("root").unwrap();

        let names: Vec<&str> = root.columns.iter().map(|c| c.sql_name.as_str()).collect();
        assert_eq!(names, vec!["first_name", "first_name_2", "ID_2", "IsCurrent_2", "inserted_2"]);
    }

    #[test]
    fn test_colliding_table_names() {
        let doc = normalized(json!({"a": 1, "": {"x": 1}, "b": {"y": 2}, "root b": {"z": 3}}));
        let plan = SchemaPlan::from_normalized(&doc, "dbo", "root", Typing::Preflight);

        assert_eq!(plan.get_plan("root").unwrap().name.table, "root");
        assert_eq!(plan.get_plan("root_").unwrap().name.table, "root_2");
        assert_eq!(plan.get_plan("root_b").unwrap().name.table, "root_b");
        assert_eq!(plan.get_plan("root_root b").unwrap().name.table, "root_root_b");

        let junction = plan.get_junction_plan("root_root__rel").unwrap();
        assert_eq!(junction.parent.table, "root");
        assert_eq!(junction.child.table, "root_2");

        let mut names: Vec<String> = plan
            .table_plans
            .values()
            .map(|p| p.name.table.to_lowercase())
            .chain(plan.junction_plans.values().map(|p| p.name.table.to_lowercase()))
            .collect();
        let count = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), count);
    }
}
