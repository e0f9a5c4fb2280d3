//! In-memory relational store
//!
//! Enforces what the persister has to cope with in a real SQL Server:
//! missing columns, text widths, column types, identity keys, foreign keys
//! and composite primary keys. Violations come back as classified
//! [`SchemaIssue`]s or as fatal [`DriverError::Other`]s. Schema, table and
//! column names compare case-insensitively, as under SQL Server's default
//! collation.

use crate::error::{DriverError, SchemaIssue};
use crate::sql::driver::StoreDriver;
use crate::sql::statement::{ColumnDef, ForeignKey, JunctionDef, QualifiedName, Statement, TableDef};
use crate::sql::types::{text_width, SqlType};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub not_null: bool,
    pub default: Option<Value>,
}

impl StoredColumn {
    fn nullable(name: &str, sql_type: SqlType) -> Self {
        StoredColumn {
            name: name.to_string(),
            sql_type,
            not_null: false,
            default: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoredTable {
    columns: Vec<StoredColumn>,
    rows: Vec<Map<String, Value>>,
    /// Next identity value, for tables with an `[id]` identity key
    identity: Option<i64>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    keys: HashSet<Vec<String>>,
    ids: HashSet<i64>,
}

fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Lookup key for a table
fn table_key(name: &QualifiedName) -> QualifiedName {
    QualifiedName {
        schema: name.schema.to_lowercase(),
        table: name.table.to_lowercase(),
    }
}

fn check_unique<'a>(columns: impl IntoIterator<Item = &'a str>, what: &str) -> Result<(), DriverError> {
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.to_lowercase()) {
            return Err(DriverError::other(format!(
                "column '{}' specified more than once in {}",
                column, what
            )));
        }
    }
    Ok(())
}

impl StoredTable {
    fn from_table_def(def: &TableDef) -> Result<Self, DriverError> {
        let mut columns = vec![StoredColumn {
            name: "id".to_string(),
            sql_type: SqlType::Int,
            not_null: true,
            default: None,
        }];
        columns.extend(def.columns.iter().map(|c| StoredColumn::nullable(&c.name, c.sql_type)));
        if def.current_marker {
            columns.push(StoredColumn {
                default: Some(Value::from(1)),
                ..StoredColumn::nullable("IsCurrent", SqlType::Int)
            });
        }
        if def.audit_column {
            columns.push(StoredColumn::nullable("Inserted", SqlType::DateTime));
        }
        check_unique(columns.iter().map(|c| c.name.as_str()), &format!("CREATE TABLE {}", def.name))?;

        Ok(StoredTable {
            columns,
            identity: Some(1),
            primary_key: vec!["id".to_string()],
            ..StoredTable::default()
        })
    }

    fn from_junction_def(def: &JunctionDef) -> Result<Self, DriverError> {
        let mut columns: Vec<StoredColumn> = def
            .foreign_keys
            .iter()
            .map(|fk| StoredColumn {
                not_null: true,
                ..StoredColumn::nullable(&fk.column, SqlType::Int)
            })
            .collect();
        if def.audit_column {
            columns.push(StoredColumn::nullable("Inserted", SqlType::DateTime));
        }
        check_unique(columns.iter().map(|c| c.name.as_str()), &format!("CREATE TABLE {}", def.name))?;

        Ok(StoredTable {
            columns,
            primary_key: def.foreign_keys.iter().map(|fk| fk.column.clone()).collect(),
            foreign_keys: def.foreign_keys.clone(),
            ..StoredTable::default()
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&StoredColumn> {
        self.columns.iter().find(|c| same_name(&c.name, name))
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut StoredColumn> {
        self.columns.iter_mut().find(|c| same_name(&c.name, name))
    }

    pub fn has_id(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }
}

/// A [`StoreDriver`] that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    schemas: BTreeSet<String>,
    tables: HashMap<QualifiedName, StoredTable>,
    created: Vec<QualifiedName>,
    last_id: Option<i64>,
    commits: usize,
    executed: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains(&schema.to_lowercase())
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<&StoredTable> {
        self.tables.get(&table_key(&QualifiedName::new(schema, table)))
    }

    /// Tables in creation order
    pub fn table_names(&self) -> impl Iterator<Item = &QualifiedName> {
        self.created.iter()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Statements executed successfully
    pub fn executed(&self) -> usize {
        self.executed
    }

    fn require_schema(&self, name: &QualifiedName) -> Result<(), DriverError> {
        if self.schemas.contains(&name.schema.to_lowercase()) {
            Ok(())
        } else {
            Err(DriverError::other(format!("schema '{}' does not exist", name.schema)))
        }
    }

    fn stored_mut(&mut self, name: &QualifiedName) -> Result<&mut StoredTable, DriverError> {
        self.tables
            .get_mut(&table_key(name))
            .ok_or_else(|| DriverError::other(format!("invalid object name '{}'", name)))
    }

    fn create(&mut self, name: &QualifiedName, table: StoredTable) -> Result<(), DriverError> {
        self.require_schema(name)?;
        let key = table_key(name);
        if !self.tables.contains_key(&key) {
            self.tables.insert(key, table);
            self.created.push(name.clone());
        }
        Ok(())
    }

    fn add_column(&mut self, name: &QualifiedName, column: &ColumnDef) -> Result<(), DriverError> {
        let table = self.stored_mut(name)?;
        if table.column(&column.name).is_some() {
            return Err(DriverError::other(format!(
                "column '{}' already exists in '{}'",
                column.name, name
            )));
        }
        table.columns.push(StoredColumn::nullable(&column.name, column.sql_type));
        Ok(())
    }

    fn alter_column(&mut self, name: &QualifiedName, column: &ColumnDef) -> Result<(), DriverError> {
        let table = self.stored_mut(name)?;
        let stored_name = table
            .column(&column.name)
            .map(|c| c.name.clone())
            .ok_or_else(|| DriverError::from(SchemaIssue::UnknownColumn {
                column: column.name.clone(),
            }))?;
        let all_fit = table
            .rows
            .iter()
            .filter_map(|row| row.get(&stored_name))
            .all(|v| fits(column.sql_type, v));
        if !all_fit {
            return Err(DriverError::other(format!(
                "existing data in '{}' does not fit {}",
                column.name, column.sql_type
            )));
        }

        if let Some(stored) = table.column_mut(&stored_name) {
            stored.sql_type = column.sql_type;
        }
        Ok(())
    }

    fn insert(&mut self, name: &QualifiedName, values: &[(String, Value)]) -> Result<(), DriverError> {
        let table = self
            .tables
            .get(&table_key(name))
            .ok_or_else(|| DriverError::other(format!("invalid object name '{}'", name)))?;
        check_unique(values.iter().map(|(c, _)| c.as_str()), &format!("INSERT INTO {}", name))?;

        for (column, _) in values {
            if table.column(column).is_none() {
                return Err(SchemaIssue::UnknownColumn {
                    column: column.clone(),
                }
                .into());
            }
            if same_name(column, "id") && table.identity.is_some() {
                return Err(DriverError::other("cannot insert explicit value for identity column"));
            }
        }

        for (column, value) in values {
            let sql_type = table.column(column).map(|c| c.sql_type).unwrap_or(SqlType::TEXT);
            if !sql_type.accepts(value) {
                return Err(SchemaIssue::TypeMismatch {
                    column: column.clone(),
                }
                .into());
            }
            if let Some(width) = sql_type.width() {
                let chars = text_width(value);
                if !width.holds(chars) {
                    return Err(SchemaIssue::ValueTooWide {
                        column: column.clone(),
                        width: chars,
                    }
                    .into());
                }
            }
        }

        let given: HashMap<String, &Value> = values.iter().map(|(c, v)| (c.to_lowercase(), v)).collect();
        let mut row = Map::new();
        let mut id = None;
        for column in &table.columns {
            let value = if column.name == "id" && table.identity.is_some() {
                let next = table.identity.unwrap_or(1);
                id = Some(next);
                Value::from(next)
            } else if let Some(v) = given.get(&column.name.to_lowercase()) {
                (*v).clone()
            } else {
                column.default.clone().unwrap_or(Value::Null)
            };

            if value.is_null() && column.not_null {
                return Err(DriverError::other(format!(
                    "cannot insert NULL into column '{}'",
                    column.name
                )));
            }
            row.insert(column.name.clone(), value);
        }

        for fk in &table.foreign_keys {
            let target = row.get(&fk.column).and_then(Value::as_i64);
            let exists = match (target, self.tables.get(&table_key(&fk.references))) {
                (Some(target), Some(referenced)) => referenced.has_id(target),
                _ => false,
            };
            if !exists {
                return Err(DriverError::other(format!(
                    "FOREIGN KEY constraint on '{}' references a missing row of '{}'",
                    fk.column, fk.references
                )));
            }
        }

        let key: Vec<String> = table
            .primary_key
            .iter()
            .map(|c| {
                row.iter()
                    .find(|(name, _)| same_name(name, c))
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        if table.keys.contains(&key) {
            return Err(DriverError::other(format!("PRIMARY KEY violation in '{}'", name)));
        }

        let table = self.stored_mut(name)?;
        table.keys.insert(key);
        table.rows.push(row);
        if let Some(id) = id {
            table.ids.insert(id);
            table.identity = Some(id + 1);
            self.last_id = Some(id);
        }
        Ok(())
    }
}

fn fits(sql_type: SqlType, value: &Value) -> bool {
    sql_type.accepts(value) && sql_type.width().map_or(true, |w| w.holds(text_width(value)))
}

impl StoreDriver for MemoryStore {
    fn execute(&mut self, statement: &Statement) -> Result<(), DriverError> {
        match statement {
            Statement::CreateSchema { schema } => {
                self.schemas.insert(crate::sql::statement::sql_identifier(schema).to_lowercase());
            }
            Statement::CreateTable(def) => self.create(&def.name, StoredTable::from_table_def(def)?)?,
            Statement::CreateJunction(def) => {
                for fk in &def.foreign_keys {
                    if !self.tables.contains_key(&table_key(&fk.references)) {
                        return Err(DriverError::other(format!(
                            "foreign key references missing table '{}'",
                            fk.references
                        )));
                    }
                }
                self.create(&def.name, StoredTable::from_junction_def(def)?)?
            }
            Statement::AddColumn { table, column } => self.add_column(table, column)?,
            Statement::AlterColumn { table, column } => self.alter_column(table, column)?,
            Statement::Insert { table, values } => self.insert(table, values)?,
        }
        self.executed += 1;
        Ok(())
    }

    fn last_inserted_id(&mut self) -> Result<i64, DriverError> {
        self.last_id
            .ok_or_else(|| DriverError::other("no identity value has been generated"))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.commits += 1;
        Ok(())
    }
}
