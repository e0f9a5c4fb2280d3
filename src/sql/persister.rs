//! Writing normalized tables into a relational store
//!
//! Entity tables go first in dependency order, then junction tables. Each
//! row is inserted through a small state machine that repairs the table
//! schema when the store reports a [`SchemaIssue`] and retries the row.

use crate::error::{ConvertError, DriverError, Result, SchemaIssue};
use crate::melt::tables::{JunctionTable, Normalized, Table};
use crate::sql::driver::StoreDriver;
use crate::sql::order::persistence_order;
use crate::sql::plan::{JunctionPlan, SchemaPlan, TablePlan, Typing};
use crate::sql::statement::{ColumnDef, QualifiedName, Statement};
use crate::sql::types::{SqlType, Width};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Configuration for persisting normalized tables
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Target schema, created when missing
    pub schema: String,

    /// Table that gets the `IsCurrent` marker
    pub root_table: String,

    /// Schema adjustments allowed for a single row
    pub max_retries: usize,

    /// Size columns from all rows before creating tables
    pub preflight: bool,

    pub mark_current: bool,

    pub audit_column: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            schema: String::from("dbo"),
            root_table: String::from("rootTable"),
            max_retries: 10,
            preflight: true,
            mark_current: true,
            audit_column: true,
        }
    }
}

/// A schema change made while inserting a row
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaAdjustment {
    pub table: String,
    pub column: String,
    pub issue: SchemaIssue,
    pub new_type: SqlType,
}

/// Table name -> (sequential id -> id assigned by the store)
pub type IdMaps = BTreeMap<String, BTreeMap<u64, i64>>;

enum InsertState {
    Inserting,
    SchemaAdjusting(SchemaIssue),
    Done(i64),
    Failed(ConvertError),
}

pub struct SchemaPersister<'d, D: StoreDriver + ?Sized> {
    driver: &'d mut D,
    config: PersistConfig,
    adjustments: Vec<SchemaAdjustment>,
    /// Text widths applied by adjustments in this run
    widened: HashMap<(QualifiedName, String), Width>,
}

impl<'d, D: StoreDriver + ?Sized> SchemaPersister<'d, D> {
    pub fn new(driver: &'d mut D, config: PersistConfig) -> Self {
        SchemaPersister {
            driver,
            config,
            adjustments: Vec::new(),
            widened: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Schema changes made so far, in the order they were made
    pub fn adjustments(&self) -> &[SchemaAdjustment] {
        &self.adjustments
    }

    /// Persist every table of `normalized`.
    ///
    /// Each table is committed on its own, so on error the tables persisted
    /// before the failing one stay in the store.
    pub fn persist(&mut self, normalized: &Normalized) -> Result<IdMaps> {
        let typing = if self.config.preflight {
            Typing::Preflight
        } else {
            Typing::FirstSeen
        };
        let plan = SchemaPlan::from_normalized(normalized, &self.config.schema, &self.config.root_table, typing);

        let schema = Statement::CreateSchema {
            schema: self.config.schema.clone(),
        };
        let schema_name = self.config.schema.clone();
        self.run(&schema_name, &schema)?;

        let names: Vec<&str> = normalized.tables.iter().map(|t| t.name.as_str()).collect();
        let order = persistence_order(&names, &normalized.hierarchy);
        debug!("Persistence order: {:?}", order);

        let tables: HashMap<&str, &Table> = normalized.tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut id_maps = IdMaps::new();
        for name in &order {
            let (table, table_plan) = match (tables.get(name.as_str()), plan.get_plan(name)) {
                (Some(table), Some(table_plan)) => (table, table_plan),
                _ => return Err(ConvertError::consistency(format!("no plan for table '{}'", name))),
            };
            let ids = self.persist_table(table, table_plan)?;
            id_maps.insert(name.clone(), ids);
        }

        for junction in &normalized.junctions {
            match plan.get_junction_plan(&junction.name) {
                Some(junction_plan) => self.persist_junction(junction, junction_plan, &id_maps)?,
                None => debug!("Skipping junction {}: an endpoint table was not persisted", junction.name),
            }
        }

        Ok(id_maps)
    }

    fn run(&mut self, table: &str, statement: &Statement) -> Result<()> {
        debug!("{}", statement);
        self.driver
            .execute(statement)
            .map_err(|e| ConvertError::persistence(table, None, e))
    }

    fn commit(&mut self, table: &str) -> Result<()> {
        self.driver
            .commit()
            .map_err(|e| ConvertError::persistence(table, None, e))
    }

    fn persist_table(&mut self, table: &Table, plan: &TablePlan) -> Result<BTreeMap<u64, i64>> {
        let def = plan.table_def(self.config.mark_current, self.config.audit_column);
        self.run(&table.name, &Statement::CreateTable(def))?;

        let mut ids = BTreeMap::new();
        for (index, row) in table.rows.iter().enumerate() {
            let row_id = Table::row_id(row).unwrap_or(index as u64 + 1);
            let values: Vec<(String, Value)> = plan
                .columns
                .iter()
                .filter_map(|c| {
                    row.get(&c.column)
                        .filter(|v| !v.is_null())
                        .map(|v| (c.sql_name.clone(), v.clone()))
                })
                .collect();

            let statement = Statement::Insert {
                table: plan.name.clone(),
                values,
            };
            let stored_id = self.insert_row(table, plan, row_id, &statement)?;
            ids.insert(row_id, stored_id);
        }

        self.commit(&table.name)?;
        info!("Persisted {} rows into {}", table.rows.len(), plan.name);
        Ok(ids)
    }

    fn insert_row(&mut self, table: &Table, plan: &TablePlan, row: u64, statement: &Statement) -> Result<i64> {
        let mut attempts = 0;
        let mut state = InsertState::Inserting;

        loop {
            state = match state {
                InsertState::Inserting => {
                    debug!("{}", statement);
                    match self.driver.execute(statement) {
                        Ok(()) => match self.driver.last_inserted_id() {
                            Ok(id) => InsertState::Done(id),
                            Err(e) => InsertState::Failed(ConvertError::persistence(&table.name, Some(row), e)),
                        },
                        Err(DriverError::Schema(issue)) => InsertState::SchemaAdjusting(issue),
                        Err(e) => InsertState::Failed(ConvertError::persistence(&table.name, Some(row), e)),
                    }
                }
                InsertState::SchemaAdjusting(issue) if attempts >= self.config.max_retries => {
                    InsertState::Failed(ConvertError::RetriesExhausted {
                        table: table.name.clone(),
                        row,
                        attempts,
                        last: issue,
                    })
                }
                InsertState::SchemaAdjusting(issue) => {
                    attempts += 1;
                    match self.adjust(&table.name, &plan.name, row, issue) {
                        Ok(()) => InsertState::Inserting,
                        Err(e) => InsertState::Failed(e),
                    }
                }
                InsertState::Done(id) => return Ok(id),
                InsertState::Failed(e) => return Err(e),
            };
        }
    }

    /// Issue the DDL that answers `issue`
    fn adjust(&mut self, table: &str, name: &QualifiedName, row: u64, issue: SchemaIssue) -> Result<()> {
        let column = issue.column().to_string();
        let key = (name.clone(), column.clone());

        let (statement, width) = match &issue {
            SchemaIssue::UnknownColumn { .. } => {
                let def = ColumnDef {
                    name: column.clone(),
                    sql_type: SqlType::TEXT,
                };
                (Statement::AddColumn { table: name.clone(), column: def }, Width::DEFAULT)
            }
            SchemaIssue::ValueTooWide { width, .. } => {
                let required = Width::fitting(*width);
                let target = match self.widened.get(&key) {
                    None => Some(required),
                    Some(applied) => applied.next().map(|next| next.max(required)),
                };
                let Some(target) = target else {
                    // already NVARCHAR(MAX)
                    return Err(ConvertError::persistence(table, Some(row), issue.clone().into()));
                };
                let def = ColumnDef {
                    name: column.clone(),
                    sql_type: SqlType::NVarChar(target),
                };
                (Statement::AlterColumn { table: name.clone(), column: def }, target)
            }
            SchemaIssue::TypeMismatch { .. } => {
                let def = ColumnDef {
                    name: column.clone(),
                    sql_type: SqlType::NVarChar(Width::Max),
                };
                (Statement::AlterColumn { table: name.clone(), column: def }, Width::Max)
            }
        };

        let new_type = SqlType::NVarChar(width);
        warn!("Row {} of {}: {}; changing column [{}] to {}", row, name, issue, column, new_type);
        self.driver
            .execute(&statement)
            .map_err(|e| ConvertError::persistence(table, Some(row), e))?;

        self.widened.insert(key, width);
        self.adjustments.push(SchemaAdjustment {
            table: table.to_string(),
            column,
            issue,
            new_type,
        });
        Ok(())
    }

    fn persist_junction(&mut self, junction: &JunctionTable, plan: &JunctionPlan, id_maps: &IdMaps) -> Result<()> {
        let def = plan.junction_def(self.config.audit_column);
        self.run(&junction.name, &Statement::CreateJunction(def))?;

        let (Some(parents), Some(children)) = (id_maps.get(&junction.parent), id_maps.get(&junction.child)) else {
            return Err(ConvertError::consistency(format!(
                "junction '{}' persisted before its endpoint tables",
                junction.name
            )));
        };
        let translate = |ids: &BTreeMap<u64, i64>, table: &str, id: u64| {
            ids.get(&id).copied().ok_or_else(|| {
                ConvertError::consistency(format!(
                    "junction '{}' references id {} missing from table '{}'",
                    junction.name, id, table
                ))
            })
        };

        for (index, &(parent, child)) in junction.rows.iter().enumerate() {
            let statement = Statement::Insert {
                table: plan.name.clone(),
                values: vec![
                    (plan.parent_column.clone(), Value::from(translate(parents, &junction.parent, parent)?)),
                    (plan.child_column.clone(), Value::from(translate(children, &junction.child, child)?)),
                ],
            };
            debug!("{}", statement);
            self.driver
                .execute(&statement)
                .map_err(|e| ConvertError::persistence(&junction.name, Some(index as u64 + 1), e))?;
        }

        self.commit(&junction.name)?;
        info!("Persisted {} links into {}", junction.rows.len(), plan.name);
        Ok(())
    }
}
