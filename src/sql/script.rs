//! Script mode: render statements as a replayable SQL script

use crate::error::DriverError;
use crate::sql::driver::StoreDriver;
use crate::sql::statement::Statement;
use std::collections::HashMap;

/// A rendered SQL script and the statements it was rendered from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub text: String,
    pub statements: Vec<Statement>,
}

impl Script {
    /// Execute the recorded statements against another store
    pub fn replay<D: StoreDriver + ?Sized>(&self, driver: &mut D) -> Result<(), DriverError> {
        for statement in &self.statements {
            driver.execute(statement)?;
        }
        driver.commit()
    }
}

/// A [`StoreDriver`] that records statements instead of executing them.
///
/// Identity values are simulated with one counter per table, so junction
/// inserts in the script see the same ids a fresh store would generate.
#[derive(Debug, Default)]
pub struct ScriptRecorder {
    lines: Vec<String>,
    statements: Vec<Statement>,
    counters: HashMap<String, i64>,
    last_id: Option<i64>,
}

impl ScriptRecorder {
    pub fn new(schema: &str) -> Self {
        ScriptRecorder {
            lines: vec![
                format!("-- Generated SQL Script for {} schema", schema),
                String::new(),
            ],
            ..Self::default()
        }
    }

    pub fn finish(self) -> Script {
        Script {
            text: self.lines.join("\n"),
            statements: self.statements,
        }
    }
}

impl StoreDriver for ScriptRecorder {
    fn execute(&mut self, statement: &Statement) -> Result<(), DriverError> {
        if let Statement::Insert { table, .. } = statement {
            let counter = self.counters.entry(table.to_string()).or_insert(0);
            *counter += 1;
            self.last_id = Some(*counter);
        }

        let sql = statement.to_string();
        self.lines.push(format!("{};", sql.trim_end().trim_end_matches(';')));
        self.lines.push(String::new());
        self.statements.push(statement.clone());
        Ok(())
    }

    fn last_inserted_id(&mut self) -> Result<i64, DriverError> {
        self.last_id
            .ok_or_else(|| DriverError::other("no insert has been recorded"))
    }
}
