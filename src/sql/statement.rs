//! Structured SQL Server statements and their T-SQL text
//!
//! The persister talks to drivers in [`Statement`]s rather than SQL text, so
//! stores can act on them directly and scripts can be replayed.

use crate::sql::types::SqlType;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Maximum identifier length in SQL Server
const MAX_IDENTIFIER_LEN: usize = 128;

/// Characters replaced by `_` in identifiers
const UNSAFE_CHARS: &str = "`~!@#$%^&*()+={}[]|\\:;\"'<>,.?/ ";

/// Make a name safe to use as a bracketed SQL Server identifier
pub fn sql_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_empty".to_string();
    }

    let replaced: String = name
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(c) || c.is_control() { '_' } else { c })
        .collect();

    let mut safe = String::with_capacity(replaced.len() + 1);
    if replaced.starts_with(|c: char| c.is_ascii_digit()) {
        safe.push('_');
    }
    for c in replaced.chars() {
        if c == '_' && safe.ends_with('_') {
            continue;
        }
        safe.push(c);
    }

    let mut safe: String = safe.chars().take(MAX_IDENTIFIER_LEN).collect();
    while safe.len() > 1 && safe.ends_with('_') {
        safe.pop();
    }
    safe
}

/// Columns the store adds to entity tables on its own
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "IsCurrent", "Inserted"];

/// [`sql_identifier`] of `name`, suffixed `_2`, `_3`, ... until it differs
/// from every name in `taken`. Names compare case-insensitively, as they
/// do in SQL Server. `taken` holds lowercased names and gains the result.
pub fn unique_identifier(name: &str, taken: &mut HashSet<String>) -> String {
    let base = sql_identifier(name);
    if taken.insert(base.to_lowercase()) {
        return base;
    }

    let mut n = 2;
    loop {
        let suffix = format!("_{}", n);
        let stem: String = base.chars().take(MAX_IDENTIFIER_LEN - suffix.len()).collect();
        let candidate = format!("{}{}", stem.trim_end_matches('_'), suffix);
        if taken.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

/// `[schema].[table]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    /// Both parts are sanitized
    pub fn new(schema: &str, table: &str) -> Self {
        QualifiedName {
            schema: sql_identifier(schema),
            table: sql_identifier(table),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}].[{}]", self.schema, self.table)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: QualifiedName,

    /// Data columns, excluding the identity key
    pub columns: Vec<ColumnDef>,

    /// Adds `[IsCurrent] INT DEFAULT 1`
    pub current_marker: bool,

    /// Adds `[Inserted] DATETIME DEFAULT GETDATE()`
    pub audit_column: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub references: QualifiedName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JunctionDef {
    pub name: QualifiedName,

    /// `INT NOT NULL` columns, each referencing `[id]` of its table
    pub foreign_keys: Vec<ForeignKey>,

    pub audit_column: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateSchema { schema: String },
    CreateTable(TableDef),
    CreateJunction(JunctionDef),
    AddColumn { table: QualifiedName, column: ColumnDef },
    AlterColumn { table: QualifiedName, column: ColumnDef },
    /// An empty value list inserts `DEFAULT VALUES`
    Insert { table: QualifiedName, values: Vec<(String, Value)> },
}

impl Statement {
    /// Table the statement operates on, if any
    pub fn table(&self) -> Option<&QualifiedName> {
        match self {
            Statement::CreateSchema { .. } => None,
            Statement::CreateTable(def) => Some(&def.name),
            Statement::CreateJunction(def) => Some(&def.name),
            Statement::AddColumn { table, .. }
            | Statement::AlterColumn { table, .. }
            | Statement::Insert { table, .. } => Some(table),
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Statement::Insert { .. })
    }
}

/// SQL literal for a JSON scalar
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("N'{}'", s.replace('\'', "''")),
        other => format!("N'{}'", other.to_string().replace('\'', "''")),
    }
}

fn if_table_missing(f: &mut fmt::Formatter<'_>, name: &QualifiedName) -> fmt::Result {
    writeln!(f, "IF NOT EXISTS (")?;
    writeln!(f, "    SELECT * FROM sys.objects")?;
    writeln!(f, "    WHERE object_id = OBJECT_ID(N'{}') AND type in (N'U')", name)?;
    writeln!(f, ")")
}

fn write_columns(f: &mut fmt::Formatter<'_>, lines: &[String]) -> fmt::Result {
    for (i, line) in lines.iter().enumerate() {
        let sep = if i + 1 < lines.len() { "," } else { "" };
        writeln!(f, "        {}{}", line, sep)?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateSchema { schema } => {
                let schema = sql_identifier(schema);
                writeln!(f, "IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = '{}')", schema)?;
                write!(f, "    EXEC('CREATE SCHEMA [{}]')", schema)
            }
            Statement::CreateTable(def) => {
                let mut lines = vec!["[id] INT IDENTITY(1,1) PRIMARY KEY".to_string()];
                lines.extend(
                    def.columns
                        .iter()
                        .map(|c| format!("[{}] {} NULL", c.name, c.sql_type)),
                );
                if def.current_marker {
                    lines.push("[IsCurrent] INT DEFAULT 1".to_string());
                }
                if def.audit_column {
                    lines.push("[Inserted] DATETIME DEFAULT GETDATE()".to_string());
                }

                if_table_missing(f, &def.name)?;
                writeln!(f, "BEGIN")?;
                writeln!(f, "    CREATE TABLE {} (", def.name)?;
                write_columns(f, &lines)?;
                writeln!(f, "    )")?;
                write!(f, "END")
            }
            Statement::CreateJunction(def) => {
                let mut lines: Vec<String> = def
                    .foreign_keys
                    .iter()
                    .map(|fk| format!("[{}] INT NOT NULL", fk.column))
                    .collect();
                if def.audit_column {
                    lines.push("[Inserted] DATETIME DEFAULT GETDATE()".to_string());
                }
                for fk in &def.foreign_keys {
                    lines.push(format!(
                        "FOREIGN KEY ([{}]) REFERENCES {} ([id])",
                        fk.column, fk.references
                    ));
                }
                let key: Vec<String> = def
                    .foreign_keys
                    .iter()
                    .map(|fk| format!("[{}]", fk.column))
                    .collect();
                lines.push(format!(
                    "CONSTRAINT [PK_{}] PRIMARY KEY ({})",
                    def.name.table,
                    key.join(", ")
                ));

                if_table_missing(f, &def.name)?;
                writeln!(f, "BEGIN")?;
                writeln!(f, "    CREATE TABLE {} (", def.name)?;
                write_columns(f, &lines)?;
                writeln!(f, "    )")?;
                write!(f, "END")
            }
            Statement::AddColumn { table, column } => {
                write!(f, "ALTER TABLE {} ADD [{}] {} NULL", table, column.name, column.sql_type)
            }
            Statement::AlterColumn { table, column } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN [{}] {} NULL",
                table, column.name, column.sql_type
            ),
            Statement::Insert { table, values } if values.is_empty() => {
                write!(f, "INSERT INTO {} DEFAULT VALUES", table)
            }
            Statement::Insert { table, values } => {
                let columns: Vec<String> = values.iter().map(|(c, _)| format!("[{}]", c)).collect();
                let literals: Vec<String> = values.iter().map(|(_, v)| literal(v)).collect();
                write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    literals.join(", ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::types::Width;
    use serde_json::json;

    #[test]
    fn test_sql_identifier() {
        assert_eq!(sql_identifier("users"), "users");
        assert_eq!(sql_identifier("first name"), "first_name");
        assert_eq!(sql_identifier("a..b"), "a_b");
        assert_eq!(sql_identifier("1st"), "_1st");
        assert_eq!(sql_identifier("weird]name["), "weird_name");
        assert_eq!(sql_identifier(""), "_empty");
        assert_eq!(sql_identifier(&"x".repeat(200)).len(), 128);
    }

    #[test]
    fn test_unique_identifier() {
        let mut taken: HashSet<String> = RESERVED_COLUMNS.iter().map(|c| c.to_lowercase()).collect();

        assert_eq!(unique_identifier("first name", &mut taken), "first_name");
        assert_eq!(unique_identifier("first_name", &mut taken), "first_name_2");
        assert_eq!(unique_identifier("First_Name", &mut taken), "First_Name_3");
        assert_eq!(unique_identifier("ID", &mut taken), "ID_2");
        assert_eq!(unique_identifier("isCurrent", &mut taken), "isCurrent_2");

        let long = "x".repeat(200);
        let first = unique_identifier(&long, &mut taken);
        let second = unique_identifier(&long, &mut taken);
        assert_eq!(first.len(), 128);
        assert_eq!(second.len(), 128);
        assert!(second.ends_with("_2"));
        // stable under sanitizing again
        assert_eq!(sql_identifier(&second), second);
    }

    #[test]
    fn test_literal() {
        assert_eq!(literal(&json!(null)), "NULL");
        assert_eq!(literal(&json!(42)), "42");
        assert_eq!(literal(&json!(1.5)), "1.5");
        assert_eq!(literal(&json!(true)), "1");
        assert_eq!(literal(&json!("O'Brien")), "N'O''Brien'");
    }

    #[test]
    fn test_insert_text() {
        let table = QualifiedName::new("dbo", "users");
        let stmt = Statement::Insert {
            table: table.clone(),
            values: vec![("name".to_string(), json!("Alice")), ("age".to_string(), json!(30))],
        };
        assert_eq!(stmt.to_string(), "INSERT INTO [dbo].[users] ([name], [age]) VALUES (N'Alice', 30)");

        let stmt = Statement::Insert { table, values: vec![] };
        assert_eq!(stmt.to_string(), "INSERT INTO [dbo].[users] DEFAULT VALUES");
    }

    #[test]
    fn test_create_table_text() {
        let stmt = Statement::CreateTable(TableDef {
            name: QualifiedName::new("dbo", "root"),
            columns: vec![ColumnDef {
                name: "a".to_string(),
                sql_type: SqlType::Int,
            }],
            current_marker: true,
            audit_column: true,
        });
        let sql = stmt.to_string();
        assert!(sql.starts_with("IF NOT EXISTS ("));
        assert!(sql.contains("OBJECT_ID(N'[dbo].[root]')"));
        assert!(sql.contains("[id] INT IDENTITY(1,1) PRIMARY KEY,"));
        assert!(sql.contains("[a] INT NULL,"));
        assert!(sql.contains("[IsCurrent] INT DEFAULT 1,"));
        assert!(sql.contains("[Inserted] DATETIME DEFAULT GETDATE()\n"));
        assert!(sql.ends_with("END"));
    }

    #[test]
    fn test_create_junction_text() {
        let stmt = Statement::CreateJunction(JunctionDef {
            name: QualifiedName::new("dbo", "root_items_rel"),
            foreign_keys: vec![
                ForeignKey {
                    column: "root_id".to_string(),
                    references: QualifiedName::new("dbo", "root"),
                },
                ForeignKey {
                    column: "items_id".to_string(),
                    references: QualifiedName::new("dbo", "items"),
                },
            ],
            audit_column: false,
        });
        let sql = stmt.to_string();
        assert!(sql.contains("[root_id] INT NOT NULL,"));
        assert!(sql.contains("FOREIGN KEY ([items_id]) REFERENCES [dbo].[items] ([id])"));
        assert!(sql.contains("CONSTRAINT [PK_root_items_rel] PRIMARY KEY ([root_id], [items_id])"));
    }

    #[test]
    fn test_alter_text() {
        let stmt = Statement::AlterColumn {
            table: QualifiedName::new("dbo", "users"),
            column: ColumnDef {
                name: "bio".to_string(),
                sql_type: SqlType::NVarChar(Width::Bounded(500)),
            },
        };
        assert_eq!(stmt.to_string(), "ALTER TABLE [dbo].[users] ALTER COLUMN [bio] NVARCHAR(500) NULL");
    }
}
