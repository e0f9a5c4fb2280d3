//! # json2sql - JSON to relational tables
//!
//! Normalizes an arbitrary JSON document into relational tables and
//! persists them into SQL Server, either live through a [`StoreDriver`] or
//! as a replayable T-SQL script.
//!
//! ## Modules
//!
//! - **melt**: Analyze a document into entities and build normalized tables
//! - **sql**: Table plans, statements, drivers and the adaptive persister
//!
//! ## Quick Start
//!
//! ```rust
//! use json2sql::{convert, Conversion, ConvertConfig, Target};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let data = json!({
//!     "name": "Alice",
//!     "posts": [
//!         {"title": "First Post"},
//!         {"title": "Second Post"}
//!     ]
//! });
//!
//! let config = ConvertConfig::new("users", "dbo");
//! if let Conversion::Script { tables, script } = convert(data, &config, Target::Script)? {
//!     // users (1 row), posts (2 rows), users_posts_rel (2 rows)
//!     assert_eq!(tables.tables.len(), 2);
//!     assert!(script.text.contains("CREATE TABLE [dbo].[posts]"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Live Mode
//!
//! ```rust
//! use json2sql::sql::MemoryStore;
//! use json2sql::{convert_str, ConvertConfig, Target};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut store = MemoryStore::new();
//! let config = ConvertConfig::default();
//! let conversion = convert_str(r#"{"items": [1, 2, 3]}"#, &config, Target::Live(&mut store))?;
//!
//! assert_eq!(conversion.tables().table("items").unwrap().row_count(), 3);
//! assert_eq!(store.table("dbo", "items").unwrap().row_count(), 3);
//! # Ok(())
//! # }
//! ```

use log::info;
use serde::Deserialize;
use serde_json::Value;

mod error;
pub mod melt;
pub mod sql;

// Re-export commonly used types for convenience
pub use error::{ConvertError, DriverError, Result, SchemaIssue};
pub use melt::{MeltConfig, Normalized, StructureAnalyzer, TableBuilder};
pub use sql::{IdMaps, PersistConfig, SchemaAdjustment, SchemaPersister, Script, ScriptRecorder, StoreDriver};

/// Configuration for a whole conversion
#[derive(Debug, Clone, Default)]
pub struct ConvertConfig {
    pub melt: MeltConfig,
    pub persist: PersistConfig,
}

impl ConvertConfig {
    /// Root table name and target schema, keeping both root names in sync
    pub fn new(root_name: &str, schema: &str) -> Self {
        ConvertConfig {
            melt: MeltConfig::default().with_root_name(root_name),
            persist: PersistConfig {
                schema: schema.to_string(),
                root_table: root_name.to_string(),
                ..PersistConfig::default()
            },
        }
    }
}

/// Where converted tables go
pub enum Target<'a> {
    /// Execute against a store
    Live(&'a mut dyn StoreDriver),
    /// Render a SQL script
    Script,
}

#[derive(Debug)]
pub enum Conversion {
    Live {
        tables: Normalized,
        id_maps: IdMaps,
        adjustments: Vec<SchemaAdjustment>,
    },
    Script {
        tables: Normalized,
        script: Script,
    },
}

impl Conversion {
    pub fn tables(&self) -> &Normalized {
        match self {
            Conversion::Live { tables, .. } | Conversion::Script { tables, .. } => tables,
        }
    }
}

/// Deepest array/object nesting either parser accepts
pub const MAX_INPUT_DEPTH: usize = 256;

/// Reject input nested past [`MAX_INPUT_DEPTH`] before building a `Value`
fn check_depth(bytes: &[u8]) -> Result<()> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &byte in bytes {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                if depth > MAX_INPUT_DEPTH {
                    return Err(ConvertError::InputTooDeep { limit: MAX_INPUT_DEPTH });
                }
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

pub fn parse_json(text: &str) -> Result<Value> {
    check_depth(text.as_bytes())?;
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = Value::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Parse with simd-json; the buffer is used as scratch space
pub fn parse_json_bytes(bytes: &mut [u8]) -> Result<Value> {
    check_depth(bytes)?;
    Ok(simd_json::serde::from_slice(bytes)?)
}

/// Analyze a document and build its pruned tables
pub fn normalize(value: Value, config: &MeltConfig) -> Result<Normalized> {
    let analysis = StructureAnalyzer::new(config.clone()).analyze(value)?;
    let mut normalized = TableBuilder::new(analysis).build()?;
    normalized.prune();

    info!(
        "Normalized into {} tables and {} junction tables",
        normalized.tables.len(),
        normalized.junctions.len()
    );
    Ok(normalized)
}

/// Main entry point: normalize a document and persist it to `target`
pub fn convert(value: Value, config: &ConvertConfig, target: Target<'_>) -> Result<Conversion> {
    let tables = normalize(value, &config.melt)?;

    match target {
        Target::Live(driver) => {
            let mut persister = SchemaPersister::new(driver, config.persist.clone());
            let id_maps = persister.persist(&tables)?;
            let adjustments = persister.adjustments().to_vec();
            Ok(Conversion::Live {
                tables,
                id_maps,
                adjustments,
            })
        }
        Target::Script => {
            let mut recorder = ScriptRecorder::new(&config.persist.schema);
            SchemaPersister::new(&mut recorder, config.persist.clone()).persist(&tables)?;
            Ok(Conversion::Script {
                tables,
                script: recorder.finish(),
            })
        }
    }
}

pub fn convert_str(text: &str, config: &ConvertConfig, target: Target<'_>) -> Result<Conversion> {
    convert(parse_json(text)?, config, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::MemoryStore;
    use serde_json::json;

    fn config() -> ConvertConfig {
        ConvertConfig::new("root", "dbo")
    }

    fn script(value: Value) -> (Normalized, Script) {
        match convert(value, &config(), Target::Script).unwrap() {
            Conversion::Script { tables, script } => (tables, script),
            other => panic!("expected a script, got {:?}", other),
        }
    }

    #[test]
    fn test_object_root_has_one_row() {
        let tables = normalize(json!({"a": 1, "b": "x"}), &config().melt).unwrap();
        assert_eq!(tables.table("root").unwrap().row_count(), 1);
    }

    #[test]
    fn test_array_root_has_row_per_element() {
        let tables = normalize(json!([{"a": 1}, {"a": 2}, {"a": 3}]), &config().melt).unwrap();
        assert_eq!(tables.table("root").unwrap().row_count(), 3);
    }

    #[test]
    fn test_array_field_junction_per_item() {
        let tables = normalize(
            json!([{"posts": [{"t": 1}, {"t": 2}]}, {"posts": [{"t": 3}]}]),
            &config().melt,
        )
        .unwrap();
        assert_eq!(tables.table("posts").unwrap().row_count(), 3);
        assert_eq!(tables.junction("root_posts_rel").unwrap().rows.len(), 3);
    }

    #[test]
    fn test_script_layout() {
        let (_, script) = script(json!({"a": 1, "b": {"c": 2}}));
        let text = &script.text;

        assert!(text.starts_with("-- Generated SQL Script for dbo schema\n\n"));
        let schema = text.find("CREATE SCHEMA [dbo]").unwrap();
        let child = text.find("CREATE TABLE [dbo].[root_b]").unwrap();
        let root = text.find("CREATE TABLE [dbo].[root] (").unwrap();
        let junction = text.find("CREATE TABLE [dbo].[root_root_b_rel]").unwrap();
        assert!(schema < child && child < root && root < junction);

        assert!(text.contains("INSERT INTO [dbo].[root] ([a]) VALUES (1);\n\n"));
        assert!(text.contains("INSERT INTO [dbo].[root_root_b_rel] ([root_id], [root_b_id]) VALUES (1, 1);"));
    }

    #[test]
    fn test_script_replay_reproduces_tables() {
        let doc = json!({
            "user": {"name": "Ada", "joined": "2024-01-15"},
            "posts": [
                {"title": "First", "tags": ["a", "b"]},
                {"title": "Second", "tags": ["c"], "draft": true}
            ],
            "scores": [1, 2.5, null]
        });
        let (tables, script) = script(doc);

        let mut store = MemoryStore::new();
        script.replay(&mut store).unwrap();

        for table in &tables.tables {
            let stored = store.table("dbo", &table.name).unwrap();
            assert_eq!(stored.row_count(), table.row_count(), "rows of {}", table.name);
            for column in &table.columns {
                assert!(stored.column(column).is_some(), "column {} of {}", column, table.name);
            }
        }
        for junction in &tables.junctions {
            let stored = store.table("dbo", &junction.name).unwrap();
            assert_eq!(stored.row_count(), junction.rows.len());
        }
    }

    #[test]
    fn test_live_and_script_agree() {
        let doc = json!({"items": [{"n": 1}, {"n": 2}], "meta": {"v": "x"}});

        let mut store = MemoryStore::new();
        let live = convert(doc.clone(), &config(), Target::Live(&mut store)).unwrap();
        let (_, script) = script(doc);
        let mut replayed = MemoryStore::new();
        script.replay(&mut replayed).unwrap();

        for name in store.table_names() {
            let a = store.table(&name.schema, &name.table).unwrap();
            let b = replayed.table(&name.schema, &name.table).unwrap();
            assert_eq!(a.rows(), b.rows());
        }
        match live {
            Conversion::Live { id_maps, adjustments, .. } => {
                assert_eq!(id_maps["items"].len(), 2);
                assert!(adjustments.is_empty());
            }
            other => panic!("expected live output, got {:?}", other),
        }
    }

    #[test]
    fn test_config_keeps_root_names_in_sync() {
        let config = ConvertConfig::new("orders", "sales");
        assert_eq!(config.melt.root_name, "orders");
        assert_eq!(config.persist.root_table, "orders");
        assert_eq!(config.persist.schema, "sales");

        let defaults = ConvertConfig::default();
        assert_eq!(defaults.melt.root_name, "rootTable");
        assert_eq!(defaults.persist.root_table, "rootTable");
        assert_eq!(defaults.persist.schema, "dbo");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_json("{not json"), Err(ConvertError::Input(_))));
        let mut bytes = b"[1, 2".to_vec();
        assert!(matches!(parse_json_bytes(&mut bytes), Err(ConvertError::InputBytes(_))));

        let mut bytes = br#"{"b": 1, "a": 2}"#.to_vec();
        let value = parse_json_bytes(&mut bytes).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    fn nested_text(depth: usize) -> String {
        format!("{}1{}", "[".repeat(depth), "]".repeat(depth))
    }

    #[test]
    fn test_parsers_share_depth_limit() {
        let text = nested_text(200);
        let value = parse_json(&text).unwrap();
        let mut bytes = text.into_bytes();
        assert_eq!(parse_json_bytes(&mut bytes).unwrap(), value);

        for depth in [MAX_INPUT_DEPTH + 1, 100_000] {
            let text = nested_text(depth);
            assert!(matches!(parse_json(&text), Err(ConvertError::InputTooDeep { .. })));
            let mut bytes = text.into_bytes();
            assert!(matches!(parse_json_bytes(&mut bytes), Err(ConvertError::InputTooDeep { .. })));
        }
    }

    #[test]
    fn test_brackets_in_strings_are_not_nesting() {
        let text = format!(r#"{{"s": "{}\"{}", "t": [1]}}"#, "[".repeat(1000), "{".repeat(1000));
        let value = parse_json(&text).unwrap();
        assert_eq!(value["t"], json!([1]));
        assert_eq!(value["s"].as_str().unwrap().len(), 2001);

        let mut bytes = text.into_bytes();
        assert_eq!(parse_json_bytes(&mut bytes).unwrap(), value);
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(matches!(parse_json("[1] [2]"), Err(ConvertError::Input(_))));
    }

    #[test]
    fn test_impossible_dates_stay_text() {
        let mut store = MemoryStore::new();
        let doc = json!([{"d": "2024-01-15"}, {"d": "2024-02-30"}]);
        let live = convert(doc, &config(), Target::Live(&mut store)).unwrap();

        let root = store.table("dbo", "root").unwrap();
        assert_eq!(root.row_count(), 2);
        assert_eq!(root.column("d").unwrap().sql_type, sql::SqlType::TEXT);
        match live {
            Conversion::Live { adjustments, .. } => assert!(adjustments.is_empty()),
            other => panic!("expected live output, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_str_default_names() {
        let mut store = MemoryStore::new();
        convert_str(r#"{"a": 1}"#, &ConvertConfig::default(), Target::Live(&mut store)).unwrap();
        let root = store.table("dbo", "rootTable").unwrap();
        assert_eq!(root.rows()[0].get("IsCurrent").unwrap(), 1);
    }
}
