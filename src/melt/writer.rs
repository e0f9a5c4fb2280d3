use crate::melt::tables::Normalized;
use crate::sql::statement::unique_identifier;
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes tables to JSON Lines files, one `<table>.jsonl` per table.
///
/// File stems are table names made identifier-safe, so no path separators
/// or `..` survive, and distinct tables never share a file.
pub struct TableWriter<W: Write> {
    output_dir: PathBuf,
    writers: HashMap<String, W>,
    stems: HashSet<String>,
}

impl TableWriter<std::fs::File> {
    /// Create a new TableWriter that writes to files in a directory
    pub fn new_file_writer<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)
            .context("Failed to create output directory")?;

        Ok(TableWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
            stems: HashSet::new(),
        })
    }

    /// Write entity and junction tables to their respective files
    pub fn write_tables(&mut self, normalized: &Normalized) -> Result<()> {
        for table in &normalized.tables {
            self.write_rows(&table.name, &table.rows)?;
        }
        for junction in &normalized.junctions {
            self.write_rows(&junction.name, &junction.row_maps())?;
        }
        Ok(())
    }

    fn write_rows(&mut self, table: &str, rows: &[Map<String, Value>]) -> Result<()> {
        if !self.writers.contains_key(table) {
            let stem = unique_identifier(table, &mut self.stems);
            let path = self.output_dir.join(format!("{}.jsonl", stem));
            if path.parent() != Some(self.output_dir.as_path()) {
                bail!("Table '{}' maps outside the output directory", table);
            }
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            self.writers.insert(table.to_string(), file);
        }

        let writer = self
            .writers
            .get_mut(table)
            .context("Missing writer for table")?;
        for row in rows {
            let json = serde_json::to_string(row)
                .context("Failed to serialize row")?;
            writeln!(writer, "{}", json)
                .context("Failed to write row")?;
        }
        Ok(())
    }

    /// Flush all writers
    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

/// A simpler writer that writes all rows to a single output, tagged with
/// their table
pub struct SingleWriter<W: Write> {
    writer: W,
}

impl<W: Write> SingleWriter<W> {
    pub fn new(writer: W) -> Self {
        SingleWriter { writer }
    }

    pub fn write_tables(&mut self, normalized: &Normalized) -> Result<()> {
        for table in &normalized.tables {
            self.write_rows(&table.name, &table.rows)?;
        }
        for junction in &normalized.junctions {
            self.write_rows(&junction.name, &junction.row_maps())?;
        }
        Ok(())
    }

    fn write_rows(&mut self, table: &str, rows: &[Map<String, Value>]) -> Result<()> {
        for row in rows {
            let mut data = row.clone();
            data.insert("_table".to_string(), Value::String(table.to_string()));

            let json = serde_json::to_string(&data)
                .context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json)
                .context("Failed to write row")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::types::MeltConfig;
    use serde_json::json;

    fn normalized() -> Normalized {
        crate::normalize(
            json!({"name": "Alice", "tags": ["a", "b"]}),
            &MeltConfig::default().with_root_name("root"),
        )
        .unwrap()
    }

    #[test]
    fn test_single_writer() {
        let mut buffer = Vec::new();
        let mut writer = SingleWriter::new(&mut buffer);
        writer.write_tables(&normalized()).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        // root, two tags, two links
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], json!({"id": 1, "name": "Alice", "_table": "root"}));
        assert_eq!(lines[4]["_table"], "root_tags_rel");
    }

    #[test]
    fn test_table_writer_uses_output_dir() {
        let dir = std::env::temp_dir().join(format!("json2sql-writer-{}", std::process::id()));
        let mut writer = TableWriter::new_file_writer(&dir).unwrap();
        writer.write_tables(&normalized()).unwrap();
        writer.flush().unwrap();

        let tags = std::fs::read_to_string(dir.join("tags.jsonl")).unwrap();
        assert_eq!(tags.lines().count(), 2);
        let rel = std::fs::read_to_string(dir.join("root_tags_rel.jsonl")).unwrap();
        assert_eq!(rel.lines().next().unwrap(), r#"{"root_id":1,"tags_id":1}"#);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_table_writer_stays_in_output_dir() {
        let base = std::env::temp_dir().join(format!("json2sql-escape-{}", std::process::id()));
        let dir = base.join("out");
        let normalized = crate::normalize(
            json!({"../escaped": [1], "a b": {"x": 1}, "a_b": {"x": 2}}),
            &MeltConfig::default().with_root_name("root"),
        )
        .unwrap();

        let mut writer = TableWriter::new_file_writer(&dir).unwrap();
        writer.write_tables(&normalized).unwrap();
        writer.flush().unwrap();

        let mut files: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                "_escaped.jsonl",
                "root.jsonl",
                "root_a_b.jsonl",
                "root_a_b_2.jsonl",
                "root_escaped_rel.jsonl",
                "root_root_a_b_rel.jsonl",
                "root_root_a_b_rel_2.jsonl",
            ]
        );
        assert!(!base.join("escaped.jsonl").exists());

        std::fs::remove_dir_all(&base).unwrap();
    }
}
