use crate::error::{ConvertError, Result};
use crate::melt::types::{Analysis, Entity, MeltConfig, Record, Relationship, TempId};
use crate::melt::value::{dispose, to_json_text};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Pending work for the analyzer.
///
/// Traversal runs off an explicit stack so nesting depth is bounded by
/// memory rather than by the call stack.
enum Frame {
    /// Fill an already allocated record with the fields of an object
    Object {
        entity: usize,
        record: usize,
        map: Map<String, Value>,
    },
    /// Extract a nested object or array field of a parent record
    Field {
        parent: usize,
        parent_temp_id: TempId,
        key: String,
        value: Value,
    },
    /// One element of an array; `link` is the relationship edge to create
    Item {
        entity: usize,
        link: Option<(usize, TempId)>,
        value: Value,
    },
}

impl Frame {
    fn into_value(self) -> Value {
        match self {
            Frame::Object { map, .. } => Value::Object(map),
            Frame::Field { value, .. } | Frame::Item { value, .. } => value,
        }
    }
}

/// Walks a JSON document and splits it into entities and relationships
pub struct StructureAnalyzer {
    config: MeltConfig,
}

impl StructureAnalyzer {
    pub fn new(config: MeltConfig) -> Self {
        StructureAnalyzer { config }
    }

    pub fn config(&self) -> &MeltConfig {
        &self.config
    }

    /// Analyze one document. Each call is an independent run.
    pub fn analyze(&self, value: Value) -> Result<Analysis> {
        let mut run = AnalyzerRun::new(&self.config);
        run.visit_root(value)?;
        run.drain()?;
        Ok(run.finish())
    }
}

/// State of a single analysis run
struct AnalyzerRun<'a> {
    config: &'a MeltConfig,
    entities: Vec<Entity>,
    entity_index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    relationship_index: HashMap<String, usize>,
    hierarchy: crate::melt::types::EntityHierarchy,
    /// Next temp id per entity, indexed like `entities`
    next_temp_id: Vec<TempId>,
    stack: Vec<Frame>,
}

impl<'a> AnalyzerRun<'a> {
    fn new(config: &'a MeltConfig) -> Self {
        AnalyzerRun {
            config,
            entities: Vec::new(),
            entity_index: HashMap::new(),
            relationships: Vec::new(),
            relationship_index: HashMap::new(),
            hierarchy: Default::default(),
            next_temp_id: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn visit_root(&mut self, value: Value) -> Result<()> {
        let config = self.config;
        let root = self.init_entity(&config.root_name);

        match value {
            Value::Object(map) => {
                let (record, _) = self.new_record(root);
                self.stack.push(Frame::Object {
                    entity: root,
                    record,
                    map,
                });
            }
            Value::Array(items) => {
                for value in items.into_iter().rev() {
                    self.stack.push(Frame::Item {
                        entity: root,
                        link: None,
                        value,
                    });
                }
            }
            scalar => {
                let (record, _) = self.new_record(root);
                self.entities[root].records[record]
                    .fields
                    .insert(config.value_field.clone(), scalar);
            }
        }

        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Object { entity, record, map } => self.fill_record(entity, record, map)?,
                Frame::Field {
                    parent,
                    parent_temp_id,
                    key,
                    value,
                } => self.extract_field(parent, parent_temp_id, key, value)?,
                Frame::Item { entity, link, value } => self.extract_item(entity, link, value)?,
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Analysis {
        Analysis {
            entities: std::mem::take(&mut self.entities),
            relationships: std::mem::take(&mut self.relationships),
            hierarchy: std::mem::take(&mut self.hierarchy),
        }
    }

    /// Copy scalar fields into the record and schedule nested fields
    fn fill_record(&mut self, entity: usize, record: usize, map: Map<String, Value>) -> Result<()> {
        let parent_temp_id = self.entities[entity].records[record].temp_id;
        let mut nested = Vec::new();

        for (key, value) in map.into_iter() {
            if self.config.is_scalar_field(&key) {
                let value = match value {
                    Value::Object(_) | Value::Array(_) => {
                        let text = to_json_text(&value);
                        dispose(value);
                        Value::String(text)
                    }
                    scalar => scalar,
                };
                self.entities[entity].records[record].fields.insert(key, value);
                continue;
            }

            match value {
                Value::Object(_) | Value::Array(_) => nested.push(Frame::Field {
                    parent: entity,
                    parent_temp_id,
                    key,
                    value,
                }),
                scalar => {
                    self.entities[entity].records[record].fields.insert(key, scalar);
                }
            }
        }

        // Reversed so fields are extracted in document order
        self.stack.extend(nested.into_iter().rev());
        Ok(())
    }

    fn extract_field(
        &mut self,
        parent: usize,
        parent_temp_id: TempId,
        key: String,
        value: Value,
    ) -> Result<()> {
        let parent_name = self.entities[parent].name.clone();

        match value {
            Value::Object(map) => {
                let child_name = self.config.nested_name(&parent_name, &key);
                let child = self.init_entity(&child_name);
                let rel = self.init_relationship(&parent_name, &child_name);
                let (record, temp_id) = self.new_record(child);
                self.relationships[rel].links.push((parent_temp_id, temp_id));
                self.stack.push(Frame::Object {
                    entity: child,
                    record,
                    map,
                });
            }
            Value::Array(items) => {
                let child_name = self.config.array_name(&parent_name, &key);
                let child = self.init_entity(&child_name);
                let rel = self.init_relationship(&parent_name, &child_name);
                for value in items.into_iter().rev() {
                    self.stack.push(Frame::Item {
                        entity: child,
                        link: Some((rel, parent_temp_id)),
                        value,
                    });
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn extract_item(&mut self, entity: usize, link: Option<(usize, TempId)>, value: Value) -> Result<()> {
        match value {
            Value::Array(items) => {
                dispose(Value::Array(items));
                let name = &self.entities[entity].name;
                if self.config.strict {
                    return Err(ConvertError::UnsupportedValue {
                        entity: name.clone(),
                        reason: "array nested directly inside an array".to_string(),
                    });
                }
                log::debug!("Skipping nested array inside entity '{}'", name);
            }
            Value::Object(map) => {
                let (record, temp_id) = self.new_record(entity);
                if let Some((rel, parent_temp_id)) = link {
                    self.relationships[rel].links.push((parent_temp_id, temp_id));
                }
                self.stack.push(Frame::Object { entity, record, map });
            }
            scalar => {
                let (record, temp_id) = self.new_record(entity);
                let field = self.config.value_field.clone();
                self.entities[entity].records[record].fields.insert(field, scalar);
                if let Some((rel, parent_temp_id)) = link {
                    self.relationships[rel].links.push((parent_temp_id, temp_id));
                }
            }
        }

        Ok(())
    }

    /// Index of the named entity, creating it on first sight
    fn init_entity(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.entity_index.get(name) {
            return idx;
        }

        log::debug!("Discovered entity '{}'", name);
        let idx = self.entities.len();
        self.entities.push(Entity::new(name));
        self.next_temp_id.push(1);
        self.entity_index.insert(name.to_string(), idx);
        idx
    }

    /// Index of the relationship, creating it and recording the parent on first sight
    fn init_relationship(&mut self, parent: &str, child: &str) -> usize {
        let name = Relationship::name_for(parent, child);
        if let Some(&idx) = self.relationship_index.get(&name) {
            return idx;
        }

        if let Some(previous) = self.hierarchy.insert(child.to_string(), parent.to_string()) {
            if previous != parent {
                log::debug!(
                    "Entity '{}' reused under '{}', was under '{}'",
                    child,
                    parent,
                    previous
                );
            }
        }

        let idx = self.relationships.len();
        self.relationships.push(Relationship::new(parent, child));
        self.relationship_index.insert(name, idx);
        idx
    }

    /// Append an empty record with the entity's next temp id
    fn new_record(&mut self, entity: usize) -> (usize, TempId) {
        let temp_id = self.next_temp_id[entity];
        self.next_temp_id[entity] += 1;

        let records = &mut self.entities[entity].records;
        records.push(Record::new(temp_id));
        (records.len() - 1, temp_id)
    }
}

impl Drop for AnalyzerRun<'_> {
    // frames left behind by an error still own whole subtrees
    fn drop(&mut self) {
        for frame in self.stack.drain(..) {
            dispose(frame.into_value());
        }
    }
}
