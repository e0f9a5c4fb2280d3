//! JSON melting - extract nested JSON into relational tables
//!
//! [`StructureAnalyzer`] walks a document and collects entities with
//! temporary ids; [`TableBuilder`] turns them into tables with dense ids and
//! junction tables for every parent/child relationship.

pub mod types;
pub mod extractor;
pub mod value;
pub mod tables;
pub mod writer;

pub use types::{Analysis, ArrayNaming, Entity, EntityHierarchy, MeltConfig, Record, Relationship, TempId};
pub use extractor::StructureAnalyzer;
pub use tables::{JunctionTable, Normalized, Table, TableBuilder};
pub use writer::{SingleWriter, TableWriter};
