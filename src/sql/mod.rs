//! Persisting normalized tables into SQL Server
//!
//! Statements are built as [`Statement`] values and handed to a
//! [`StoreDriver`]: a live connection, the in-memory [`MemoryStore`], or the
//! [`ScriptRecorder`] that renders a T-SQL script.

pub mod types;
pub mod statement;
pub mod plan;
pub mod order;
pub mod driver;
pub mod memory;
pub mod script;
pub mod persister;

pub use driver::StoreDriver;
pub use memory::MemoryStore;
pub use order::persistence_order;
pub use persister::{IdMaps, PersistConfig, SchemaAdjustment, SchemaPersister};
pub use plan::{JunctionPlan, SchemaPlan, TablePlan, Typing};
pub use script::{Script, ScriptRecorder};
pub use statement::{unique_identifier, QualifiedName, Statement};
pub use types::{SqlType, Width};
