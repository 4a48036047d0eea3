//! SQLite compatibility adapter.
//!
//! Exposes an asynchronous database/statement API on top of an in-memory
//! rusqlite engine. Each [`Database`] serializes all of its work through an
//! [`OperationQueue`], and persists the engine as a snapshot file on close.

pub mod database;
pub mod engine;
pub mod params;
pub mod pending;
pub mod queue;
pub mod statement;
pub mod types;


pub use database::{Database, HandleState};
pub use engine::RunResult;
pub use params::{marshal, Binding, Param, Params};
pub use pending::Pending;
pub use queue::OperationQueue;
pub use statement::Statement;
pub use types::{Columns, Row, Value};
