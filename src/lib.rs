//! enclave-db - queue-ordered async SQLite handles with snapshot persistence.
//!
//! ```no_run
//! use enclave_db::{Database, OpenFlags, Params};
//!
//! # async fn demo() -> enclave_db::Result<()> {
//! let db = Database::open(
//!     "data/enclave.db",
//!     OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
//! )
//! .await?;
//!
//! // Queued in order; the SELECT sees the INSERT without awaiting it first
//! let insert = db.run("INSERT INTO settings (key, value) VALUES (?, ?)", ["fan", "auto"]);
//! let rows = db.all("SELECT * FROM settings", ());
//! insert.await?;
//! println!("{} settings", rows.await?.len());
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod runtime;
pub mod sqlite;

pub use config::{DatabaseConfig, Location, OpenFlags};
pub use error::{DatabaseError, Result};
pub use runtime::EngineRuntime;
pub use sqlite::{
    Database, HandleState, OperationQueue, Param, Params, Pending, Row, RunResult, Statement,
    Value,
};
