//! Process-wide engine runtime.
//!
//! The linked SQLite library is checked once per process; every handle opens
//! its engine instance through the cached [`EngineRuntime`].

use once_cell::sync::OnceCell;
use tokio_rusqlite::Connection;

use crate::error::{DatabaseError, Result};

/// Oldest SQLite release the adapter accepts (3.35.0, for RETURNING).
const MIN_VERSION_NUMBER: i32 = 3_035_000;

static RUNTIME: OnceCell<std::result::Result<EngineRuntime, String>> = OnceCell::new();

/// Loaded engine runtime.
#[derive(Debug)]
pub struct EngineRuntime {
    version: &'static str,
    version_number: i32,
}

impl EngineRuntime {
    /// Get the process-wide runtime, loading it on first use.
    ///
    /// A load failure is cached too, so every later open reports the same error.
    pub fn get() -> Result<&'static EngineRuntime> {
        RUNTIME
            .get_or_init(Self::load)
            .as_ref()
            .map_err(|e| DatabaseError::Runtime(e.clone()))
    }

    fn load() -> std::result::Result<Self, String> {
        let version_number = rusqlite::version_number();
        let version = rusqlite::version();
        if version_number < MIN_VERSION_NUMBER {
            return Err(format!(
                "SQLite {} is older than the required 3.35.0",
                version
            ));
        }
        tracing::debug!(version, "engine runtime loaded");
        Ok(Self {
            version,
            version_number,
        })
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn version_number(&self) -> i32 {
        self.version_number
    }

    /// Create a fresh, empty engine instance.
    pub async fn open_engine(&self, statement_cache_capacity: usize) -> Result<Connection> {
        let conn = Connection::open_in_memory().await?;
        conn.call(move |c| {
            c.set_prepared_statement_cache_capacity(statement_cache_capacity);
            Ok(())
        })
        .await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_is_shared() {
        let a = EngineRuntime::get().unwrap();
        let b = EngineRuntime::get().unwrap();
        assert!(std::ptr::eq(a, b));
        assert!(a.version_number() >= MIN_VERSION_NUMBER);
        assert!(a.version().starts_with('3'));
    }

    #[tokio::test]
    async fn test_open_engine() {
        let runtime = EngineRuntime::get().unwrap();
        let conn = runtime.open_engine(8).await.unwrap();
        let one: i64 = conn
            .call(|c| Ok(c.query_row("SELECT 1", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
