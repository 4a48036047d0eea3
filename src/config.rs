//! Handle configuration.

use std::fmt;
use std::path::{Path, PathBuf};

pub use rusqlite::OpenFlags;

/// Where a logical database keeps its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Never persisted; state is lost on close.
    Volatile,
    /// Snapshot file on disk.
    File(PathBuf),
}

impl Location {
    /// Parse a location string.
    ///
    /// Supports:
    /// - `:memory:` (or an empty string) for a volatile database
    /// - `sqlite://path` / `sqlite:path` URLs
    /// - Plain file paths
    pub fn parse(raw: &str) -> Self {
        let path = raw
            .strip_prefix("sqlite://")
            .or_else(|| raw.strip_prefix("sqlite:"))
            .unwrap_or(raw);

        if path.is_empty() || path == ":memory:" {
            Location::Volatile
        } else {
            Location::File(PathBuf::from(path))
        }
    }

    pub fn is_volatile(&self) -> bool {
        matches!(self, Location::Volatile)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Location::Volatile => None,
            Location::File(p) => Some(p),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Volatile => f.write_str(":memory:"),
            Location::File(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<&str> for Location {
    fn from(raw: &str) -> Self {
        Location::parse(raw)
    }
}

impl From<String> for Location {
    fn from(raw: String) -> Self {
        Location::parse(&raw)
    }
}

impl From<PathBuf> for Location {
    fn from(path: PathBuf) -> Self {
        Location::File(path)
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Location::File(path.to_path_buf())
    }
}

/// Database handle configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Snapshot location (or volatile)
    pub location: Location,
    /// Read-only / read-write / create-if-missing
    pub flags: OpenFlags,
    /// Capacity of the engine's prepared statement cache
    pub statement_cache_capacity: usize,
    /// Queue depth at which a warning is logged
    pub queue_warn_depth: usize,
}

impl DatabaseConfig {
    pub fn new(location: impl Into<Location>) -> Self {
        Self {
            location: location.into(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            statement_cache_capacity: 32,
            queue_warn_depth: 1024,
        }
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn read_only(self) -> Self {
        self.flags(OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn queue_warn_depth(mut self, depth: usize) -> Self {
        self.queue_warn_depth = depth.max(1);
        self
    }

    /// Read-only wins over read-write when both are set.
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY)
            || !self.flags.contains(OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    pub fn may_create(&self) -> bool {
        !self.is_read_only() && self.flags.contains(OpenFlags::SQLITE_OPEN_CREATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        assert_eq!(Location::parse(":memory:"), Location::Volatile);
        assert_eq!(Location::parse(""), Location::Volatile);
        assert_eq!(Location::parse("sqlite://:memory:"), Location::Volatile);
    }

    #[test]
    fn test_parse_file() {
        assert_eq!(
            Location::parse("sqlite://data/app.db"),
            Location::File(PathBuf::from("data/app.db"))
        );
        assert_eq!(
            Location::parse("/var/lib/enclave.db"),
            Location::File(PathBuf::from("/var/lib/enclave.db"))
        );
    }

    #[test]
    fn test_default_flags_create() {
        let config = DatabaseConfig::new(":memory:");
        assert!(!config.is_read_only());
        assert!(config.may_create());
    }

    #[test]
    fn test_read_only_flags() {
        let config = DatabaseConfig::new("x.db").read_only();
        assert!(config.is_read_only());
        assert!(!config.may_create());

        let config = DatabaseConfig::new("x.db").flags(OpenFlags::SQLITE_OPEN_READ_WRITE);
        assert!(!config.is_read_only());
        assert!(!config.may_create());
    }
}
