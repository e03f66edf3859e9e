use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE: &str = "coffer.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for the SQLite-backed store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path
    pub database: PathBuf,
    /// Upper bound on pooled connections, i.e. on concurrently open units of work
    pub max_connections: u32,
    /// How long a unit of work waits for the write lock before giving up
    pub busy_timeout: Duration,
    /// Create the database file if it does not exist
    pub create_if_missing: bool,
}

impl StoreConfig {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            create_if_missing: false,
        }
    }
}
