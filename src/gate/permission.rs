//! Permission gate consulted before events are emitted
//!
//! The gate is a boolean predicate over an account address. The SQLite
//! implementation reads the `monitor_address` table and caches each verdict
//! for a short TTL so a hot address does not hit the database on every leg.
//!
//! Usage:
//! ```rust,ignore
//! let gate = SqlitePermissionGate::new("/var/lib/solrecon/monitor.db")?;
//! if gate.is_permitted("wallet_address") {
//!     // keep the leg
//! }
//! ```

use rusqlite::{Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait PermissionGate: Send + Sync {
    fn is_permitted(&self, address: &str) -> bool;
}

impl<F> PermissionGate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_permitted(&self, address: &str) -> bool {
        self(address)
    }
}

/// Accepts every address (no monitor list configured)
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn is_permitted(&self, _address: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticAllowList {
    addresses: HashSet<String>,
}

impl StaticAllowList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

impl PermissionGate for StaticAllowList {
    fn is_permitted(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }
}

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum GateError {
    Database(String),
    MissingTable(&'static str),
}

impl From<rusqlite::Error> for GateError {
    fn from(err: rusqlite::Error) -> Self {
        GateError::Database(err.to_string())
    }
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::Database(e) => write!(f, "Database error: {}", e),
            GateError::MissingTable(table) => write!(f, "{} table not found in database", table),
        }
    }
}

impl std::error::Error for GateError {}

/// SQLite gate when a database path is configured, otherwise [`AllowAll`]
pub fn open_permission_gate(db_path: Option<&str>) -> Result<Arc<dyn PermissionGate>, GateError> {
    match db_path {
        Some(path) => {
            let gate = SqlitePermissionGate::new(path)?;
            log::info!("🔐 Permission gate: monitor_address in {}", path);
            Ok(Arc::new(gate))
        }
        None => {
            log::info!("🔓 Permission gate: allow all (PERMISSION_DB_PATH not set)");
            Ok(Arc::new(AllowAll))
        }
    }
}

/// Monitor-list gate backed by SQLite
///
/// Thread-safe connection wrapper; clones share the connection and the cache.
#[derive(Debug, Clone)]
pub struct SqlitePermissionGate {
    conn: Arc<Mutex<Connection>>,
    cache: Arc<Mutex<HashMap<String, (bool, Instant)>>>,
    ttl: Duration,
}

impl SqlitePermissionGate {
    pub fn new(db_path: &str) -> Result<Self, GateError> {
        let conn = Connection::open(db_path)?;

        let table_exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name='monitor_address'",
                [],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if !table_exists {
            return Err(GateError::MissingTable("monitor_address"));
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: Arc::new(Mutex::new(HashMap::new())),
            ttl: CACHE_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Query the table directly, bypassing the cache
    pub fn lookup(&self, address: &str) -> Result<bool, GateError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare_cached("SELECT 1 FROM monitor_address WHERE address = ?")?;
        Ok(stmt.exists(rusqlite::params![address])?)
    }
}

impl PermissionGate for SqlitePermissionGate {
    fn is_permitted(&self, address: &str) -> bool {
        if address.is_empty() {
            return false;
        }

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((permitted, at)) = cache.get(address) {
                if at.elapsed() < self.ttl {
                    return *permitted;
                }
            }
        }

        let permitted = match self.lookup(address) {
            Ok(permitted) => permitted,
            Err(e) => {
                log::warn!("⚠️  Permission lookup failed for {}: {}", address, e);
                return false;
            }
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(address.to_string(), (permitted, Instant::now()));
        permitted
    }
}
