use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::Mutex;

/// Opens the configured database once and hands out connections to that same instance.
///
/// Every pooled connection is a `try_clone` of one base connection, so an in-memory
/// database is shared by the whole pool and a database file is only locked once.
pub struct DuckDBConnectionManager {
    connection_string: String,
    base: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Result<Self, duckdb::Error> {
        let base = if is_in_memory(&connection_string) {
            Connection::open_in_memory()?
        } else {
            Connection::open(&connection_string)?
        };
        Ok(Self {
            connection_string,
            base: Mutex::new(base),
        })
    }

    pub fn is_in_memory(&self) -> bool {
        is_in_memory(&self.connection_string)
    }
}

fn is_in_memory(connection_string: &str) -> bool {
    connection_string.is_empty() || connection_string == ":memory:"
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        // a panic while cloning leaves the base connection itself intact
        let base = self.base.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        base.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
