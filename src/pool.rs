//! Fixed-size pool of read-only SQLite connections.
//!
//! Every connection has the spatial SQL functions registered and the
//! configured schemas attached. A semaphore bounds the number of connections
//! in use; idle connections are kept for reuse.

use crate::error::{Error, Result};
use crate::gpkg::shared_memory_uri;
use crate::ident::quote_identifier;
use crate::sql_functions::register_spatial_functions;
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database served as the default (`main`) schema.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSource {
    /// A GeoPackage file, opened read-only.
    File(PathBuf),
    /// A named shared in-memory database (see [`crate::gpkg::Gpkg::new_shared_memory`]).
    SharedMemory(String),
}

#[derive(Debug)]
struct PoolInner {
    source: DataSource,
    /// `(schema, file or URI)` pairs attached to every connection.
    attach: Vec<(String, String)>,
    idle: Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    size: usize,
}

#[derive(Clone, Debug)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new<I>(source: DataSource, attach: I, size: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if size == 0 {
            return Err(Error::Config("pool size must be positive".to_string()));
        }
        let attach: Vec<(String, String)> = attach.into_iter().collect();
        for (schema, _) in &attach {
            quote_identifier(schema)?;
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                source,
                attach,
                idle: Mutex::new(Vec::with_capacity(size)),
                semaphore: Arc::new(Semaphore::new(size)),
                size,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Open one connection eagerly so configuration errors surface at startup.
    pub async fn check(&self) -> Result<()> {
        let conn = self.acquire().await?;
        tokio::task::spawn_blocking(move || {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok::<(), Error>(())
        })
        .await?
    }

    /// Wait for a free slot and hand out a connection.
    ///
    /// Opening a new connection blocks briefly; it only happens until the
    /// pool has filled up.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("connection pool closed".to_string()))?;

        let idle = self.inner.idle.lock().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let inner = Arc::clone(&self.inner);
                tokio::task::spawn_blocking(move || inner.open()).await??
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

impl PoolInner {
    fn open(&self) -> Result<Connection> {
        let conn = match &self.source {
            DataSource::File(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
            DataSource::SharedMemory(name) => {
                let conn = Connection::open_with_flags(
                    shared_memory_uri(name),
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.execute_batch("PRAGMA query_only = ON")?;
                conn
            }
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        register_spatial_functions(&conn)?;

        for (schema, location) in &self.attach {
            let sql = format!("ATTACH DATABASE ?1 AS {}", quote_identifier(schema)?);
            conn.execute(&sql, [location])?;
        }
        tracing::debug!(source = ?self.source, attached = self.attach.len(), "opened connection");
        Ok(conn)
    }
}

/// A connection checked out of the pool; returned on drop.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.deref().get_interrupt_handle()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // an interrupted connection is still usable once its statement is gone
            if conn.is_autocommit() {
                self.pool.idle.lock().push(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionPool, DataSource};
    use crate::Result;
    use crate::gpkg::{Gpkg, LayerSpec, shared_memory_uri};
    use crate::types::GeometryType;

    #[tokio::test]
    async fn reuses_connections_up_to_its_size() -> Result<()> {
        let _db = Gpkg::new_shared_memory("pool_reuse_test")?;
        let pool = ConnectionPool::new(
            DataSource::SharedMemory("pool_reuse_test".to_string()),
            Vec::new(),
            1,
        )?;
        pool.check().await?;

        let conn = pool.acquire().await?;
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), pool.acquire());
        assert!(waiting.await.is_err(), "second checkout must wait");
        drop(conn);

        let conn = pool.acquire().await?;
        let srid: i64 = conn.query_row(
            "SELECT ST_SRID(ST_MakeEnvelope(0, 0, 1, 1, 4326))",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(srid, 4326);
        Ok(())
    }

    #[tokio::test]
    async fn attaches_schemas_and_stays_read_only() -> Result<()> {
        let _main = Gpkg::new_shared_memory("pool_attach_main")?;
        let other = Gpkg::new_shared_memory("pool_attach_other")?;
        other.new_layer(&LayerSpec::new("stops", GeometryType::Point, 4326))?;

        let pool = ConnectionPool::new(
            DataSource::SharedMemory("pool_attach_main".to_string()),
            vec![("transit".to_string(), shared_memory_uri("pool_attach_other"))],
            2,
        )?;
        let conn = pool.acquire().await?;
        let count: i64 =
            conn.query_row("SELECT count(*) FROM \"transit\".\"stops\"", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        assert!(conn.execute("DELETE FROM transit.stops", []).is_err());
        Ok(())
    }

    #[test]
    fn rejects_odd_schema_names() {
        let pool = ConnectionPool::new(
            DataSource::File("unused.gpkg".into()),
            vec![("bad name".to_string(), "x.gpkg".to_string())],
            1,
        );
        assert!(pool.is_err());
    }
}
