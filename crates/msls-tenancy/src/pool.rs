use std::time::Duration;

use deadpool::managed::{self, Metrics, RecycleError, RecycleResult};

use crate::error::{Error, Result};
use crate::storage::{Connection, Engine};

pub type Pool = managed::Pool<ConnectionManager>;
pub type PooledConnection = managed::Object<ConnectionManager>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            wait_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    engine: Engine,
}

impl ConnectionManager {
    pub const fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

impl managed::Manager for ConnectionManager {
    type Type = Connection;
    type Error = Error;

    async fn create(&self) -> Result<Connection> {
        self.engine.connect()
    }

    async fn recycle(&self, conn: &mut Connection, _: &Metrics) -> RecycleResult<Error> {
        if !self.engine.is_available() {
            return Err(RecycleError::Backend(Error::StorageUnavailable));
        }
        // A session guard always clears its binding; this only catches leaks.
        if conn.binding().is_bound() {
            tracing::warn!(
                connection_id = conn.id(),
                "Pooled connection returned with a live binding, resetting"
            );
            conn.reset();
        }
        Ok(())
    }
}

pub fn create_pool(engine: Engine, config: PoolConfig) -> Result<Pool> {
    Pool::builder(ConnectionManager::new(engine))
        .max_size(config.max_size)
        .wait_timeout(Some(config.wait_timeout))
        .create_timeout(Some(Duration::from_secs(5)))
        .recycle_timeout(Some(Duration::from_secs(5)))
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Config(format!("failed to create connection pool: {e}")))
}
