//! MySQL driver binding over sqlx (feature `mysql`).
//!
//! [`MySqlSource`] adapts a [`sqlx::MySqlPool`] to the coordinator's driver
//! traits. Transaction control is issued as plain statements, which is what
//! the MySQL protocol uses for them anyway; savepoint names are generated by
//! the coordinator and are always plain identifiers.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, MySqlPool};

use crate::driver::{Connection, ConnectionSource, IsolationLevel, Savepoint, SourceHandle};
use crate::error::DriverError;

/// A connection source backed by a sqlx MySQL pool.
#[derive(Clone)]
pub struct MySqlSource {
    pool: MySqlPool,
}

impl MySqlSource {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Wrap the pool and hand back the [`SourceHandle`] the coordinator
    /// works with.
    pub fn handle(pool: MySqlPool) -> SourceHandle {
        SourceHandle::new(Self::new(pool))
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionSource for MySqlSource {
    async fn connection(&self) -> Result<Box<dyn Connection>, DriverError> {
        let conn = self.pool.acquire().await.map_err(to_driver_error)?;
        Ok(Box::new(MySqlPooledConnection { conn: Some(conn) }))
    }
}

struct MySqlPooledConnection {
    conn: Option<PoolConnection<MySql>>,
}

impl MySqlPooledConnection {
    fn conn(&mut self) -> Result<&mut PoolConnection<MySql>, DriverError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::new("connection already returned to pool"))
    }

    async fn run(&mut self, sql: &str) -> Result<u64, DriverError> {
        let conn = self.conn()?;
        let result = (&mut **conn).execute(sql).await.map_err(to_driver_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Connection for MySqlPooledConnection {
    async fn auto_commit(&mut self) -> Result<bool, DriverError> {
        let conn = self.conn()?;
        let value: i64 = sqlx::query_scalar("SELECT @@autocommit")
            .fetch_one(&mut **conn)
            .await
            .map_err(to_driver_error)?;
        Ok(value != 0)
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError> {
        let sql = if auto_commit {
            "SET autocommit = 1"
        } else {
            "SET autocommit = 0"
        };
        self.run(sql).await.map(|_| ())
    }

    async fn transaction_isolation(&mut self) -> Result<IsolationLevel, DriverError> {
        let conn = self.conn()?;
        let value: String = sqlx::query_scalar("SELECT @@transaction_isolation")
            .fetch_one(&mut **conn)
            .await
            .map_err(to_driver_error)?;
        match value.as_str() {
            "READ-UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ-COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE-READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            other => Err(DriverError::new(format!(
                "unrecognized isolation level reported by server: {other}"
            ))),
        }
    }

    async fn set_transaction_isolation(
        &mut self,
        level: IsolationLevel,
    ) -> Result<(), DriverError> {
        let sql = format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.as_sql());
        self.run(&sql).await.map(|_| ())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), DriverError> {
        let sql = if read_only {
            "SET SESSION TRANSACTION READ ONLY"
        } else {
            "SET SESSION TRANSACTION READ WRITE"
        };
        self.run(sql).await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.run("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.run("ROLLBACK").await.map(|_| ())
    }

    async fn supports_savepoints(&mut self) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<Savepoint, DriverError> {
        self.run(&format!("SAVEPOINT {name}")).await?;
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError> {
        self.run(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name()))
            .await
            .map(|_| ())
    }

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError> {
        self.run(&format!("RELEASE SAVEPOINT {}", savepoint.name()))
            .await
            .map(|_| ())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.run(sql).await
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        // Dropping the pool connection returns it to the pool.
        self.conn.take();
        Ok(())
    }
}

fn to_driver_error(err: sqlx::Error) -> DriverError {
    let sqlstate = match &err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.to_string()),
        _ => None,
    };
    DriverError::with_source(err.to_string(), sqlstate, err)
}
