use std::future::Future;

use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::debug;

/// Write lock on the caller's session. Releasing it lets other requests from
/// the same session proceed while a long export streams.
pub trait SessionLock {
    /// Releases the lock. Calling it again is a no-op.
    fn write_close(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Used when the caller holds no session.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSession;

impl SessionLock for DetachedSession {
    async fn write_close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Session lock backed by a Postgres advisory lock held on a dedicated
/// connection.
pub struct PgSessionLock {
    session_id: i64,
    conn: Option<PoolConnection<Postgres>>,
}

impl PgSessionLock {
    pub async fn acquire(pool: &PgPool, session_id: i64) -> anyhow::Result<Self> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to acquire a connection for the session lock")?;
        // Advisory locks belong to the backend session, so never hand this
        // connection back to the pool still holding one.
        conn.close_on_drop();

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(session_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to lock session {session_id}"))?;
        debug!(session_id, "session lock acquired");

        Ok(Self {
            session_id,
            conn: Some(conn),
        })
    }
}

impl SessionLock for PgSessionLock {
    async fn write_close(&mut self) -> anyhow::Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.session_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to unlock session {}", self.session_id))?;
        debug!(session_id = self.session_id, "session lock released");
        Ok(())
    }
}
