//! Transaction guard over a leased connection.

use std::ops::{Deref, DerefMut};

use crate::connection::{BackendConnection, NativeError};

/// An open transaction on a borrowed connection.
///
/// - [`commit`](Self::commit) makes the work durable
/// - [`rollback`](Self::rollback) discards it
/// - dropping the guard unfinished queues a rollback on the connection
///
/// ```ignore
/// let mut tx = Transaction::begin(conn).await?;
/// tx.execute(&insert).await?;
/// tx.commit().await?;
/// ```
pub struct Transaction<'c> {
    conn: &'c mut dyn BackendConnection,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub async fn begin(conn: &'c mut dyn BackendConnection) -> Result<Self, NativeError> {
        conn.begin().await?;
        Ok(Transaction {
            conn,
            finished: false,
        })
    }

    pub async fn commit(mut self) -> Result<(), NativeError> {
        self.finished = true;
        self.conn.commit().await
    }

    pub async fn rollback(mut self) -> Result<(), NativeError> {
        self.finished = true;
        self.conn.rollback().await
    }

    /// Commit if `success`, roll back otherwise.
    pub async fn finish(self, success: bool) -> Result<(), NativeError> {
        if success {
            self.commit().await
        } else {
            self.rollback().await
        }
    }

    pub fn connection(&mut self) -> &mut dyn BackendConnection {
        &mut *self.conn
    }
}

impl<'c> Deref for Transaction<'c> {
    type Target = dyn BackendConnection + 'c;

    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

impl<'c> DerefMut for Transaction<'c> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Transaction dropped unfinished, rolling back");
            self.conn.start_rollback();
        }
    }
}
