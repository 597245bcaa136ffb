//! Connection collaborator interface.
//!
//! The bulk engine never opens, pools or configures connections. It is handed
//! something that implements [`Connection`] and drives it explicitly through
//! every stage, which keeps the whole pipeline testable with a scripted fake.
//!
//! # Design Decisions
//!
//! 1. **Async trait**: methods return `impl Future + Send`, so implementations can
//!    be written with plain `async fn` while generic callers stay `Send`.
//!
//! 2. **Text results**: [`query`](Connection::query) returns text-format cells.
//!    The engine only reads back catalog rows and generated identities, both of
//!    which parse cheaply from text.
//!
//! 3. **Explicit transactions**: [`in_transaction`](Connection::in_transaction)
//!    tells the engine whether the caller already owns a transaction; if not,
//!    the engine opens one with [`transaction`](Connection::transaction). The
//!    returned [`OwnedTransaction`] rolls back when dropped unfinished, so a
//!    cancelled call leaves nothing behind on the connection.

use std::future::Future;

use bytes::Bytes;

use crate::error::EngineError;

#[cfg(feature = "postgres")]
pub mod postgres;

/// A text-format result row; `None` is SQL NULL.
pub type TextRow = Vec<Option<String>>;

/// A database connection (or transaction) the engine can drive.
pub trait Connection: Send {
    /// The binary load channel returned by [`copy_in`](Connection::copy_in).
    type CopyIn: CopyIn;

    /// Transaction type opened by [`transaction`](Connection::transaction).
    type Transaction<'t>: OwnedTransaction + 't
    where
        Self: 't;

    /// Executes a statement and returns the number of rows it affected.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// Executes a statement and returns its result rows in text format.
    fn query(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<Vec<TextRow>, EngineError>> + Send;

    /// Starts a `COPY ... FROM STDIN` and returns the channel to stream it.
    fn copy_in(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<Self::CopyIn, EngineError>> + Send;

    /// Returns true when the caller already owns an open transaction.
    ///
    /// The engine then reuses it and leaves commit/rollback to the caller.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Opens a transaction (or a savepoint, when already inside one).
    fn transaction(
        &mut self,
    ) -> impl Future<Output = Result<Self::Transaction<'_>, EngineError>> + Send;
}

/// A transaction opened by the engine.
///
/// Dropping it without calling [`commit`](OwnedTransaction::commit) or
/// [`rollback`](OwnedTransaction::rollback) must roll it back.
pub trait OwnedTransaction: Connection {
    fn commit(self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// An open binary load channel.
///
/// Dropping it without calling [`finish`](CopyIn::finish) must abort the copy.
pub trait CopyIn: Send {
    /// Sends one chunk of COPY data.
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Completes the copy and returns the number of rows the engine accepted.
    fn finish(self) -> impl Future<Output = Result<u64, EngineError>> + Send;
}
