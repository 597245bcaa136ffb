//! [`Connection`] for `tokio-postgres`.
//!
//! A bare [`Client`] lets the engine own the transaction: it is opened with
//! [`Client::transaction`], whose `Drop` rolls back if the call never
//! finishes. A [`Transaction`] is reused as-is and committed or rolled back by
//! whoever opened it.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::SinkExt;
use tokio_postgres::{Client, CopyInSink, SimpleQueryMessage, Transaction};

use super::{Connection, CopyIn, OwnedTransaction, TextRow};
use crate::error::EngineError;

/// Binary load channel backed by a `tokio-postgres` copy sink.
pub struct PgCopyIn(Pin<Box<CopyInSink<Bytes>>>);

impl CopyIn for PgCopyIn {
    async fn send(&mut self, chunk: Bytes) -> Result<(), EngineError> {
        self.0.send(chunk).await.map_err(engine_error)
    }

    async fn finish(mut self) -> Result<u64, EngineError> {
        self.0.as_mut().finish().await.map_err(engine_error)
    }
}

impl Connection for Client {
    type CopyIn = PgCopyIn;
    type Transaction<'t> = Transaction<'t>;

    async fn execute(&mut self, sql: &str) -> Result<u64, EngineError> {
        Client::execute(self, sql, &[]).await.map_err(engine_error)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<TextRow>, EngineError> {
        let messages = self.simple_query(sql).await.map_err(engine_error)?;
        Ok(text_rows(messages))
    }

    async fn copy_in(&mut self, sql: &str) -> Result<PgCopyIn, EngineError> {
        let sink = Client::copy_in(self, sql).await.map_err(engine_error)?;
        Ok(PgCopyIn(Box::pin(sink)))
    }

    async fn transaction(&mut self) -> Result<Transaction<'_>, EngineError> {
        Client::transaction(self).await.map_err(engine_error)
    }
}

impl Connection for Transaction<'_> {
    type CopyIn = PgCopyIn;
    type Transaction<'t>
        = Transaction<'t>
    where
        Self: 't;

    async fn execute(&mut self, sql: &str) -> Result<u64, EngineError> {
        Transaction::execute(self, sql, &[])
            .await
            .map_err(engine_error)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<TextRow>, EngineError> {
        let messages = self.simple_query(sql).await.map_err(engine_error)?;
        Ok(text_rows(messages))
    }

    async fn copy_in(&mut self, sql: &str) -> Result<PgCopyIn, EngineError> {
        let sink = Transaction::copy_in(self, sql)
            .await
            .map_err(engine_error)?;
        Ok(PgCopyIn(Box::pin(sink)))
    }

    fn in_transaction(&self) -> bool {
        true
    }

    async fn transaction(&mut self) -> Result<Transaction<'_>, EngineError> {
        Transaction::transaction(self).await.map_err(engine_error)
    }
}

impl OwnedTransaction for Transaction<'_> {
    async fn commit(self) -> Result<(), EngineError> {
        Transaction::commit(self).await.map_err(engine_error)
    }

    async fn rollback(self) -> Result<(), EngineError> {
        Transaction::rollback(self).await.map_err(engine_error)
    }
}

fn text_rows(messages: Vec<SimpleQueryMessage>) -> Vec<TextRow> {
    messages
        .into_iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

fn engine_error(err: tokio_postgres::Error) -> EngineError {
    let code = err.code().map(|state| state.code().to_string());
    let message = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    let mut engine = EngineError::from_source(err).with_message(message);
    if let Some(code) = code {
        engine = engine.with_code(code);
    }
    engine
}
