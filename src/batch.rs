//! Batch coordination.
//!
//! ```text
//! Idle ──> Loading(0) ──> Executing(0) ──> Loading(1) ──> ... ──> Idle
//!              │               │
//!              └───────┬───────┘
//!                      v
//!                   Aborted
//! ```
//!
//! Every batch gets its own staging relation, loaded in one COPY pass and
//! consumed by the planner's statements. All batches of a call share one
//! transaction: the engine opens it when the connection is not already in
//! one, and otherwise leaves commit and rollback to the caller.

use std::fmt;

use tracing::{debug, trace, warn};

use crate::conn::{Connection, OwnedTransaction};
use crate::error::{BulkError, EngineError, EngineExecutionError, Stage};
use crate::identity::IdentityReconciler;
use crate::options::BulkOptions;
use crate::plan::{OperationKind, Planner, StepKind};
use crate::schema::ResolvedShape;
use crate::source::RowCursor;
use crate::staging::StagingTable;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Loading(usize),
    Executing(usize),
    Aborted,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Idle => f.write_str("idle"),
            BatchState::Loading(i) => write!(f, "loading({i})"),
            BatchState::Executing(i) => write!(f, "executing({i})"),
            BatchState::Aborted => f.write_str("aborted"),
        }
    }
}

/// Error context for statements issued on behalf of a batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext {
    pub operation: OperationKind,
    pub batch: Option<usize>,
}

impl BatchContext {
    pub fn new(operation: OperationKind, batch: Option<usize>) -> Self {
        Self { operation, batch }
    }

    /// Wraps an engine error with the operation, stage and batch.
    pub fn fail(&self, stage: Stage, statement: &str, source: EngineError) -> BulkError {
        EngineExecutionError::new(self.operation, stage, self.batch, statement, source).into()
    }
}

/// Totals of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches: usize,
    pub rows: u64,
    pub affected: u64,
}

/// Drives the batches of one call.
///
/// The connection is passed to [`run`](Self::run) rather than held, so the
/// same coordinator drives either the caller's connection or a transaction
/// opened on it.
pub struct BatchCoordinator<'c> {
    shape: &'c ResolvedShape,
    planner: &'c Planner,
    options: &'c BulkOptions,
    state: BatchState,
}

impl<'c> BatchCoordinator<'c> {
    pub fn new(shape: &'c ResolvedShape, planner: &'c Planner, options: &'c BulkOptions) -> Self {
        Self {
            shape,
            planner,
            options,
            state: BatchState::Idle,
        }
    }

    /// Runs every batch until `cursor` is exhausted.
    ///
    /// Without a caller transaction the batches run inside one opened here,
    /// committed at the end and rolled back on failure. If the returned future
    /// is dropped before it completes, dropping that transaction rolls it back.
    pub async fn run<C: Connection>(
        &mut self,
        conn: &mut C,
        cursor: &mut RowCursor<'_>,
    ) -> Result<BatchSummary, BulkError> {
        if conn.in_transaction() {
            trace!("reusing caller transaction");
            let result = self.run_batches(conn, cursor, false).await;
            return self.settle(result);
        }

        let ctx = BatchContext::new(self.planner.operation(), None);
        trace!("opening transaction");
        let mut tx = conn
            .transaction()
            .await
            .map_err(|e| ctx.fail(Stage::Begin, "BEGIN", e))?;
        match self.run_batches(&mut tx, cursor, true).await {
            Ok(summary) => {
                trace!("committing transaction");
                tx.commit()
                    .await
                    .map_err(|e| ctx.fail(Stage::Commit, "COMMIT", e))?;
                self.settle(Ok(summary))
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "rollback after failed batch also failed");
                }
                self.settle(Err(err))
            }
        }
    }

    fn settle(
        &mut self,
        result: Result<BatchSummary, BulkError>,
    ) -> Result<BatchSummary, BulkError> {
        let next = match &result {
            Ok(_) => BatchState::Idle,
            Err(_) => BatchState::Aborted,
        };
        self.transition(next);
        result
    }

    async fn run_batches<C: Connection>(
        &mut self,
        conn: &mut C,
        cursor: &mut RowCursor<'_>,
        owns_transaction: bool,
    ) -> Result<BatchSummary, BulkError> {
        let limit = self.options.rows_per_batch();
        let mut summary = BatchSummary::default();
        while cursor.has_next().await {
            let batch = summary.batches;
            let ctx = BatchContext::new(self.planner.operation(), Some(batch));
            let batch_start = cursor.position();

            self.transition(BatchState::Loading(batch));
            let staging = StagingTable::open(
                conn,
                self.shape,
                self.options.staging,
                self.planner,
                &ctx,
            )
            .await?;
            let loaded = match staging
                .load(
                    conn,
                    cursor,
                    self.shape,
                    limit,
                    self.options.flush_threshold(),
                    &ctx,
                )
                .await
            {
                Ok(loaded) => loaded,
                Err(err) => return Err(abandon(conn, staging, owns_transaction, err).await),
            };

            self.transition(BatchState::Executing(batch));
            let affected = match self
                .execute(conn, &staging, cursor, batch_start, loaded, &ctx)
                .await
            {
                Ok(affected) => affected,
                Err(err) => return Err(abandon(conn, staging, owns_transaction, err).await),
            };
            staging.close(conn, &ctx).await?;

            debug!(batch, rows = loaded, affected, "batch applied");
            summary.batches += 1;
            summary.rows += loaded as u64;
            summary.affected += affected;
        }
        Ok(summary)
    }

    async fn execute<C: Connection>(
        &self,
        conn: &mut C,
        staging: &StagingTable,
        cursor: &mut RowCursor<'_>,
        batch_start: u64,
        loaded: usize,
        ctx: &BatchContext,
    ) -> Result<u64, BulkError> {
        let shape: &'c ResolvedShape = self.shape;
        let plan = self.planner.plan(&staging.name().qualified());
        let mut reconciler = shape
            .identity
            .as_ref()
            .filter(|_| self.planner.with_ordinal())
            .map(|target| IdentityReconciler::new(target, batch_start, loaded as u64));

        let mut affected = 0;
        for step in &plan.steps {
            trace!(sql = %step.sql, kind = ?step.kind, "executing step");
            let fail = |e| ctx.fail(Stage::Execute, &step.sql, e);
            if !step.kind.is_query() {
                affected += conn.execute(&step.sql).await.map_err(fail)?;
                continue;
            }
            let rows = conn.query(&step.sql).await.map_err(fail)?;
            affected += match reconciler.as_mut() {
                Some(reconciler) => reconciler.apply(step.kind, &rows, cursor),
                None if step.kind == StepKind::MatchedIdentities => 0,
                None => rows.len() as u64,
            };
        }
        if let Some(reconciler) = reconciler {
            reconciler.finish();
        }
        Ok(affected)
    }

    fn transition(&mut self, next: BatchState) {
        trace!(from = %self.state, to = %next, "batch state");
        self.state = next;
    }
}

/// Cleans up after a failed batch and hands back its error.
///
/// Inside an engine-owned transaction the rollback discards the staging
/// relation; otherwise it is dropped explicitly.
async fn abandon<C: Connection>(
    conn: &mut C,
    staging: StagingTable,
    owns_transaction: bool,
    err: BulkError,
) -> BulkError {
    if !owns_transaction {
        staging.discard(conn).await;
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(BatchState::Loading(2).to_string(), "loading(2)");
        assert_eq!(BatchState::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_context_wraps_engine_error() {
        let ctx = BatchContext::new(OperationKind::Delete, Some(0));
        let err = ctx.fail(
            Stage::Load,
            "COPY x FROM STDIN",
            EngineError::new("broken pipe").with_code("08006"),
        );
        assert_eq!(err.sql_state(), Some("08006"));
        assert_eq!(
            err.to_string(),
            "delete failed during binary load of batch 0: broken pipe (SQLSTATE 08006)"
        );
    }
}
