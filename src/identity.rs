//! Writes generated identity values back into the caller's rows.

use std::collections::BTreeSet;

use tracing::debug;

use crate::conn::TextRow;
use crate::datum::{Type, Value};
use crate::plan::StepKind;
use crate::schema::IdentityTarget;
use crate::source::RowCursor;

/// Reconciles the identity rows returned for one batch.
///
/// Ordinals are batch-local; `batch_start` converts them to positions in the
/// row source. Rows that cannot be written (streams, typed rows without a
/// setter, unparsable values) are counted and logged, never reported as errors.
#[derive(Debug)]
pub struct IdentityReconciler<'t> {
    target: &'t IdentityTarget,
    batch_start: u64,
    batch_len: u64,
    /// Ordinals already present in the target before the batch was applied.
    matched: BTreeSet<u64>,
    assigned: u64,
    skipped: u64,
}

impl<'t> IdentityReconciler<'t> {
    pub fn new(target: &'t IdentityTarget, batch_start: u64, batch_len: u64) -> Self {
        Self {
            target,
            batch_start,
            batch_len,
            matched: BTreeSet::new(),
            assigned: 0,
            skipped: 0,
        }
    }

    /// Consumes the result rows of one step and returns how many of them
    /// count as affected rows.
    pub fn apply(&mut self, kind: StepKind, rows: &[TextRow], cursor: &mut RowCursor<'_>) -> u64 {
        match kind {
            StepKind::Count => 0,
            StepKind::MatchedIdentities => {
                for row in rows {
                    if let Some(ordinal) = self.ordinal(row) {
                        self.matched.insert(ordinal);
                        self.assign(ordinal, cell(row, 1), cursor);
                    }
                }
                0
            }
            StepKind::IdentitiesByOrdinal => {
                for row in rows {
                    match self.ordinal(row) {
                        Some(ordinal) => self.assign(ordinal, cell(row, 1), cursor),
                        None => self.skipped += 1,
                    }
                }
                rows.len() as u64
            }
            StepKind::IdentitiesInOrder => {
                let unmatched: Vec<u64> = (0..self.batch_len)
                    .filter(|o| !self.matched.contains(o))
                    .collect();
                if unmatched.len() != rows.len() {
                    debug!(
                        expected = unmatched.len(),
                        returned = rows.len(),
                        "identity count differs from unmatched rows"
                    );
                }
                for (ordinal, row) in unmatched.into_iter().zip(rows) {
                    self.assign(ordinal, cell(row, 0), cursor);
                }
                rows.len() as u64
            }
        }
    }

    /// Logs the outcome for the batch.
    pub fn finish(self) {
        if self.skipped > 0 {
            debug!(
                field = %self.target.field,
                assigned = self.assigned,
                skipped = self.skipped,
                "some identities could not be written back"
            );
        } else {
            debug!(field = %self.target.field, assigned = self.assigned, "identities written back");
        }
    }

    pub fn assigned(&self) -> u64 {
        self.assigned
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn ordinal(&self, row: &TextRow) -> Option<u64> {
        cell(row, 0)?
            .parse::<u64>()
            .ok()
            .filter(|o| *o < self.batch_len)
    }

    fn assign(&mut self, ordinal: u64, text: Option<&str>, cursor: &mut RowCursor<'_>) {
        let ty = self.target.ty.filter(|t| t.is_integer()).unwrap_or(Type::Int8);
        let written = text
            .and_then(|t| Value::from_text(ty, t))
            .is_some_and(|value| {
                cursor.assign(self.batch_start + ordinal, &self.target.field, value)
            });
        if written {
            self.assigned += 1;
        } else {
            self.skipped += 1;
        }
    }
}

fn cell(row: &TextRow, index: usize) -> Option<&str> {
    row.get(index).and_then(|c| c.as_deref())
}
