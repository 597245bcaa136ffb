//! Driving statements for the four operation kinds.
//!
//! A [`Planner`] is built once per call from the [`ResolvedShape`] and the
//! options; every check that can fail happens there, before any I/O. It then
//! produces a [`Plan`] per batch, bound to that batch's staging relation.
//!
//! In generated SQL the target is aliased `t` and the staging relation `s`.
//! Matching is plain equality on every qualifier, so a NULL qualifier never
//! matches a target row.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OperationPlanError;
use crate::options::{BulkOptions, IdentityBehavior, MergeCommandKind};
use crate::schema::{IdentityKind, ResolvedShape, quote_ident};
use crate::staging::ORDINAL_COLUMN;

/// The four bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Merge,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Merge => "merge",
        })
    }
}

/// How the result of a [`Step`] is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Executed; the affected row count is added to the total.
    Count,
    /// Returns `(ordinal, identity)` for staging rows that already exist in
    /// the target. Not counted.
    MatchedIdentities,
    /// Returns `(ordinal, identity)` per affected row; counted.
    IdentitiesByOrdinal,
    /// Returns one identity per inserted row, in staging ordinal order, for
    /// every row not already matched; counted.
    IdentitiesInOrder,
}

impl StepKind {
    /// Returns true if the step produces rows rather than a count.
    pub fn is_query(self) -> bool {
        !matches!(self, StepKind::Count)
    }
}

/// One statement of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub sql: String,
    pub kind: StepKind,
}

impl Step {
    fn new(sql: String, kind: StepKind) -> Self {
        Self { sql, kind }
    }
}

/// The statements driving one batch, run in order inside the batch's transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// Validated, batch-independent planning state.
#[derive(Debug, Clone)]
pub struct Planner {
    operation: OperationKind,
    merge: MergeCommandKind,
    changed_only: bool,
    /// Quoted, qualified target table.
    target: String,
    /// Quoted qualifier columns.
    qualifiers: Vec<String>,
    /// Quoted columns written by inserts.
    insert_columns: Vec<String>,
    /// An inserted column is `GENERATED ALWAYS AS IDENTITY`.
    overriding: bool,
    /// Quoted columns overwritten by updates.
    set_columns: Vec<String>,
    /// Quoted identity column read back into the source.
    returning: Option<String>,
}

impl Planner {
    pub fn new(
        operation: OperationKind,
        shape: &ResolvedShape,
        options: &BulkOptions,
    ) -> Result<Self, OperationPlanError> {
        let table = shape.table.to_string();
        if operation != OperationKind::Insert && shape.qualifiers.is_empty() {
            return Err(OperationPlanError::EmptyQualifiers { operation });
        }

        let keep_identity = options.identity == IdentityBehavior::KeepIdentity;
        let upsert = operation == OperationKind::Merge
            && options.merge == MergeCommandKind::NativeUpsert;

        let inserted: Vec<_> = shape
            .columns
            .iter()
            .filter(|c| {
                c.identity.is_none() || keep_identity || (upsert && shape.is_qualifier(&c.name))
            })
            .collect();
        let overriding = inserted
            .iter()
            .any(|c| c.identity == Some(IdentityKind::Always));
        let insert_columns: Vec<String> = inserted.iter().map(|c| quote_ident(&c.name)).collect();

        let set_columns: Vec<String> = shape
            .columns
            .iter()
            .filter(|c| c.identity.is_none() && !shape.is_qualifier(&c.name))
            .map(|c| quote_ident(&c.name))
            .collect();

        match operation {
            OperationKind::Update if set_columns.is_empty() => {
                return Err(OperationPlanError::NothingToUpdate { table });
            }
            OperationKind::Insert | OperationKind::Merge if insert_columns.is_empty() => {
                return Err(OperationPlanError::NothingToInsert { table });
            }
            _ => {}
        }
        if upsert && !shape.qualifiers_are_unique_key() {
            return Err(OperationPlanError::NoMatchingConstraint {
                table,
                qualifiers: shape.qualifiers.clone(),
            });
        }
        // The conflict target would write the caller's identity values, so
        // new rows could never receive generated ones.
        if let Some(target) = shape.identity.as_ref().filter(|t| {
            upsert
                && options.identity == IdentityBehavior::ReturnIdentity
                && shape.is_qualifier(&t.column)
        }) {
            return Err(OperationPlanError::IdentityQualifiedUpsert {
                table,
                column: target.column.clone(),
            });
        }

        let returning = match (&shape.identity, options.identity, operation) {
            (_, _, OperationKind::Delete) => None,
            (Some(target), IdentityBehavior::ReturnIdentity, _) => Some(quote_ident(&target.column)),
            _ => None,
        };

        Ok(Self {
            operation,
            merge: options.merge,
            changed_only: options.changed_only,
            target: shape.table.qualified(),
            qualifiers: shape.qualifiers.iter().map(|q| quote_ident(q)).collect(),
            insert_columns,
            overriding,
            set_columns,
            returning,
        })
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Returns true if staging rows carry the batch-local ordinal column.
    pub fn with_ordinal(&self) -> bool {
        self.returning.is_some()
    }

    /// For each staged column, whether a NULL would be written into a
    /// NOT NULL target column.
    pub fn not_null_columns(&self, shape: &ResolvedShape) -> Vec<bool> {
        shape
            .columns
            .iter()
            .map(|c| !c.nullable && self.writes(&quote_ident(&c.name)))
            .collect()
    }

    fn writes(&self, quoted: &str) -> bool {
        let set = self.set_columns.iter().any(|c| c == quoted);
        match self.operation {
            OperationKind::Delete => false,
            OperationKind::Update => set,
            OperationKind::Insert | OperationKind::Merge => {
                set || self.insert_columns.iter().any(|c| c == quoted)
            }
        }
    }

    /// Builds the statements for one batch staged in `staging` (quoted,
    /// possibly qualified).
    pub fn plan(&self, staging: &str) -> Plan {
        let steps = match self.operation {
            OperationKind::Insert => vec![self.insert(staging, false)],
            OperationKind::Update => vec![self.update(staging, self.returning.is_some())],
            OperationKind::Delete => vec![self.delete(staging)],
            OperationKind::Merge => match self.merge {
                MergeCommandKind::Standard => self.standard_merge(staging),
                MergeCommandKind::NativeUpsert => self.native_upsert(staging),
            },
        };
        Plan { steps }
    }

    fn standard_merge(&self, staging: &str) -> Vec<Step> {
        let mut steps = Vec::with_capacity(3);
        steps.extend(self.matched_identities(staging));
        if !self.set_columns.is_empty() {
            steps.push(self.update(staging, false));
        }
        steps.push(self.insert(staging, true));
        steps
    }

    /// Reads the identities of staging rows that already exist in the target.
    fn matched_identities(&self, staging: &str) -> Option<Step> {
        let identity = self.returning.as_ref()?;
        let sql = format!(
            "SELECT s.{ord}, t.{identity} FROM {staging} AS s JOIN {target} AS t ON {matched}",
            ord = quote_ident(ORDINAL_COLUMN),
            target = self.target,
            matched = self.match_predicate(),
        );
        Some(Step::new(sql, StepKind::MatchedIdentities))
    }

    /// With only key columns staged there is nothing to update, so existing
    /// rows are skipped and their identities read beforehand.
    fn native_upsert(&self, staging: &str) -> Vec<Step> {
        let mut steps = Vec::with_capacity(2);
        if self.set_columns.is_empty() {
            steps.extend(self.matched_identities(staging));
        }
        steps.push(self.upsert(staging));
        steps
    }

    fn insert(&self, staging: &str, unmatched_only: bool) -> Step {
        let mut sql = format!(
            "INSERT INTO {} ({}) {}SELECT {} FROM {} AS s",
            self.target,
            self.insert_columns.join(", "),
            self.overriding_clause(),
            self.staged(&self.insert_columns),
            staging,
        );
        if unmatched_only {
            sql.push_str(&format!(
                " WHERE NOT EXISTS (SELECT 1 FROM {} AS t WHERE {})",
                self.target,
                self.match_predicate()
            ));
        }
        let kind = match &self.returning {
            Some(identity) => {
                sql.push_str(&format!(
                    " ORDER BY s.{} RETURNING {}",
                    quote_ident(ORDINAL_COLUMN),
                    identity
                ));
                StepKind::IdentitiesInOrder
            }
            None => StepKind::Count,
        };
        Step::new(sql, kind)
    }

    fn update(&self, staging: &str, returning: bool) -> Step {
        let assignments: Vec<String> = self
            .set_columns
            .iter()
            .map(|c| format!("{c} = s.{c}"))
            .collect();
        let mut sql = format!(
            "UPDATE {} AS t SET {} FROM {} AS s WHERE {}",
            self.target,
            assignments.join(", "),
            staging,
            self.match_predicate()
        );
        if self.changed_only {
            sql.push_str(&format!(" AND ({})", self.changed_predicate("s")));
        }
        let kind = match (&self.returning, returning) {
            (Some(identity), true) => {
                sql.push_str(&format!(
                    " RETURNING s.{}, t.{}",
                    quote_ident(ORDINAL_COLUMN),
                    identity
                ));
                StepKind::IdentitiesByOrdinal
            }
            _ => StepKind::Count,
        };
        Step::new(sql, kind)
    }

    fn delete(&self, staging: &str) -> Step {
        let sql = format!(
            "DELETE FROM {} AS t USING {} AS s WHERE {}",
            self.target,
            staging,
            self.match_predicate()
        );
        Step::new(sql, StepKind::Count)
    }

    /// `INSERT ... ON CONFLICT (qualifiers) DO UPDATE`, or `DO NOTHING` when
    /// no column is left to update.
    ///
    /// When identities are returned every conflicting row must be updated so
    /// that `RETURNING` yields one row per staging row; `changed_only` is then
    /// not applied. Under `DO NOTHING` only inserted rows are returned.
    fn upsert(&self, staging: &str) -> Step {
        let mut sql = format!(
            "INSERT INTO {} AS t ({}) {}SELECT {} FROM {} AS s",
            self.target,
            self.insert_columns.join(", "),
            self.overriding_clause(),
            self.staged(&self.insert_columns),
            staging,
        );
        if self.returning.is_some() {
            sql.push_str(&format!(" ORDER BY s.{}", quote_ident(ORDINAL_COLUMN)));
        }
        sql.push_str(&format!(" ON CONFLICT ({}) ", self.qualifiers.join(", ")));

        let excluded = |columns: &[String]| {
            columns
                .iter()
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match (&self.returning, self.set_columns.is_empty()) {
            (_, true) => sql.push_str("DO NOTHING"),
            (returning, false) => {
                sql.push_str(&format!("DO UPDATE SET {}", excluded(&self.set_columns)));
                if self.changed_only && returning.is_none() {
                    sql.push_str(&format!(" WHERE {}", self.changed_predicate("EXCLUDED")));
                }
            }
        }
        let kind = match &self.returning {
            Some(identity) => {
                sql.push_str(&format!(" RETURNING t.{identity}"));
                StepKind::IdentitiesInOrder
            }
            None => StepKind::Count,
        };
        Step::new(sql, kind)
    }

    fn overriding_clause(&self) -> &'static str {
        if self.overriding {
            "OVERRIDING SYSTEM VALUE "
        } else {
            ""
        }
    }

    fn staged(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| format!("s.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn match_predicate(&self) -> String {
        self.qualifiers
            .iter()
            .map(|q| format!("t.{q} = s.{q}"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// `t.c IS DISTINCT FROM <source>.c OR ...` over the updated columns.
    fn changed_predicate(&self, source: &str) -> String {
        self.set_columns
            .iter()
            .map(|c| format!("t.{c} IS DISTINCT FROM {source}.{c}"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}
