//! Postgres/CockroachDB-backed restamp, behind the `postgres` feature.
//! Executes the synthesized predicate from `predicate.rs` as a single
//! transactional `UPDATE` against the real `Traces` and `ValuesAtHead`
//! tables instead of the in-memory `TraceKeyTable` used by tests and the
//! CLI.
//!
//! Grounded on `other_examples/manifests/grove-pg-stream` for the
//! `tokio-postgres` dependency choice — the teacher repo has no SQL layer
//! of its own, so this crate is pulled in rather than adapted.

use super::predicate::{build_predicate, Predicate};
use crate::error::{Error, Result};
use crate::paramset::ParamSet;
use tokio_postgres::Transaction;

/// Runs the bulk restamp inside `txn`, so a caller can commit or roll back
/// together with whatever rule-table write preceded it.
///
/// `SET matches_any_ignore_rule = TRUE WHERE <predicate>` only ever turns
/// the flag on; it never flips a row to `FALSE`. Callers must pair this
/// with a reset pass (`reset_unmatched`) when rules are edited or removed,
/// matching the `None`-on-non-match semantics `ignore::store::restamp_all`
/// implements for the in-memory path.
pub async fn restamp_matching(txn: &Transaction<'_>, rules: &[ParamSet]) -> Result<u64> {
    let Predicate { sql, args } = build_predicate(rules);
    if sql == "false" {
        return Ok(0);
    }

    let params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
        args.iter().map(|a| a as &(dyn tokio_postgres::types::ToSql + Sync)).collect();

    let mut total = 0u64;
    for table in ["Traces", "ValuesAtHead"] {
        let query = format!(
            "UPDATE {table} SET matches_any_ignore_rule = TRUE WHERE {sql} RETURNING NOTHING",
        );
        total += txn
            .execute(query.as_str(), &params)
            .await
            .map_err(|e| Error::Transient { attempts: 1, source: e.into() })?;
    }
    Ok(total)
}

/// Resets every row not matched by the current rule set back to `NULL`
/// (unknown), so a rule edit/delete correctly un-ignores traces that no
/// longer match anything.
pub async fn reset_unmatched(txn: &Transaction<'_>, rules: &[ParamSet]) -> Result<u64> {
    let Predicate { sql, args } = build_predicate(rules);
    let params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
        args.iter().map(|a| a as &(dyn tokio_postgres::types::ToSql + Sync)).collect();

    let mut total = 0u64;
    for table in ["Traces", "ValuesAtHead"] {
        let query = format!(
            "UPDATE {table} SET matches_any_ignore_rule = NULL WHERE NOT ({sql}) RETURNING NOTHING",
        );
        total += txn
            .execute(query.as_str(), &params)
            .await
            .map_err(|e| Error::Transient { attempts: 1, source: e.into() })?;
    }
    Ok(total)
}
