//! Ignore-rule CRUD and the bulk restamp of `matches_any_ignore_rule` on
//! every affected trace (spec §4.4). Each mutation is one transaction: the
//! rule write and the flag restamp succeed or fail together.

use super::predicate::{build_predicate, Predicate};
use crate::config::IgnoreEngineConfig;
use crate::error::{Error, Result};
use crate::paramset::{ParamMatcher, ParamSet, Params};
use crate::tile::TraceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub id: Uuid,
    pub created_by: String,
    pub updated_by: String,
    pub expires: DateTime<Utc>,
    pub note: String,
    pub query: ParamSet,
}

impl IgnoreRule {
    /// A rule persists only if its query parses to a non-empty ParamSet.
    /// `query` here is already a parsed ParamSet, so "parseable" reduces to
    /// "not empty" — an empty query would match every trace.
    pub fn validate(&self) -> Result<()> {
        if self.query.is_empty() {
            return Err(Error::invalid("ignore rule query must not be empty"));
        }
        Ok(())
    }
}

/// The two wide tables the ignore engine restamps: trace keys and a
/// tri-state "matches any ignore rule" flag, mirrored at the full-trace
/// level (`Traces`) and at the head-of-trace level (`ValuesAtHead`).
///
/// Implementations own the actual storage (in-memory for tests/CLI, a
/// database for production — see `sql_store` behind the `postgres`
/// feature). All mutation here happens inside whatever transaction the
/// implementation's `restamp_all` establishes.
pub trait TraceKeyTable: Send + Sync {
    fn trace_ids(&self) -> Vec<TraceId>;
    fn keys(&self, id: &TraceId) -> Option<Params>;
    /// Sets the flag for both the trace-level and head-of-trace rows.
    /// `None` means "unknown / not evaluated against the current rule set".
    fn set_flag(&mut self, id: &TraceId, matches: Option<bool>);
    fn get_flag(&self, id: &TraceId) -> Option<bool>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestampReport {
    pub examined: usize,
    pub flagged: usize,
}

/// Recomputes every trace's flag against the current rule set: `Some(true)`
/// if any rule matches the trace's keys, `None` otherwise. A trace is never
/// stamped `Some(false)` — a flag of `None` just means "known not to match
/// any current rule", indistinguishable in storage from "never evaluated",
/// which matches scenario S2/S3: traces a rule doesn't touch are left
/// exactly where they started.
pub fn restamp_all<T: TraceKeyTable + ?Sized>(
    table: &mut T,
    rules: &[ParamSet],
) -> RestampReport {
    let matcher = ParamMatcher::new(rules.to_vec());
    let mut report = RestampReport::default();

    for id in table.trace_ids() {
        report.examined += 1;
        let Some(keys) = table.keys(&id) else {
            continue;
        };
        let trace_params = ParamSet::from_params(&keys);
        if matcher.match_any(&trace_params) {
            table.set_flag(&id, Some(true));
            report.flagged += 1;
        } else {
            table.set_flag(&id, None);
        }
    }

    report
}

/// Bridges the ignore engine to a loaded `Tile`: restamping writes straight
/// into each trace's `ignore_state`, so `Tile::exclude_ignored` reflects the
/// new rule set the moment the restamp returns. `Some(false)` and `None`
/// both map to `NotIgnored` — the tile only distinguishes "ignored" from
/// "not", `Unknown` exists solely for traces never yet stamped.
pub struct TileTraceKeyTable<'t>(pub &'t mut crate::tile::Tile);

impl<'t> TraceKeyTable for TileTraceKeyTable<'t> {
    fn trace_ids(&self) -> Vec<TraceId> {
        self.0.traces.keys().cloned().collect()
    }

    fn keys(&self, id: &TraceId) -> Option<Params> {
        self.0.traces.get(id.as_str()).map(|t| t.params.clone())
    }

    fn set_flag(&mut self, id: &TraceId, matches: Option<bool>) {
        if let Some(trace) = self.0.traces.get_mut(id.as_str()) {
            trace.ignore_state = match matches {
                Some(true) => crate::tile::IgnoreState::Ignored,
                Some(false) | None => crate::tile::IgnoreState::NotIgnored,
            };
        }
    }

    fn get_flag(&self, id: &TraceId) -> Option<bool> {
        self.0.traces.get(id.as_str()).and_then(|t| match t.ignore_state {
            crate::tile::IgnoreState::Ignored => Some(true),
            crate::tile::IgnoreState::NotIgnored => Some(false),
            crate::tile::IgnoreState::Unknown => None,
        })
    }
}

/// In-memory rule store + trace-flag table, used by tests and the CLI.
/// Production deployments swap the `TraceKeyTable` for the SQL-backed one
/// without touching rule CRUD or predicate synthesis.
pub struct IgnoreEngine<T: TraceKeyTable> {
    rules: Vec<IgnoreRule>,
    table: T,
    config: IgnoreEngineConfig,
}

impl<T: TraceKeyTable + Default> Default for IgnoreEngine<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: TraceKeyTable> IgnoreEngine<T> {
    pub fn new(table: T) -> Self {
        Self::with_config(table, IgnoreEngineConfig::default())
    }

    pub fn with_config(table: T, config: IgnoreEngineConfig) -> Self {
        Self {
            rules: Vec::new(),
            table,
            config,
        }
    }

    /// Rebuilds an engine from a previously-persisted rule set (e.g. the
    /// CLI's JSON rule file) with a single restamp pass over `table`,
    /// instead of one pass per rule as repeated `create()` calls would do.
    pub fn load(table: T, rules: Vec<IgnoreRule>) -> Self {
        Self::load_with_config(table, rules, IgnoreEngineConfig::default())
    }

    pub fn load_with_config(table: T, rules: Vec<IgnoreRule>, config: IgnoreEngineConfig) -> Self {
        let mut engine = Self { rules, table, config };
        engine.recompute_and_restamp();
        engine
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    /// Rules fed into predicate synthesis and bulk restamp. When
    /// `config.skip_expired_in_predicate` is set, expired rules are
    /// dropped here but stay in `self.rules` (and `list()`) for audit and
    /// history purposes — only matching behavior is affected.
    fn rule_query_sets(&self) -> Vec<ParamSet> {
        let now = Utc::now();
        self.rules
            .iter()
            .filter(|r| !self.config.skip_expired_in_predicate || r.expires > now)
            .map(|r| r.query.clone())
            .collect()
    }

    /// The predicate the current rule set would synthesize — useful for
    /// callers that want to see/log the SQL without a real database behind
    /// `TraceKeyTable` (e.g. the CLI's `ignore predicate` subcommand).
    pub fn current_predicate(&self) -> Predicate {
        build_predicate(&self.rule_query_sets())
    }

    /// Rows ordered by `expires` ascending.
    pub fn list(&self) -> Vec<&IgnoreRule> {
        let mut rules: Vec<&IgnoreRule> = self.rules.iter().collect();
        rules.sort_by_key(|r| r.expires);
        rules
    }

    pub fn create(&mut self, rule: IgnoreRule) -> Result<RestampReport> {
        rule.validate()?;
        self.rules.push(rule);
        Ok(self.recompute_and_restamp())
    }

    pub fn update(&mut self, rule: IgnoreRule) -> Result<RestampReport> {
        rule.validate()?;
        let pos = self
            .rules
            .iter()
            .position(|r| r.id == rule.id)
            .ok_or_else(|| Error::not_found(format!("ignore rule {} not found", rule.id)))?;
        self.rules[pos] = rule;
        Ok(self.recompute_and_restamp())
    }

    pub fn delete(&mut self, id: Uuid) -> Result<RestampReport> {
        let pos = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::not_found(format!("ignore rule {id} not found")))?;
        self.rules.remove(pos);
        Ok(self.recompute_and_restamp())
    }

    /// The single-transaction unit: recompute the predicate from the (now
    /// mutated) rule set, then bulk-update both tables. If a real
    /// transactional store's restamp step fails, the caller rolls back the
    /// rule mutation too — this in-memory engine applies both in one
    /// synchronous call, so there is nothing to roll back.
    fn recompute_and_restamp(&mut self) -> RestampReport {
        let rules = self.rule_query_sets();
        restamp_all(&mut self.table, &rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FastMap;

    #[derive(Default)]
    struct MemTable {
        keys: FastMap<TraceId, Params>,
        flags: FastMap<TraceId, Option<bool>>,
    }

    impl MemTable {
        fn insert(&mut self, id: &str, params: &[(&str, &str)]) {
            let p: Params = params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            self.keys.insert(id.into(), p);
            self.flags.insert(id.into(), None);
        }
    }

    impl TraceKeyTable for MemTable {
        fn trace_ids(&self) -> Vec<TraceId> {
            self.keys.keys().cloned().collect()
        }

        fn keys(&self, id: &TraceId) -> Option<Params> {
            self.keys.get(id).cloned()
        }

        fn set_flag(&mut self, id: &TraceId, matches: Option<bool>) {
            self.flags.insert(id.clone(), matches);
        }

        fn get_flag(&self, id: &TraceId) -> Option<bool> {
            self.flags.get(id).copied().flatten()
        }
    }

    fn rule_query(pairs: &[(&str, &[&str])]) -> ParamSet {
        let mut ps = ParamSet::new();
        for (k, vs) in pairs {
            for v in *vs {
                let mut p = Params::new();
                p.insert((*k).to_string(), (*v).to_string());
                ps.add_params(&p);
            }
        }
        ps
    }

    fn six_trace_dataset() -> MemTable {
        let mut table = MemTable::default();
        for model in ["Sailfish", "Bullhead"] {
            for n in ["One", "Two", "Three"] {
                table.insert(
                    &format!("{model}-{n}"),
                    &[("model", model), ("os", "Android"), ("name", n)],
                );
            }
        }
        table
    }

    #[test]
    fn s2_ignore_application_flags_only_matching_traces() {
        let table = six_trace_dataset();
        let mut engine = IgnoreEngine::new(table);
        let rule = IgnoreRule {
            id: Uuid::new_v4(),
            created_by: "a@example.com".into(),
            updated_by: "a@example.com".into(),
            expires: Utc::now(),
            note: "flaky".into(),
            query: rule_query(&[("model", &["Sailfish"]), ("os", &["Android"])]),
        };
        let report = engine.create(rule).unwrap();
        assert_eq!(report.flagged, 3);

        for n in ["One", "Two", "Three"] {
            let id = format!("Sailfish-{n}").into();
            assert_eq!(engine.table().get_flag(&id), Some(true));
            let id = format!("Bullhead-{n}").into();
            assert_eq!(engine.table().get_flag(&id), None);
        }
    }

    #[test]
    fn s3_rule_with_nonexistent_key_changes_nothing() {
        let table = six_trace_dataset();
        let mut engine = IgnoreEngine::new(table);
        let rule = IgnoreRule {
            id: Uuid::new_v4(),
            created_by: "a@example.com".into(),
            updated_by: "a@example.com".into(),
            expires: Utc::now(),
            note: "no match".into(),
            query: rule_query(&[("model", &["Snorlax"]), ("os", &["Android"])]),
        };
        let report = engine.create(rule).unwrap();
        assert_eq!(report.flagged, 0);
        for id in engine.table().trace_ids() {
            assert_eq!(engine.table().get_flag(&id), None);
        }
    }

    #[test]
    fn deleting_the_only_matching_rule_reverts_flags() {
        let table = six_trace_dataset();
        let mut engine = IgnoreEngine::new(table);
        let rule = IgnoreRule {
            id: Uuid::new_v4(),
            created_by: "a@example.com".into(),
            updated_by: "a@example.com".into(),
            expires: Utc::now(),
            note: "flaky".into(),
            query: rule_query(&[("model", &["Sailfish"])]),
        };
        let id = rule.id;
        engine.create(rule).unwrap();
        assert_eq!(engine.table().get_flag(&"Sailfish-One".into()), Some(true));

        engine.delete(id).unwrap();
        for trace_id in engine.table().trace_ids() {
            assert_eq!(engine.table().get_flag(&trace_id), None);
        }
    }

    #[test]
    fn create_rejects_empty_query() {
        let table = six_trace_dataset();
        let mut engine = IgnoreEngine::new(table);
        let rule = IgnoreRule {
            id: Uuid::new_v4(),
            created_by: "a@example.com".into(),
            updated_by: "a@example.com".into(),
            expires: Utc::now(),
            note: "bad".into(),
            query: ParamSet::new(),
        };
        assert!(engine.create(rule).is_err());
    }

    #[test]
    fn expired_rules_are_skipped_from_the_predicate_but_kept_in_list() {
        let table = six_trace_dataset();
        let mut engine = IgnoreEngine::with_config(
            table,
            crate::config::IgnoreEngineConfig { skip_expired_in_predicate: true },
        );
        let expired = IgnoreRule {
            id: Uuid::new_v4(),
            created_by: "a".into(),
            updated_by: "a".into(),
            expires: Utc::now() - chrono::Duration::days(1),
            note: "stale".into(),
            query: rule_query(&[("model", &["Sailfish"])]),
        };
        let report = engine.create(expired).unwrap();
        assert_eq!(report.flagged, 0);
        assert_eq!(engine.list().len(), 1);
        for id in engine.table().trace_ids() {
            assert_eq!(engine.table().get_flag(&id), None);
        }
    }

    #[test]
    fn load_restamps_once_for_a_persisted_rule_set() {
        let table = six_trace_dataset();
        let rules = vec![IgnoreRule {
            id: Uuid::new_v4(),
            created_by: "a".into(),
            updated_by: "a".into(),
            expires: Utc::now() + chrono::Duration::days(1),
            note: "loaded".into(),
            query: rule_query(&[("model", &["Sailfish"])]),
        }];
        let engine = IgnoreEngine::load(table, rules);
        assert_eq!(engine.list().len(), 1);
        assert_eq!(engine.table().get_flag(&"Sailfish-One".into()), Some(true));
        assert_eq!(engine.table().get_flag(&"Bullhead-One".into()), None);
    }

    #[test]
    fn tile_trace_key_table_restamps_ignore_state_in_place() {
        use crate::tile::{IgnoreState, Tile, Trace};

        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(
                [("model".to_string(), "Sailfish".to_string())].into_iter().collect(),
                vec![],
            ),
        );
        tile.insert_trace(
            "t2".into(),
            Trace::new(
                [("model".to_string(), "Bullhead".to_string())].into_iter().collect(),
                vec![],
            ),
        );

        let mut engine = IgnoreEngine::new(TileTraceKeyTable(&mut tile));
        engine
            .create(IgnoreRule {
                id: Uuid::new_v4(),
                created_by: "a".into(),
                updated_by: "a".into(),
                expires: Utc::now(),
                note: "flaky".into(),
                query: rule_query(&[("model", &["Sailfish"])]),
            })
            .unwrap();

        assert_eq!(tile.traces["t1"].ignore_state, IgnoreState::Ignored);
        assert_eq!(tile.traces["t2"].ignore_state, IgnoreState::NotIgnored);
        assert_eq!(tile.exclude_ignored().len(), 1);
    }

    #[test]
    fn list_is_ordered_by_expires_ascending() {
        let table = six_trace_dataset();
        let mut engine = IgnoreEngine::new(table);
        let later = Utc::now() + chrono::Duration::days(5);
        let sooner = Utc::now() + chrono::Duration::days(1);

        engine
            .create(IgnoreRule {
                id: Uuid::new_v4(),
                created_by: "a".into(),
                updated_by: "a".into(),
                expires: later,
                note: "later".into(),
                query: rule_query(&[("model", &["Sailfish"])]),
            })
            .unwrap();
        engine
            .create(IgnoreRule {
                id: Uuid::new_v4(),
                created_by: "a".into(),
                updated_by: "a".into(),
                expires: sooner,
                note: "sooner".into(),
                query: rule_query(&[("model", &["Bullhead"])]),
            })
            .unwrap();

        let notes: Vec<&str> = engine.list().iter().map(|r| r.note.as_str()).collect();
        assert_eq!(notes, vec!["sooner", "later"]);
    }
}
