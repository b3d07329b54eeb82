//! Translates a set of ignore-rule ParamSets into the SQL predicate used to
//! restamp `matches_any_ignore_rule` on the `Traces` and `ValuesAtHead`
//! tables (spec §4.4, scenario S1).
//!
//! Ignores are evaluated against trace *keys* only, never against options:
//! options often differ between runs of the same trace and would defeat
//! flag stability if they were part of the match.

use crate::paramset::ParamSet;

/// A synthesized predicate: the SQL text with `$n` positional placeholders,
/// and the argument list those placeholders bind to, in order. Keys come
/// before their values in the argument list, one key block per rule key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub sql: String,
    pub args: Vec<String>,
}

/// Builds the OR-of-ANDs predicate for a list of rule paramsets. An empty
/// rule set yields the literal `false` with no arguments — no trace can
/// ever match zero rules.
pub fn build_predicate(rules: &[ParamSet]) -> Predicate {
    if rules.is_empty() {
        return Predicate {
            sql: "false".to_string(),
            args: Vec::new(),
        };
    }

    let mut args: Vec<String> = Vec::new();
    let mut rule_clauses: Vec<String> = Vec::with_capacity(rules.len());

    for rule in rules {
        let mut keys: Vec<&str> = rule.keys().collect();
        keys.sort_unstable();

        let mut key_clauses: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            let values = rule.get(key).unwrap_or(&[]);

            args.push(key.to_string());
            let key_placeholder = args.len();

            let mut value_placeholders = Vec::with_capacity(values.len());
            for v in values {
                args.push(v.clone());
                value_placeholders.push(format!("${}", args.len()));
            }

            key_clauses.push(format!(
                "COALESCE(keys->>${} IN ({}), FALSE)",
                key_placeholder,
                value_placeholders.join(", ")
            ));
        }

        rule_clauses.push(format!("({})", key_clauses.join(" AND ")));
    }

    let sql = format!("({})", rule_clauses.join("\n OR "));
    Predicate { sql, args }
}
