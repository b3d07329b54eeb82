//! Per-tile counts of digests by test, by trace, and restricted to a
//! matching paramset. Built once per tile view (include- or
//! exclude-ignored) and read many times by the summary calculator and
//! search engine.

use crate::paramset::ParamSet;
use crate::tile::TileView;
use crate::types::FastMap;
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct DigestCounter {
    by_test: FastMap<String, FastMap<String, usize>>,
    by_trace: FastMap<String, FastMap<String, usize>>,
}

impl DigestCounter {
    /// Scans every trace in the view once, tallying each non-missing
    /// digest by test name and by trace id, over the entire commit window.
    pub fn build(view: &TileView<'_>) -> Self {
        let mut by_test: FastMap<String, FastMap<String, usize>> = FastMap::default();
        let mut by_trace: FastMap<String, FastMap<String, usize>> = FastMap::default();

        for (trace_id, trace) in view.iter() {
            let test_name = trace.test_name().unwrap_or("").to_string();
            let trace_counts: &mut FastMap<String, usize> =
                by_trace.entry(trace_id.to_string()).or_default();
            let test_counts = by_test.entry(test_name).or_default();

            for digest in trace.digests.iter().flatten() {
                *trace_counts.entry(digest.as_str().to_string()).or_insert(0) += 1;
                *test_counts.entry(digest.as_str().to_string()).or_insert(0) += 1;
            }
        }

        Self { by_test, by_trace }
    }

    pub fn by_test(&self) -> &FastMap<String, FastMap<String, usize>> {
        &self.by_test
    }

    pub fn by_trace(&self) -> &FastMap<String, FastMap<String, usize>> {
        &self.by_trace
    }

    /// The single most-frequently-observed digest(s) per test. Ties are
    /// retained — more than one digest can be "max" for a test.
    pub fn max_digests_by_test(&self) -> FastMap<String, HashSet<String>> {
        let mut result = FastMap::default();
        for (test, counts) in &self.by_test {
            let max_count = counts.values().copied().max().unwrap_or(0);
            if max_count == 0 {
                continue;
            }
            let winners: HashSet<String> = counts
                .iter()
                .filter(|(_, &c)| c == max_count)
                .map(|(d, _)| d.clone())
                .collect();
            result.insert(test.clone(), winners);
        }
        result
    }

    /// Counts restricted to traces whose params match `query`.
    pub fn by_query(view: &TileView<'_>, query: &ParamSet) -> FastMap<String, usize> {
        let mut counts: FastMap<String, usize> = FastMap::default();
        for (_, trace) in view.iter() {
            if !query.matches_params(&trace.params) {
                continue;
            }
            for digest in trace.digests.iter().flatten() {
                *counts.entry(digest.as_str().to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}
