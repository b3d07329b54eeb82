//! Search engine (spec §4.11): filtered traversal over the current
//! `SearchIndex` (or a changelist's sub-index) -> grouping into distinct
//! `(test, digest)` results -> reference-diff enrichment -> post-diff
//! filter -> sort -> paginate -> decorate.

pub mod diff;
pub mod query;

pub use diff::{compute_reference_diffs, DiffResult, ReferenceDiffs};
pub use query::{GroupTestFilter, Metric, SearchQuery, SortOrder, TriageFilter};

use crate::blame::BlameDistribution;
use crate::cache::TriageHistoryCache;
use crate::collaborators::DiffMetricSource;
use crate::config::SearchConfig;
use crate::digest::Digest;
use crate::error::Result;
use crate::expectations::{Expectations, Grouping, Label};
use crate::indexer::{ChangelistSubIndex, SearchIndex};
use crate::paramset::{ParamSet, Params};
use crate::tile::TraceId;
use crate::tracegroup::{build_trace_group, TraceGroup};
use crate::types::FastMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::instrument;

/// The CL-scoped branch (spec §4.11 step 1) shards its grouping pass across
/// this many workers, matching the `~16 workers` the spec names.
const CL_SEARCH_SHARDS: usize = 16;

type GroupKey = (String, String);
type Groups = FastMap<GroupKey, BTreeSet<String>>;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub test: String,
    pub digest: Digest,
    pub label: Label,
    pub trace_count: usize,
    pub params: ParamSet,
    pub blame: Option<BlameDistribution>,
    pub diffs: ReferenceDiffs,
    /// Dot-plot decoration (spec §4.12), populated only for the returned
    /// page, not the full result set (spec §4.11 step 7).
    pub trace_group: Option<TraceGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResultPage {
    pub results: Vec<SearchResult>,
    /// Total matching results before pagination, for the UI's "N results".
    pub total: usize,
    pub offset: usize,
}

pub struct SearchEngine<'a> {
    config: &'a SearchConfig,
}

impl<'a> SearchEngine<'a> {
    pub fn new(config: &'a SearchConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all)]
    pub async fn search(
        &self,
        index: &SearchIndex,
        query: &SearchQuery,
        expectations: &dyn Expectations,
        metric: &dyn DiffMetricSource,
        cl_index: Option<&ChangelistSubIndex>,
        triage_cache: Option<&TriageHistoryCache>,
    ) -> Result<SearchResultPage> {
        let mut groups = if query.is_changelist_scoped() {
            match cl_index {
                Some(cl) => self.cl_scoped_groups(index, cl, query),
                None => FastMap::default(),
            }
        } else {
            self.primary_groups(index, query)
        };

        if query.group_test_filter == GroupTestFilter::Count {
            let max_by_test = index.digest_counter_visible.max_digests_by_test();
            groups.retain(|(test, digest), _| {
                max_by_test.get(test).map(|winners| winners.contains(digest)).unwrap_or(false)
            });
        }

        let mut matched: Vec<(GroupKey, usize, Label)> = Vec::with_capacity(groups.len());
        for (key, trace_ids) in &groups {
            let (test, digest_str) = key;
            let corpus = self.corpus_for_test(index, test);
            let grouping = Grouping::new(corpus, test.clone());
            let label = expectations.classify(&grouping, &Digest::new_unchecked(digest_str.clone()));
            if self.passes_triage_filter(label, query.triage_filter) {
                matched.push((key.clone(), trace_ids.len(), label));
            }
        }

        let mut results = Vec::with_capacity(matched.len());
        for ((test, digest_str), trace_count, label) in &matched {
            let digest = Digest::new_unchecked(digest_str.clone());
            let corpus = self.corpus_for_test(index, test);
            let grouping = Grouping::new(corpus, test.clone());

            let (positives, negatives) = self.known_digests_for_test(index, test, expectations, &grouping);
            let positives = self.reference_candidates(index, test, &digest, &positives, query);
            let negatives = self.reference_candidates(index, test, &digest, &negatives, query);

            let diffs = if query.no_diff {
                ReferenceDiffs::default()
            } else {
                compute_reference_diffs(
                    &digest,
                    &positives,
                    &negatives,
                    metric,
                    query.metric,
                    self.config.max_reference_candidates,
                )
                .await?
            };

            if !self.passes_post_diff_filter(&diffs, query) {
                continue;
            }

            results.push(SearchResult {
                test: test.clone(),
                digest: digest.clone(),
                label: *label,
                trace_count: *trace_count,
                params: index.paramset_summary.get(test, &digest, query.include_ignored),
                blame: index.blamer.get_blame(test, digest_str).cloned(),
                diffs,
                trace_group: None,
            });
        }

        self.sort_results(&mut results, query.sort, query.metric);
        let total = results.len();
        let offset = query.offset.min(total);
        let limit = if query.limit == 0 { self.config.default_page_size } else { query.limit.min(self.config.max_page_size) };
        let mut page: Vec<SearchResult> = results.into_iter().skip(offset).take(limit).collect();

        self.decorate_page(&mut page, index, cl_index, query, &groups, triage_cache);

        Ok(SearchResultPage {
            results: page,
            total,
            offset,
        })
    }

    /// Spec §4.11 step 1, primary-branch case: walk the tile via the
    /// pre-slicer, accumulating `(test, digest) -> traces`. `head` narrows
    /// each trace to only its most recent digest.
    fn primary_groups(&self, index: &SearchIndex, query: &SearchQuery) -> Groups {
        let candidate_ids = self.filtered_traversal(index, query);
        let mut groups: Groups = FastMap::default();
        for id in &candidate_ids {
            let Some(trace) = index.tile.traces.get(id.as_str()) else { continue };
            let test = trace.test_name().unwrap_or("").to_string();

            let digests: Vec<&Digest> = if query.head {
                trace.at_head().into_iter().collect()
            } else {
                trace.digests.iter().flatten().collect()
            };

            for digest in digests {
                groups
                    .entry((test.clone(), digest.as_str().to_string()))
                    .or_default()
                    .insert(id.to_string());
            }
        }
        groups
    }

    /// Spec §4.11 step 1, CL-scoped case: read the changelist indexer's
    /// already-untriaged-filtered `(test, digest) -> traces` map, apply
    /// `includeDigestsProducedOnMaster` and the query's own paramset
    /// filter, sharded across `CL_SEARCH_SHARDS` workers with a single
    /// mutex-protected accumulator.
    fn cl_scoped_groups(&self, index: &SearchIndex, cl_index: &ChangelistSubIndex, query: &SearchQuery) -> Groups {
        let entries: Vec<(&GroupKey, &BTreeSet<String>)> = cl_index.untriaged_results.iter().collect();
        if entries.is_empty() {
            return FastMap::default();
        }

        let shard_size = entries.len().div_ceil(CL_SEARCH_SHARDS).max(1);
        let chunks: Vec<&[(&GroupKey, &BTreeSet<String>)]> = entries.chunks(shard_size).collect();
        let accumulator: Mutex<Groups> = Mutex::new(FastMap::default());

        let process_shard = |shard: &[(&GroupKey, &BTreeSet<String>)]| -> Groups {
            let mut local: Groups = FastMap::default();
            for ((test, digest_str), trace_ids) in shard.iter().copied() {
                if !query.include_digests_produced_on_master
                    && index
                        .digest_counter_all
                        .by_test()
                        .get(test.as_str())
                        .map(|counts| counts.contains_key(digest_str.as_str()))
                        .unwrap_or(false)
                {
                    continue;
                }

                let kept: BTreeSet<String> = trace_ids
                    .iter()
                    .filter(|id| {
                        query.query.is_empty()
                            || cl_index
                                .patched_tile
                                .traces
                                .get(id.as_str())
                                .map(|t| query.query.matches_params(&t.params))
                                .unwrap_or(false)
                    })
                    .cloned()
                    .collect();

                if !kept.is_empty() {
                    local.insert((test.clone(), digest_str.clone()), kept);
                }
            }
            local
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            chunks.par_iter().for_each(|shard| {
                let local = process_shard(*shard);
                accumulator.lock().expect("cl search accumulator poisoned").extend(local);
            });
        }
        #[cfg(not(feature = "parallel"))]
        {
            for shard in chunks.iter() {
                let local = process_shard(*shard);
                accumulator.lock().expect("cl search accumulator poisoned").extend(local);
            }
        }

        accumulator.into_inner().expect("cl search accumulator poisoned")
    }

    fn filtered_traversal(&self, index: &SearchIndex, query: &SearchQuery) -> Vec<TraceId> {
        let mut ids = index.preslicer.sliced_traces(&index.tile, false, &query.query);
        if query.include_ignored {
            ids.extend(index.preslicer.sliced_traces(&index.tile, true, &query.query));
        }
        ids
    }

    fn corpus_for_test(&self, index: &SearchIndex, test: &str) -> String {
        index
            .tile
            .traces
            .values()
            .find(|t| t.test_name() == Some(test))
            .and_then(|t| t.corpus())
            .unwrap_or("")
            .to_string()
    }

    fn known_digests_for_test(
        &self,
        index: &SearchIndex,
        test: &str,
        expectations: &dyn Expectations,
        grouping: &Grouping,
    ) -> (Vec<Digest>, Vec<Digest>) {
        let mut positives = Vec::new();
        let mut negatives = Vec::new();
        if let Some(counts) = index.digest_counter_visible.by_test().get(test) {
            for digest_str in counts.keys() {
                let digest = Digest::new_unchecked(digest_str.clone());
                match expectations.classify(grouping, &digest) {
                    Label::Positive => positives.push(digest),
                    Label::Negative => negatives.push(digest),
                    Label::Untriaged => {}
                }
            }
        }
        (positives, negatives)
    }

    /// Spec §4.11 step 3: restricts reference-diff candidates to those
    /// satisfying `match`-key equality with the focus digest's own
    /// producing traces, and `rightTraceValues`. A no-op when neither
    /// option is set.
    fn reference_candidates(
        &self,
        index: &SearchIndex,
        test: &str,
        digest: &Digest,
        candidates: &[Digest],
        query: &SearchQuery,
    ) -> Vec<Digest> {
        if query.match_keys.is_empty() && query.right_trace_values.is_empty() {
            return candidates.to_vec();
        }

        let focus_ps = index.paramset_summary.get(test, digest, query.include_ignored);
        let match_filter = restrict_to_keys(&focus_ps, &query.match_keys);

        candidates
            .iter()
            .filter(|candidate| {
                let candidate_ps = index.paramset_summary.get(test, candidate, query.include_ignored);
                let match_ok = match_filter.matches(&candidate_ps);
                let right_ok = query.right_trace_values.is_empty() || query.right_trace_values.matches(&candidate_ps);
                match_ok && right_ok
            })
            .cloned()
            .collect()
    }

    /// Spec §4.11 step 4: `diffMaxFilter`, the RGBA range, and
    /// `mustIncludeReference`, evaluated against the closest reference
    /// (negative preferred, falling back to positive).
    fn passes_post_diff_filter(&self, diffs: &ReferenceDiffs, query: &SearchQuery) -> bool {
        if query.no_diff {
            return true;
        }
        if query.must_include_reference && !diffs.has_reference() {
            return false;
        }
        let Some(closest) = diffs.closest_negative.as_ref().or(diffs.closest_positive.as_ref()) else {
            return true;
        };

        if let Some(max) = query.diff_max_filter {
            if closest.value(query.metric) > max {
                return false;
            }
        }
        let max_channel = closest.metrics.max_rgba_diffs.iter().copied().max().unwrap_or(0);
        if let Some(min) = query.rgba_min_filter {
            if max_channel < min {
                return false;
            }
        }
        if let Some(max) = query.rgba_max_filter {
            if max_channel > max {
                return false;
            }
        }
        true
    }

    fn passes_triage_filter(&self, label: Label, filter: TriageFilter) -> bool {
        match filter {
            TriageFilter::All => true,
            TriageFilter::Untriaged => label == Label::Untriaged,
            TriageFilter::Positive => label == Label::Positive,
            TriageFilter::Negative => label == Label::Negative,
        }
    }

    fn sort_results(&self, results: &mut [SearchResult], order: SortOrder, metric: Metric) {
        let closest_value = |r: &SearchResult| -> Option<f64> {
            r.diffs
                .closest_negative
                .as_ref()
                .or(r.diffs.closest_positive.as_ref())
                .map(|d| d.value(metric))
        };
        results.sort_by(|a, b| {
            match (closest_value(a), closest_value(b)) {
                (Some(x), Some(y)) => match order {
                    SortOrder::Descending => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
                    SortOrder::Ascending => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                },
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.digest.as_str().cmp(b.digest.as_str()),
            }
        });
    }

    /// Spec §4.11 step 7: decorate only the page that will actually be
    /// returned — trace-group dot-plot data and a triage-history cache
    /// lookup, both skipped for the bulk of the result set used for
    /// bulk-triage counts.
    fn decorate_page(
        &self,
        page: &mut [SearchResult],
        index: &SearchIndex,
        cl_index: Option<&ChangelistSubIndex>,
        query: &SearchQuery,
        groups: &Groups,
        triage_cache: Option<&TriageHistoryCache>,
    ) {
        for result in page.iter_mut() {
            let key = (result.test.clone(), result.digest.as_str().to_string());
            if let Some(trace_ids) = groups.get(&key) {
                if let Some(first_id) = trace_ids.iter().min() {
                    let trace = if query.is_changelist_scoped() {
                        cl_index.and_then(|cl| cl.patched_tile.traces.get(first_id.as_str()))
                    } else {
                        index.tile.traces.get(first_id.as_str())
                    };
                    if let Some(trace) = trace {
                        result.trace_group = Some(build_trace_group(trace, Some(&result.digest)));
                    }
                }
            }

            if let Some(cache) = triage_cache {
                let corpus = self.corpus_for_test(index, &result.test);
                let grouping = Grouping::new(corpus, result.test.clone());
                match cache.get(&grouping, &result.digest) {
                    Some(cached) => result.label = cached,
                    None => cache.put(grouping, result.digest.clone(), result.label),
                }
            }
        }
    }
}

/// Builds a `ParamSet` containing only the listed keys from `ps`, used to
/// turn `match` (spec §4.11) into something `ParamSet::matches` can test.
fn restrict_to_keys(ps: &ParamSet, keys: &[String]) -> ParamSet {
    let mut out = ParamSet::new();
    for key in keys {
        let Some(values) = ps.get(key) else { continue };
        for value in values {
            let mut p = Params::new();
            p.insert(key.clone(), value.clone());
            out.add_params(&p);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HammingDiffMetric;
    use crate::config::IndexerConfig;
    use crate::expectations::MapExpectations;
    use crate::indexer::Indexer;
    use crate::paramset::Params;
    use crate::tile::Trace;
    use crate::tile::Tile;

    fn d(s: &str) -> Digest {
        Digest::new_unchecked(s.to_string())
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn indexed(tile: Tile, expectations: &MapExpectations) -> std::sync::Arc<SearchIndex> {
        let indexer = Indexer::new(IndexerConfig::default());
        indexer.on_tile_arrival(tile, expectations).await;
        indexer.current().await
    }

    #[tokio::test]
    async fn search_filters_to_untriaged_by_default() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(
                params(&[("name", "testA"), ("source_type", "gm")]),
                vec![Some(d("good")), Some(d("bad"))],
            ),
        );
        let mut expectations = MapExpectations::new();
        expectations.set(Grouping::new("gm", "testA"), d("good"), Label::Positive);

        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(&index, &SearchQuery::new(), &expectations, &metric, None, None)
            .await
            .unwrap();

        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].digest, d("bad"));
        assert_eq!(page.results[0].label, Label::Untriaged);
        assert!(page.results[0].trace_group.is_some());
    }

    #[tokio::test]
    async fn search_all_filter_returns_every_label() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[("name", "testA"), ("source_type", "gm")]), vec![Some(d("good")), Some(d("bad"))]),
        );
        let mut expectations = MapExpectations::new();
        expectations.set(Grouping::new("gm", "testA"), d("good"), Label::Positive);

        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(
                &index,
                &SearchQuery::new().with_triage_filter(TriageFilter::All),
                &expectations,
                &metric,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(page.results.len(), 2);
    }

    #[tokio::test]
    async fn pagination_respects_offset_and_limit() {
        let mut tile = Tile::new(vec![]);
        for i in 0..5 {
            tile.insert_trace(
                format!("t{i}").into(),
                Trace::new(
                    params(&[("name", format!("test{i}").as_str()), ("source_type", "gm")]),
                    vec![Some(d(&format!("d{i:02}ffffffffffffffffffffffffffff")))],
                ),
            );
        }
        let expectations = MapExpectations::new();
        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(
                &index,
                &SearchQuery::new().with_triage_filter(TriageFilter::All).with_page(2, 2),
                &expectations,
                &metric,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.offset, 2);
    }

    #[tokio::test]
    async fn head_option_only_counts_the_last_digest() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(
                params(&[("name", "testA"), ("source_type", "gm")]),
                vec![Some(d("old")), Some(d("new"))],
            ),
        );
        let expectations = MapExpectations::new();
        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(
                &index,
                &SearchQuery::new().with_triage_filter(TriageFilter::All).with_head(true),
                &expectations,
                &metric,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].digest, d("new"));
    }

    #[tokio::test]
    async fn group_test_filter_count_keeps_only_the_most_frequent_digest() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(
                params(&[("name", "testA"), ("source_type", "gm")]),
                vec![Some(d("common")), Some(d("common")), Some(d("rare"))],
            ),
        );
        let expectations = MapExpectations::new();
        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(
                &index,
                &SearchQuery::new()
                    .with_triage_filter(TriageFilter::All)
                    .with_group_test_filter(GroupTestFilter::Count),
                &expectations,
                &metric,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].digest, d("common"));
    }

    #[tokio::test]
    async fn no_diff_skips_reference_diff_computation() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[("name", "testA"), ("source_type", "gm")]), vec![Some(d("good")), Some(d("bad"))]),
        );
        let mut expectations = MapExpectations::new();
        expectations.set(Grouping::new("gm", "testA"), d("good"), Label::Positive);
        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(
                &index,
                &SearchQuery::new().with_no_diff(true),
                &expectations,
                &metric,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.results[0].diffs.closest_positive.is_none());
    }

    #[tokio::test]
    async fn must_include_reference_drops_digests_with_no_viable_reference() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[("name", "testA"), ("source_type", "gm")]), vec![Some(d("bad"))]),
        );
        let expectations = MapExpectations::new();
        let index = indexed(tile, &expectations).await;
        let cfg = SearchConfig::default();
        let engine = SearchEngine::new(&cfg);
        let metric = HammingDiffMetric;
        let page = engine
            .search(
                &index,
                &SearchQuery::new().with_triage_filter(TriageFilter::All).with_must_include_reference(true),
                &expectations,
                &metric,
                None,
                None,
            )
            .await
            .unwrap();
        assert!(page.results.is_empty());
    }
}
