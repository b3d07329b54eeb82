//! Changelist indexer (spec §4.10): periodically rebuilds a small, TTL-
//! cached sub-index per open CL, overlaying the CL's own tryjob digests on
//! top of the primary tile. Open CLs are processed a chunk at a time so one
//! slow CL can't stall the others — the same bounded-parallelism idea as
//! the teacher's `process_impacted_views`, applied to an externally-driven
//! worklist instead of a dependency graph.

use crate::blame::Blamer;
use crate::cache::TtlLruCache;
use crate::collaborators::{ChangelistStore, TryjobStore};
use crate::config::ChangelistIndexerConfig;
use crate::digest::Digest;
use crate::error::Result;
use crate::expectations::{Expectations, Grouping, JoinedExpectations, Label};
use crate::summary::SummaryMap;
use crate::tile::Tile;
use crate::types::FastMap;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{info, instrument};

type GroupKey = (String, String);

/// The sub-index for one open changelist: the primary tile's traces with
/// the CL's own tryjob digests patched onto their heads, summarized
/// against `JoinedExpectations` (CL-over-primary).
pub struct ChangelistSubIndex {
    pub cl_id: String,
    pub summary: SummaryMap,
    /// `(test, digest) -> trace ids`, already filtered to untriaged-under-
    /// joined-expectations results (spec §4.10 step 4). This is exactly
    /// what the search engine's CL-scoped branch (spec §4.11 step 1) needs
    /// without re-walking the patched tile on every search.
    pub untriaged_results: FastMap<GroupKey, BTreeSet<String>>,
    /// The primary tile with this CL's tryjob digests patched onto the
    /// matching traces' heads, kept so a re-filter pass (step 5) or a
    /// CL-scoped search can look up trace params without rebuilding.
    pub patched_tile: Tile,
}

pub struct ChangelistIndexer {
    config: ChangelistIndexerConfig,
    cache: TtlLruCache<String, Arc<ChangelistSubIndex>>,
}

impl ChangelistIndexer {
    pub fn new(config: ChangelistIndexerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_concurrent_cls).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: TtlLruCache::new(capacity, config.ttl),
            config,
        }
    }

    pub fn get_cached(&self, cl_id: &str) -> Option<Arc<ChangelistSubIndex>> {
        self.cache.get(&cl_id.to_string())
    }

    /// Rebuilds the sub-index for every currently open CL updated within
    /// the recency cutoff, capped at `max_concurrent_cls`, `parallelism`
    /// CLs at a time, and refreshes the cache. Caching happens per CL as
    /// soon as its chunk finishes rather than waiting for the whole sweep,
    /// so a slow tail CL doesn't delay freshness for the rest.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        tile: &Tile,
        primary_expectations: &dyn Expectations,
        cl_store: &dyn ChangelistStore,
        tryjob_store: &dyn TryjobStore,
    ) -> Result<usize> {
        let mut open = cl_store.open_changelists().await?;

        let now = chrono::Utc::now();
        let cutoff = chrono::Duration::from_std(self.config.recency_cutoff).unwrap_or(chrono::Duration::zero());
        open.retain(|cl| now.signed_duration_since(cl.last_updated) <= cutoff);

        // Most-recently-active CLs are kept when the open list exceeds the
        // cap; a cap this small relative to the open count is unusual but
        // not impossible under a burst of activity.
        open.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        open.truncate(self.config.max_concurrent_cls);

        info!(count = open.len(), "refreshing changelist sub-indices");

        let mut refreshed = 0;
        for chunk in open.chunks(self.config.parallelism) {
            // Fetching each CL's patchsets/tryjob digests is I/O-bound, so
            // the chunk's members are driven concurrently via `join_all`
            // rather than one at a time — the actual DB/network round
            // trips overlap even though this stays on one task.
            let fetches = chunk.iter().map(|cl| async move {
                let patchsets = cl_store.patchsets(&cl.id).await?;
                let patchset_id = patchsets
                    .iter()
                    .max_by_key(|p| p.order)
                    .map(|p| p.id.clone())
                    .unwrap_or_else(|| cl.id.clone());
                let digests = tryjob_store.digests_for_changelist(&patchset_id).await?;
                Ok::<_, crate::error::Error>((cl.id.clone(), digests))
            });
            let fetched = futures::future::join_all(fetches).await;

            for result in fetched {
                let (cl_id, tryjob_digests) = result?;
                let sub_index = self.build_sub_index(tile, primary_expectations, &cl_id, &tryjob_digests);
                self.cache.put(cl_id, Arc::new(sub_index));
                refreshed += 1;
            }
        }

        self.refresh_stale_cached_entries(primary_expectations, &open);

        Ok(refreshed)
    }

    /// Step 5: for every cached sub-index whose CL wasn't re-fetched this
    /// cycle (e.g. evicted from the retained/capped `open` list this pass
    /// but still within the cache's own TTL), re-run the untriaged filter
    /// against the current joined expectations. This is cheap — it reuses
    /// the already-patched tile instead of re-fetching tryjob results.
    fn refresh_stale_cached_entries(&self, primary_expectations: &dyn Expectations, refreshed_this_cycle: &[crate::collaborators::ChangelistInfo]) {
        let refreshed_ids: std::collections::HashSet<&str> =
            refreshed_this_cycle.iter().map(|cl| cl.id.as_str()).collect();
        for cl_id in self.cache.keys() {
            if refreshed_ids.contains(cl_id.as_str()) {
                continue;
            }
            let Some(stale) = self.cache.get(&cl_id) else { continue };
            let cl_expectations = crate::expectations::MapExpectations::new();
            let joined = JoinedExpectations::new(primary_expectations, Some(&cl_expectations));
            let untriaged = Self::filter_untriaged(&stale.patched_tile, &joined);
            let refreshed = ChangelistSubIndex {
                cl_id: stale.cl_id.clone(),
                summary: stale.summary.clone(),
                untriaged_results: untriaged,
                patched_tile: stale.patched_tile.clone(),
            };
            self.cache.put(cl_id, Arc::new(refreshed));
        }
    }

    fn filter_untriaged(patched: &Tile, joined: &JoinedExpectations<'_>) -> FastMap<GroupKey, BTreeSet<String>> {
        let mut untriaged: FastMap<GroupKey, BTreeSet<String>> = FastMap::default();
        for (id, trace) in &patched.traces {
            let test = trace.test_name().unwrap_or("").to_string();
            let corpus = trace.corpus().unwrap_or("").to_string();
            let grouping = Grouping::new(corpus, test.clone());
            for digest in trace.digests.iter().flatten() {
                if joined.classify(&grouping, digest) == Label::Untriaged {
                    untriaged
                        .entry((test.clone(), digest.as_str().to_string()))
                        .or_default()
                        .insert(id.to_string());
                }
            }
        }
        untriaged
    }

    fn build_sub_index(
        &self,
        tile: &Tile,
        primary_expectations: &dyn Expectations,
        cl_id: &str,
        tryjob_digests: &crate::types::FastMap<String, Digest>,
    ) -> ChangelistSubIndex {
        let mut patched = tile.clone();
        for (trace_id, digest) in tryjob_digests {
            if let Some(trace) = patched.traces.get_mut(trace_id.as_str()) {
                trace.digests.push(Some(digest.clone()));
            }
        }

        let cl_expectations = crate::expectations::MapExpectations::new();
        let joined = JoinedExpectations::new(primary_expectations, Some(&cl_expectations));
        let visible = patched.exclude_ignored();
        let blamer = Blamer::build(&visible, &joined);
        let summary = SummaryMap::build(&visible, &joined, &blamer);
        let untriaged_results = Self::filter_untriaged(&patched, &joined);

        ChangelistSubIndex {
            cl_id: cl_id.to_string(),
            summary,
            untriaged_results,
            patched_tile: patched,
        }
    }
}
