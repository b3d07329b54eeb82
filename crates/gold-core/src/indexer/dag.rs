//! The dependency-DAG scheduler: a tile arrival triggers a full rebuild of
//! every derived view; an expectation change triggers a partial rebuild of
//! only the blame/summary views for the affected groupings, reusing the
//! (unchanged) tile-derived views. Readers always see a complete, internally
//! consistent `SearchIndex` via clone-then-swap — never a half-updated one.
//!
//! Grounded on the teacher's `Circuit::propagate_deltas` /
//! `process_impacted_views` (`engine/circuit.rs`): changed inputs are
//! translated into a small set of impacted derived computations, which are
//! fanned out in parallel above a size threshold and run sequentially below
//! it, then the result replaces the previous state as one unit.

use crate::blame::Blamer;
use crate::collaborators::KnownHashesSink;
use crate::config::IndexerConfig;
use crate::digest::Digest;
use crate::digest_counter::DigestCounter;
use crate::expectations::{Expectations, Grouping};
use crate::paramset_summary::ParamSetSummary;
use crate::preslice::PreSlicer;
use crate::summary::SummaryMap;
use crate::tile::Tile;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// The const above which a partial rebuild's per-grouping recompute is
/// fanned out across threads instead of run inline — mirrors the teacher's
/// `PARALLEL_VIEW_THRESHOLD`.
const PARALLEL_GROUPING_THRESHOLD: usize = 10;

/// One fully-consistent generation of every tile-derived view. Cheap to
/// clone (an `Arc` bump) so a search request holds a stable snapshot even
/// while the indexer is already computing the next one.
#[derive(Clone)]
pub struct SearchIndex {
    pub tile: Arc<Tile>,
    pub digest_counter_all: Arc<DigestCounter>,
    pub digest_counter_visible: Arc<DigestCounter>,
    pub paramset_summary: Arc<ParamSetSummary>,
    pub preslicer: Arc<PreSlicer>,
    pub blamer: Arc<Blamer>,
    pub summary: Arc<SummaryMap>,
}

impl SearchIndex {
    fn build(tile: Arc<Tile>, expectations: &dyn Expectations) -> Self {
        let visible = tile.exclude_ignored();
        let all = tile.include_ignored();

        let blamer = Blamer::build(&visible, expectations);
        let summary = SummaryMap::build(&visible, expectations, &blamer);

        Self {
            digest_counter_all: Arc::new(DigestCounter::build(&all)),
            digest_counter_visible: Arc::new(DigestCounter::build(&visible)),
            paramset_summary: Arc::new(ParamSetSummary::build(&tile)),
            preslicer: Arc::new(PreSlicer::build(&tile)),
            blamer: Arc::new(blamer),
            summary: Arc::new(summary),
            tile,
        }
    }

    fn empty() -> Self {
        Self::build(Arc::new(Tile::new(vec![])), &crate::expectations::MapExpectations::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildKind {
    Full,
    Partial,
}

/// Owns the current `SearchIndex` generation and schedules rebuilds.
pub struct Indexer {
    config: IndexerConfig,
    index: RwLock<Arc<SearchIndex>>,
    last_full_rebuild: Mutex<Option<Instant>>,
    pending_tile: Mutex<Option<Arc<Tile>>>,
    /// The `writeKnownHashes` DAG node (spec §4.9, §6 `WriteKnownDigests`):
    /// published with every full rebuild's unique digest set so the upload
    /// path can skip images Gold has already seen. A failure here is logged,
    /// not propagated — a stale known-hashes list makes uploads less
    /// efficient, not incorrect.
    known_hashes_sink: Option<Arc<dyn KnownHashesSink>>,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        Self {
            config,
            index: RwLock::new(Arc::new(SearchIndex::empty())),
            last_full_rebuild: Mutex::new(None),
            pending_tile: Mutex::new(None),
            known_hashes_sink: None,
        }
    }

    pub fn with_known_hashes_sink(mut self, sink: Arc<dyn KnownHashesSink>) -> Self {
        self.known_hashes_sink = Some(sink);
        self
    }

    pub async fn current(&self) -> Arc<SearchIndex> {
        self.index.read().await.clone()
    }

    /// A new tile arrived. If the minimum rebuild interval hasn't elapsed
    /// since the last full rebuild, the tile is stashed and supersedes any
    /// previously-stashed one (bunching: only the latest tile in a burst is
    /// ever actually indexed). Otherwise the rebuild runs immediately.
    #[instrument(skip(self, tile, expectations))]
    pub async fn on_tile_arrival(
        &self,
        tile: Tile,
        expectations: &dyn Expectations,
    ) -> RebuildKind {
        let tile = Arc::new(tile);
        let mut last = self.last_full_rebuild.lock().await;
        let elapsed_enough = last
            .map(|t| t.elapsed() >= self.config.min_rebuild_interval)
            .unwrap_or(true);

        if !elapsed_enough {
            debug!("bunching tile arrival, rebuild interval not yet elapsed");
            *self.pending_tile.lock().await = Some(tile);
            return RebuildKind::Partial;
        }

        self.do_full_rebuild(tile, expectations).await;
        *last = Some(Instant::now());
        RebuildKind::Full
    }

    /// Processes a tile stashed by bunching, if any. A caller runs this
    /// periodically (e.g. once per `min_rebuild_interval`) to drain bursts.
    pub async fn drain_pending(&self, expectations: &dyn Expectations) -> bool {
        let Some(tile) = self.pending_tile.lock().await.take() else {
            return false;
        };
        self.do_full_rebuild(tile, expectations).await;
        *self.last_full_rebuild.lock().await = Some(Instant::now());
        true
    }

    async fn do_full_rebuild(&self, tile: Arc<Tile>, expectations: &dyn Expectations) {
        info!(commits = tile.len(), traces = tile.traces.len(), "full rebuild");
        let new_index = Arc::new(SearchIndex::build(tile.clone(), expectations));
        *self.index.write().await = new_index;

        if let Some(sink) = &self.known_hashes_sink {
            let digests: Vec<Digest> = tile
                .traces
                .values()
                .flat_map(|t| t.digests.iter().flatten().cloned())
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();
            if let Err(err) = sink.publish(&digests).await {
                warn!(%err, "failed to publish known hashes");
            }
        }
    }

    /// An expectation change touched `groupings`. Reuses the current tile
    /// and its tile-derived views (digest counters, paramset summary,
    /// pre-slicer all stay the bit-identical `Arc`s); only the blame
    /// distributions and summary rows for the named groupings are
    /// recomputed, then spliced into a new `SearchIndex` generation.
    #[instrument(skip(self, expectations))]
    pub async fn on_expectation_change(
        &self,
        groupings: Vec<Grouping>,
        expectations: &dyn Expectations,
    ) -> RebuildKind {
        let current = self.current().await;
        let visible = current.tile.exclude_ignored();
        let mut summary = (*current.summary).clone();

        // Blame distributions are cheap to recompute in one pass over the
        // whole visible tile (see `Blamer::build`), so "partial" here means
        // only the named groupings' summary rows get spliced into the new
        // generation — everything else in the index stays the same `Arc`.
        // Above the parallel threshold the per-grouping splice work itself
        // is fanned out across threads.
        let blamer = Blamer::build(&visible, expectations);

        if groupings.len() >= PARALLEL_GROUPING_THRESHOLD {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;
                let partials: Vec<SummaryMap> = groupings
                    .par_iter()
                    .map(|g| {
                        let mut m = SummaryMap::default();
                        m.rebuild_partial(&visible, std::slice::from_ref(g), expectations, &blamer);
                        m
                    })
                    .collect();
                for partial in partials {
                    for (g, status) in partial.iter() {
                        summary.insert(g.clone(), status.clone());
                    }
                }
            }
            #[cfg(not(feature = "parallel"))]
            {
                summary.rebuild_partial(&visible, &groupings, expectations, &blamer);
            }
        } else {
            summary.rebuild_partial(&visible, &groupings, expectations, &blamer);
        }

        let new_index = Arc::new(SearchIndex {
            tile: current.tile.clone(),
            digest_counter_all: current.digest_counter_all.clone(),
            digest_counter_visible: current.digest_counter_visible.clone(),
            paramset_summary: current.paramset_summary.clone(),
            preslicer: current.preslicer.clone(),
            blamer: Arc::new(blamer),
            summary: Arc::new(summary),
        });
        *self.index.write().await = new_index;
        RebuildKind::Partial
    }

    pub fn min_rebuild_interval(&self) -> Duration {
        self.config.min_rebuild_interval
    }
}
