//! Pre-slicer (spec §4.6): buckets trace ids by `(ignored, corpus, test)` so
//! the search engine and summary calculator can narrow a scan to the
//! relevant bucket before falling back to a full paramset match, instead of
//! walking every trace in the tile for every query.

use crate::paramset::ParamSet;
use crate::tile::{Tile, TraceId};
use crate::types::FastMap;

type BucketKey = (bool, String, String);

#[derive(Debug, Default, Clone)]
pub struct PreSlicer {
    buckets: FastMap<BucketKey, Vec<TraceId>>,
}

impl PreSlicer {
    pub fn build(tile: &Tile) -> Self {
        let mut buckets: FastMap<BucketKey, Vec<TraceId>> = FastMap::default();
        for (id, trace) in &tile.traces {
            let key = (
                trace.ignore_state.is_ignored(),
                trace.corpus().unwrap_or("").to_string(),
                trace.test_name().unwrap_or("").to_string(),
            );
            buckets.entry(key).or_default().push(id.clone());
        }
        Self { buckets }
    }

    /// Trace ids with the given ignore state whose params satisfy `query`.
    /// When `query` pins down both `source_type` and `name`, this narrows
    /// to a single bucket before the per-trace match; otherwise it falls
    /// back to scanning every bucket with the right ignore state.
    pub fn sliced_traces(&self, tile: &Tile, ignored: bool, query: &ParamSet) -> Vec<TraceId> {
        let corpus = query.get("source_type").and_then(|v| v.first()).cloned();
        let test = query.get("name").and_then(|v| v.first()).cloned();

        let candidates: Vec<&TraceId> = match (corpus, test) {
            (Some(c), Some(t)) => self
                .buckets
                .get(&(ignored, c, t))
                .map(|ids| ids.iter().collect())
                .unwrap_or_default(),
            _ => self
                .buckets
                .iter()
                .filter(|((ig, _, _), _)| *ig == ignored)
                .flat_map(|(_, ids)| ids.iter())
                .collect(),
        };

        candidates
            .into_iter()
            .filter(|id| {
                tile.traces
                    .get(*id)
                    .map(|t| query.matches_params(&t.params))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}
