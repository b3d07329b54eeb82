//! The tile: a read-only snapshot of `{traceID -> Trace}` over a sliding
//! window of the most recent commits, plus commit metadata and a
//! tile-wide ParamSet union.

use crate::digest::Digest;
use crate::paramset::{ParamSet, Params};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

pub type TraceId = SmolStr;

/// Whether a trace is currently known to match an ignore rule. `Unknown`
/// means the flag has not been stamped yet (e.g. a brand-new trace before
/// the ignore engine's next restamp pass).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreState {
    Ignored,
    NotIgnored,
    Unknown,
}

impl IgnoreState {
    pub fn is_ignored(self) -> bool {
        matches!(self, IgnoreState::Ignored)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub time: chrono::DateTime<chrono::Utc>,
    pub author: String,
    pub subject: String,
}

/// One trace: a time-ordered sequence of digest slots (one per commit in
/// the window), the trace's identity params, and a cached ignore flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub params: Params,
    pub digests: Vec<Option<Digest>>,
    pub ignore_state: IgnoreState,
}

impl Trace {
    pub fn new(params: Params, digests: Vec<Option<Digest>>) -> Self {
        Self {
            params,
            digests,
            ignore_state: IgnoreState::Unknown,
        }
    }

    /// The last non-missing digest, i.e. the most recent observation.
    pub fn at_head(&self) -> Option<&Digest> {
        self.digests.iter().rev().find_map(|d| d.as_ref())
    }

    pub fn test_name(&self) -> Option<&str> {
        self.params.get("name").map(String::as_str)
    }

    pub fn corpus(&self) -> Option<&str> {
        self.params.get("source_type").map(String::as_str)
    }

    /// Index of the last commit slot holding a digest, if any.
    pub fn last_commit_index(&self) -> Option<usize> {
        self.digests.iter().rposition(|d| d.is_some())
    }

    /// Index of the first commit slot holding a digest, if any.
    pub fn first_commit_index(&self) -> Option<usize> {
        self.digests.iter().position(|d| d.is_some())
    }

    pub fn param_set(&self) -> ParamSet {
        ParamSet::from_params(&self.params)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tile {
    pub traces: BTreeMap<TraceId, Trace>,
    pub commits: Vec<CommitInfo>,
    pub param_set: ParamSet,
}

impl Tile {
    pub fn new(commits: Vec<CommitInfo>) -> Self {
        Self {
            traces: BTreeMap::new(),
            commits,
            param_set: ParamSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn insert_trace(&mut self, id: TraceId, trace: Trace) {
        self.param_set.add_params(&trace.params);
        self.traces.insert(id, trace);
    }

    /// Highest commit index with any data across any trace.
    pub fn last_commit_index(&self) -> Option<usize> {
        self.traces
            .values()
            .filter_map(Trace::last_commit_index)
            .max()
    }

    pub fn include_ignored(&self) -> TileView<'_> {
        TileView::new(self, true)
    }

    pub fn exclude_ignored(&self) -> TileView<'_> {
        TileView::new(self, false)
    }
}

/// A filtered view over a tile: either every trace (`include_ignored`) or
/// every trace whose ignore flag is not `true` (`exclude_ignored`).
#[derive(Clone, Copy)]
pub struct TileView<'t> {
    tile: &'t Tile,
    include_ignored: bool,
}

impl<'t> TileView<'t> {
    fn new(tile: &'t Tile, include_ignored: bool) -> Self {
        Self {
            tile,
            include_ignored,
        }
    }

    fn visible(&self, trace: &Trace) -> bool {
        self.include_ignored || !trace.ignore_state.is_ignored()
    }

    pub fn tile(&self) -> &'t Tile {
        self.tile
    }

    pub fn commits(&self) -> &'t [CommitInfo] {
        &self.tile.commits
    }

    pub fn get(&self, id: &str) -> Option<&'t Trace> {
        self.tile
            .traces
            .get(id)
            .filter(|t| self.visible(t))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'t TraceId, &'t Trace)> {
        let include_ignored = self.include_ignored;
        self.tile
            .traces
            .iter()
            .filter(move |(_, t)| include_ignored || !t.ignore_state.is_ignored())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn param_set(&self) -> ParamSet {
        let mut ps = ParamSet::new();
        for (_, t) in self.iter() {
            ps.add_params(&t.params);
        }
        ps
    }

    pub fn last_commit_index(&self) -> Option<usize> {
        self.iter().filter_map(|(_, t)| t.last_commit_index()).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(hex: &str) -> Digest {
        Digest::new_unchecked(hex.to_string())
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn at_head_skips_trailing_missing_slots() {
        let trace = Trace::new(
            params(&[("name", "test_a")]),
            vec![Some(digest("a")), None],
        );
        assert_eq!(trace.at_head().unwrap().as_str(), "a");
    }

    #[test]
    fn exclude_ignored_view_removes_flagged_traces() {
        let mut tile = Tile::new(vec![]);
        let mut ignored = Trace::new(params(&[("model", "Sailfish")]), vec![Some(digest("a"))]);
        ignored.ignore_state = IgnoreState::Ignored;
        let kept = Trace::new(params(&[("model", "Bullhead")]), vec![Some(digest("b"))]);
        tile.insert_trace("t1".into(), ignored);
        tile.insert_trace("t2".into(), kept);

        assert_eq!(tile.include_ignored().len(), 2);
        assert_eq!(tile.exclude_ignored().len(), 1);
        assert!(tile.exclude_ignored().get("t1").is_none());
        assert!(tile.exclude_ignored().get("t2").is_some());
    }

    #[test]
    fn last_commit_index_is_the_max_across_traces() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[]), vec![Some(digest("a")), None, None]),
        );
        tile.insert_trace(
            "t2".into(),
            Trace::new(params(&[]), vec![None, Some(digest("b")), None]),
        );
        assert_eq!(tile.last_commit_index(), Some(1));
    }
}
