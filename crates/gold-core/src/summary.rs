//! Summary Calculator (spec §4.8): per-`(corpus, test name)` triage counts,
//! kept in a `BTreeMap` so a partial rebuild (only the groupings touched by
//! an expectation change) can be merged into the full map by key without
//! disturbing the sort order the UI relies on (scenario S4).

use crate::blame::{BlameDistribution, Blamer};
use crate::digest::Digest;
use crate::expectations::{Expectations, Grouping, Label};
use crate::tile::TileView;
use crate::types::FastMap;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageStatus {
    pub pos: usize,
    pub neg: usize,
    pub untriaged: usize,
    pub un_hashes: Vec<Digest>,
    pub blame: Vec<BlameDistribution>,
}

#[derive(Debug, Default, Clone)]
pub struct SummaryMap(BTreeMap<Grouping, TriageStatus>);

impl SummaryMap {
    pub fn build(
        view: &TileView<'_>,
        expectations: &dyn Expectations,
        blamer: &Blamer,
    ) -> Self {
        let mut per_grouping_digests: BTreeMap<Grouping, FastMap<String, usize>> = BTreeMap::new();
        for (_, trace) in view.iter() {
            let grouping = Grouping::new(
                trace.corpus().unwrap_or("").to_string(),
                trace.test_name().unwrap_or("").to_string(),
            );
            let counts = per_grouping_digests.entry(grouping).or_default();
            for digest in trace.digests.iter().flatten() {
                *counts.entry(digest.as_str().to_string()).or_insert(0) += 1;
            }
        }

        let mut map = BTreeMap::new();
        for (grouping, counts) in per_grouping_digests {
            let status = Self::status_for(&grouping, &counts, expectations, blamer);
            map.insert(grouping, status);
        }
        Self(map)
    }

    fn status_for(
        grouping: &Grouping,
        counts: &FastMap<String, usize>,
        expectations: &dyn Expectations,
        blamer: &Blamer,
    ) -> TriageStatus {
        let mut status = TriageStatus::default();
        let mut digest_strs: Vec<&String> = counts.keys().collect();
        digest_strs.sort();

        for digest_str in digest_strs {
            let digest = Digest::new_unchecked(digest_str.clone());
            match expectations.classify(grouping, &digest) {
                Label::Positive => status.pos += 1,
                Label::Negative => status.neg += 1,
                Label::Untriaged => {
                    status.untriaged += 1;
                    status.un_hashes.push(digest);
                    status.blame.push(
                        blamer
                            .get_blame(&grouping.name, digest_str)
                            .cloned()
                            .unwrap_or_default(),
                    );
                }
            }
        }
        status
    }

    /// Recomputes only `groupings` (e.g. the ones touched by a triage
    /// event) and splices the results into the existing map by key,
    /// leaving every other grouping's entry untouched.
    pub fn rebuild_partial(
        &mut self,
        view: &TileView<'_>,
        groupings: &[Grouping],
        expectations: &dyn Expectations,
        blamer: &Blamer,
    ) {
        for grouping in groupings {
            let mut counts: FastMap<String, usize> = FastMap::default();
            for (_, trace) in view.iter() {
                let g = Grouping::new(
                    trace.corpus().unwrap_or("").to_string(),
                    trace.test_name().unwrap_or("").to_string(),
                );
                if &g != grouping {
                    continue;
                }
                for digest in trace.digests.iter().flatten() {
                    *counts.entry(digest.as_str().to_string()).or_insert(0) += 1;
                }
            }
            if counts.is_empty() {
                self.0.remove(grouping);
                continue;
            }
            let status = Self::status_for(grouping, &counts, expectations, blamer);
            self.0.insert(grouping.clone(), status);
        }
    }

    pub fn get(&self, grouping: &Grouping) -> Option<&TriageStatus> {
        self.0.get(grouping)
    }

    pub fn insert(&mut self, grouping: Grouping, status: TriageStatus) {
        self.0.insert(grouping, status);
    }

    /// Groupings in sorted (corpus, name) order — the order the UI paints.
    pub fn iter(&self) -> impl Iterator<Item = (&Grouping, &TriageStatus)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::expectations::MapExpectations;
    use crate::paramset::Params;
    use crate::tile::{Tile, Trace};

    fn d(s: &str) -> Digest {
        Digest::new_unchecked(s.to_string())
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn two_group_tile() -> Tile {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(
                params(&[("name", "testA"), ("source_type", "gm")]),
                vec![Some(d("pos")), Some(d("unt"))],
            ),
        );
        tile.insert_trace(
            "t2".into(),
            Trace::new(
                params(&[("name", "testB"), ("source_type", "gm")]),
                vec![Some(d("neg"))],
            ),
        );
        tile
    }

    fn expectations() -> MapExpectations {
        let mut e = MapExpectations::new();
        e.set(Grouping::new("gm", "testA"), d("pos"), Label::Positive);
        e.set(Grouping::new("gm", "testB"), d("neg"), Label::Negative);
        e
    }

    #[test]
    fn counts_triage_labels_per_grouping() {
        let tile = two_group_tile();
        let view = tile.include_ignored();
        let expectations = expectations();
        let blamer = Blamer::build(&view, &expectations);
        let summary = SummaryMap::build(&view, &expectations, &blamer);

        let a = summary.get(&Grouping::new("gm", "testA")).unwrap();
        assert_eq!(a.pos, 1);
        assert_eq!(a.untriaged, 1);
        assert_eq!(a.un_hashes, vec![d("unt")]);

        let b = summary.get(&Grouping::new("gm", "testB")).unwrap();
        assert_eq!(b.neg, 1);
        assert_eq!(b.untriaged, 0);
    }

    #[test]
    fn groupings_are_iterated_in_sorted_order() {
        let tile = two_group_tile();
        let view = tile.include_ignored();
        let expectations = expectations();
        let blamer = Blamer::build(&view, &expectations);
        let summary = SummaryMap::build(&view, &expectations, &blamer);

        let names: Vec<&str> = summary.iter().map(|(g, _)| g.name.as_str()).collect();
        assert_eq!(names, vec!["testA", "testB"]);
    }

    #[test]
    fn partial_rebuild_only_touches_named_groupings() {
        let tile = two_group_tile();
        let view = tile.include_ignored();
        let mut expectations = expectations();
        let blamer = Blamer::build(&view, &expectations);
        let mut summary = SummaryMap::build(&view, &expectations, &blamer);

        expectations.set(Grouping::new("gm", "testA"), d("unt"), Label::Positive);
        let blamer = Blamer::build(&view, &expectations);
        summary.rebuild_partial(&view, &[Grouping::new("gm", "testA")], &expectations, &blamer);

        let a = summary.get(&Grouping::new("gm", "testA")).unwrap();
        assert_eq!(a.pos, 2);
        assert_eq!(a.untriaged, 0);

        let b = summary.get(&Grouping::new("gm", "testB")).unwrap();
        assert_eq!(b.neg, 1);
    }
}
