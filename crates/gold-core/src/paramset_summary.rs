//! Per-(test, digest) ParamSet aggregation (spec §4.5): "which key/value
//! combinations produced this digest for this test", computed once per
//! tile tick and read by the search engine's result decoration step.

use crate::digest::Digest;
use crate::tile::{Tile, TileView};
use crate::paramset::ParamSet;
use crate::types::FastMap;

type Key = (String, String);

#[derive(Debug, Default, Clone)]
pub struct ParamSetSummary {
    include_ignored: FastMap<Key, ParamSet>,
    exclude_ignored: FastMap<Key, ParamSet>,
}

impl ParamSetSummary {
    pub fn build(tile: &Tile) -> Self {
        Self {
            include_ignored: Self::build_view(&tile.include_ignored()),
            exclude_ignored: Self::build_view(&tile.exclude_ignored()),
        }
    }

    fn build_view(view: &TileView<'_>) -> FastMap<Key, ParamSet> {
        let mut out: FastMap<Key, ParamSet> = FastMap::default();
        for (_, trace) in view.iter() {
            let test = trace.test_name().unwrap_or("").to_string();
            for digest in trace.digests.iter().flatten() {
                out.entry((test.clone(), digest.as_str().to_string()))
                    .or_default()
                    .add_params(&trace.params);
            }
        }
        out
    }

    /// The union of params across every trace that produced `digest` for
    /// `test`. Empty if no visible trace produced it.
    pub fn get(&self, test: &str, digest: &Digest, include_ignored: bool) -> ParamSet {
        let map = if include_ignored {
            &self.include_ignored
        } else {
            &self.exclude_ignored
        };
        map.get(&(test.to_string(), digest.as_str().to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::paramset::Params;
    use crate::tile::{IgnoreState, Trace};

    fn d(s: &str) -> Digest {
        Digest::new_unchecked(s.to_string())
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn aggregates_params_across_traces_producing_the_same_digest() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[("name", "testA"), ("os", "Android")]), vec![Some(d("aaa"))]),
        );
        tile.insert_trace(
            "t2".into(),
            Trace::new(params(&[("name", "testA"), ("os", "iOS")]), vec![Some(d("aaa"))]),
        );

        let summary = ParamSetSummary::build(&tile);
        let ps = summary.get("testA", &d("aaa"), true);
        assert_eq!(ps.get("os").unwrap().len(), 2);
    }

    #[test]
    fn exclude_ignored_skips_ignored_traces() {
        let mut tile = Tile::new(vec![]);
        let mut ignored = Trace::new(params(&[("name", "testA"), ("os", "Android")]), vec![Some(d("aaa"))]);
        ignored.ignore_state = IgnoreState::Ignored;
        tile.insert_trace("t1".into(), ignored);

        let summary = ParamSetSummary::build(&tile);
        assert!(summary.get("testA", &d("aaa"), false).is_empty());
        assert!(!summary.get("testA", &d("aaa"), true).is_empty());
    }

    #[test]
    fn unknown_test_digest_pair_is_empty() {
        let tile = Tile::new(vec![]);
        let summary = ParamSetSummary::build(&tile);
        assert!(summary.get("nope", &d("aaa"), true).is_empty());
    }
}
