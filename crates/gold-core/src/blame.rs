//! Blamer (spec §4.7): assigns a commit-range blame distribution to every
//! untriaged `(test, digest)` pair so triagers can see which commits likely
//! introduced a regression before a human has looked at it.

use crate::expectations::{Expectations, Grouping, Label};
use crate::tile::TileView;
use crate::types::FastMap;

type Key = (String, String);

/// How likely each commit in the tile's window is to be the cause of an
/// untriaged digest. `freq[i]` counts transitions-into-this-digest whose
/// blame range includes commit `i`. `old` is set when at least one trace's
/// first occurrence of the digest coincides with the start of the tile's
/// window, meaning the regression may predate the window and the range
/// can't be narrowed further.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlameDistribution {
    pub freq: Vec<usize>,
    pub old: bool,
}

impl BlameDistribution {
    fn new(len: usize) -> Self {
        Self {
            freq: vec![0; len],
            old: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Blamer {
    distributions: FastMap<Key, BlameDistribution>,
}

impl Blamer {
    /// Walks every trace's digest sequence once, recording a blame range
    /// for every transition into a digest that is currently untriaged for
    /// that trace's grouping.
    pub fn build(view: &TileView<'_>, expectations: &dyn Expectations) -> Self {
        let mut distributions: FastMap<Key, BlameDistribution> = FastMap::default();

        for (_, trace) in view.iter() {
            let test = trace.test_name().unwrap_or("").to_string();
            let corpus = trace.corpus().unwrap_or("").to_string();
            let grouping = Grouping::new(corpus, test.clone());
            // The window length is the trace's own digest-slot count, not the
            // tile's `commits` metadata — tests (and some production tiles)
            // populate traces without a parallel `commits` vector.
            let window_len = trace.digests.len();

            let mut prev_index: Option<usize> = None;
            let mut prev_digest_str: Option<String> = None;

            for (i, slot) in trace.digests.iter().enumerate() {
                let Some(digest) = slot else { continue };
                let is_transition = prev_digest_str.as_deref() != Some(digest.as_str());

                if is_transition && expectations.classify(&grouping, digest) == Label::Untriaged {
                    let key = (test.clone(), digest.as_str().to_string());
                    let dist = distributions
                        .entry(key)
                        .or_insert_with(|| BlameDistribution::new(window_len));

                    let range_start = prev_index.map(|p| p + 1).unwrap_or(0);
                    if prev_index.is_none() {
                        dist.old = true;
                    }
                    for c in dist.freq.iter_mut().take(i + 1).skip(range_start) {
                        *c += 1;
                    }
                }

                prev_index = Some(i);
                prev_digest_str = Some(digest.as_str().to_string());
            }
        }

        Self { distributions }
    }

    pub fn get_blame(&self, test: &str, digest: &str) -> Option<&BlameDistribution> {
        self.distributions.get(&(test.to_string(), digest.to_string()))
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

    #[test]
    fn blame_range_excludes_the_last_known_good_commit() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(
                params(&[("name", "testA"), ("source_type", "gm")]),
                vec![Some(d("good")), Some(d("good")), Some(d("bad"))],
            ),
        );
        let view = tile.include_ignored();
        let expectations = MapExpectations::new();
        let blamer = Blamer::build(&view, &expectations);

        let dist = blamer.get_blame("testA", "bad").unwrap();
        assert_eq!(dist.freq, vec![0, 0, 1]);
        assert!(!dist.old);
    }

    #[test]
    fn no_prior_digest_marks_the_distribution_old() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[("name", "testA"), ("source_type", "gm")]), vec![Some(d("bad"))]),
        );
        let view = tile.include_ignored();
        let expectations = MapExpectations::new();
        let blamer = Blamer::build(&view, &expectations);

        let dist = blamer.get_blame("testA", "bad").unwrap();
        assert!(dist.old);
        assert_eq!(dist.freq, vec![1]);
    }

    #[test]
    fn triaged_digests_produce_no_blame_entry() {
        let mut tile = Tile::new(vec![]);
        tile.insert_trace(
            "t1".into(),
            Trace::new(params(&[("name", "testA"), ("source_type", "gm")]), vec![Some(d("ok"))]),
        );
        let view = tile.include_ignored();
        let mut expectations = MapExpectations::new();
        expectations.set(
            crate::expectations::Grouping::new("gm", "testA"),
            d("ok"),
            Label::Positive,
        );
        let blamer = Blamer::build(&view, &expectations);
        assert!(blamer.get_blame("testA", "ok").is_none());
    }
}
