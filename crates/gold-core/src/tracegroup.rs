//! Trace Group Builder (spec §4.12): assigns each distinct digest in a
//! trace a small integer index for the dot-plot UI, so the frontend can
//! color dots without shipping full digest strings per commit.
//!
//! Slot assignment, in priority order:
//!   0       — the primary digest (the reference image), if present
//!   1..=3   — up to 3 other distinct digests, most-recently-seen first
//!   4..=7   — further distinct digests, most-frequent first, until 8
//!             digests total have a dedicated slot
//!   8       — every remaining distinct digest, bucketed together (grey)
//!   -1      — commit slots with no digest at all
//!
//! At most 9 slots are ever used (0 through 8), matching the UI's fixed
//! palette size.

use crate::digest::Digest;
use crate::tile::Trace;
use crate::types::FastMap;

const MAX_DEDICATED_SLOTS: usize = 8;
const GREY_BUCKET_INDEX: i32 = 8;
const MISSING_INDEX: i32 = -1;

#[derive(Debug, Clone, Default)]
pub struct TraceGroup {
    /// One entry per commit slot: the digest's assigned index, or -1.
    pub indices: Vec<i32>,
    /// Digest -> assigned slot index, for rendering a legend.
    pub digest_index: FastMap<String, i32>,
}

pub fn build_trace_group(trace: &Trace, primary: Option<&Digest>) -> TraceGroup {
    let mut digest_index: FastMap<String, i32> = FastMap::default();
    let mut next_slot = 0i32;

    if let Some(primary) = primary {
        if trace.digests.iter().flatten().any(|d| d == primary) {
            digest_index.insert(primary.as_str().to_string(), 0);
            next_slot = 1;
        }
    }

    let mut last_seen_at: FastMap<String, usize> = FastMap::default();
    let mut frequency: FastMap<String, usize> = FastMap::default();
    for (i, slot) in trace.digests.iter().enumerate() {
        if let Some(d) = slot {
            let key = d.as_str().to_string();
            if digest_index.contains_key(&key) {
                continue;
            }
            last_seen_at.insert(key.clone(), i);
            *frequency.entry(key).or_insert(0) += 1;
        }
    }

    let mut by_recency: Vec<&String> = last_seen_at.keys().collect();
    by_recency.sort_by(|a, b| last_seen_at[*b].cmp(&last_seen_at[*a]));

    let recent_cap = (next_slot as usize) + 3;
    for key in by_recency.iter().take(3) {
        if digest_index.len() >= recent_cap {
            break;
        }
        digest_index.insert((*key).clone(), next_slot);
        next_slot += 1;
    }

    let mut by_frequency: Vec<&String> = frequency
        .keys()
        .filter(|k| !digest_index.contains_key(*k))
        .collect();
    by_frequency.sort_by(|a, b| frequency[*b].cmp(&frequency[*a]).then_with(|| a.cmp(b)));

    for key in by_frequency {
        if digest_index.len() >= MAX_DEDICATED_SLOTS {
            break;
        }
        digest_index.insert(key.clone(), next_slot);
        next_slot += 1;
    }

    let indices = trace
        .digests
        .iter()
        .map(|slot| match slot {
            None => MISSING_INDEX,
            Some(d) => *digest_index
                .get(d.as_str())
                .unwrap_or(&GREY_BUCKET_INDEX),
        })
        .collect();

    TraceGroup {
        indices,
        digest_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paramset::Params;

    fn d(s: &str) -> Digest {
        Digest::new_unchecked(s.to_string())
    }

    fn params() -> Params {
        Params::new()
    }

    #[test]
    fn primary_digest_always_gets_slot_zero() {
        let trace = Trace::new(params(), vec![Some(d("primary")), Some(d("other"))]);
        let group = build_trace_group(&trace, Some(&d("primary")));
        assert_eq!(group.digest_index["primary"], 0);
        assert_eq!(group.indices[0], 0);
    }

    #[test]
    fn missing_slots_are_sentinel_minus_one() {
        let trace = Trace::new(params(), vec![None, Some(d("a"))]);
        let group = build_trace_group(&trace, None);
        assert_eq!(group.indices[0], -1);
    }

    #[test]
    fn overflow_digests_land_in_the_grey_bucket() {
        let digests: Vec<Option<Digest>> = (0..12).map(|i| Some(d(&format!("d{i}")))).collect();
        let trace = Trace::new(params(), digests);
        let group = build_trace_group(&trace, None);
        let distinct_dedicated = group.digest_index.values().filter(|&&v| v != GREY_BUCKET_INDEX).count();
        assert!(distinct_dedicated <= MAX_DEDICATED_SLOTS);
        assert!(group.indices.iter().any(|&i| i == GREY_BUCKET_INDEX));
    }

    #[test]
    fn recent_digests_are_prioritized_over_older_ones() {
        let trace = Trace::new(
            params(),
            vec![Some(d("old")), Some(d("old")), Some(d("recent"))],
        );
        let group = build_trace_group(&trace, None);
        assert_eq!(group.digest_index["recent"], 0);
        assert_eq!(group.digest_index["old"], 1);
    }
}
