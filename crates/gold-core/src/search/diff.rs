//! Reference-diff enrichment (spec §4.11): for an untriaged digest, finds
//! the closest already-triaged positive and negative digest by perceptual
//! distance, so the triage UI can show "looks like this known-good /
//! known-bad image" without the triager hunting for a comparison.

use crate::collaborators::{DiffMetricKind, DiffMetricSource, DiffMetrics};
use crate::digest::Digest;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    pub digest: Digest,
    pub metrics: DiffMetrics,
}

impl DiffResult {
    pub fn value(&self, metric: DiffMetricKind) -> f64 {
        self.metrics.value(metric)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceDiffs {
    pub closest_positive: Option<DiffResult>,
    pub closest_negative: Option<DiffResult>,
}

impl ReferenceDiffs {
    /// `closestRef`: `None` if neither a positive nor negative reference is
    /// viable (spec §4.11's `mustIncludeReference` check).
    pub fn has_reference(&self) -> bool {
        self.closest_positive.is_some() || self.closest_negative.is_some()
    }
}

/// Scans at most `max_candidates` of each label, keeping the smallest
/// `metric`-selected value seen, ties broken by lexicographic digest.
/// Candidate order matters only as a cap on work done, not on the result,
/// since every candidate within the cap is compared.
pub async fn compute_reference_diffs(
    target: &Digest,
    positives: &[Digest],
    negatives: &[Digest],
    metric: &dyn DiffMetricSource,
    metric_kind: DiffMetricKind,
    max_candidates: usize,
) -> Result<ReferenceDiffs> {
    Ok(ReferenceDiffs {
        closest_positive: closest(target, positives, metric, metric_kind, max_candidates).await?,
        closest_negative: closest(target, negatives, metric, metric_kind, max_candidates).await?,
    })
}

async fn closest(
    target: &Digest,
    candidates: &[Digest],
    metric: &dyn DiffMetricSource,
    metric_kind: DiffMetricKind,
    max_candidates: usize,
) -> Result<Option<DiffResult>> {
    let mut best: Option<DiffResult> = None;
    for candidate in candidates.iter().take(max_candidates) {
        let metrics = metric.metrics(target, candidate).await?;
        let value = metrics.value(metric_kind);
        let is_better = match &best {
            Some(current) => {
                let current_value = current.value(metric_kind);
                value < current_value
                    || (value == current_value && candidate.as_str() < current.digest.as_str())
            }
            None => true,
        };
        if is_better {
            best = Some(DiffResult {
                digest: candidate.clone(),
                metrics,
            });
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HammingDiffMetric;

    fn d(s: &str) -> Digest {
        Digest::new_unchecked(s.to_string())
    }

    #[tokio::test]
    async fn picks_the_smallest_distance_candidate() {
        let target = d("aaaa");
        let positives = vec![d("aaab"), d("bbbb")];
        let metric = HammingDiffMetric;
        let diffs = compute_reference_diffs(&target, &positives, &[], &metric, DiffMetricKind::Combined, 10)
            .await
            .unwrap();
        assert_eq!(diffs.closest_positive.unwrap().digest, d("aaab"));
        assert!(diffs.closest_negative.is_none());
    }

    #[tokio::test]
    async fn empty_candidate_list_yields_none() {
        let target = d("aaaa");
        let metric = HammingDiffMetric;
        let diffs = compute_reference_diffs(&target, &[], &[], &metric, DiffMetricKind::Combined, 10)
            .await
            .unwrap();
        assert!(diffs.closest_positive.is_none());
        assert!(diffs.closest_negative.is_none());
        assert!(!diffs.has_reference());
    }

    #[tokio::test]
    async fn respects_max_candidates_cap() {
        let target = d("aaaa");
        // The first candidate within the cap is worse than the one excluded
        // by the cap; the excluded one must not be considered.
        let positives = vec![d("aaab"), d("dddd")];
        let metric = HammingDiffMetric;
        let diffs = compute_reference_diffs(&target, &positives, &[], &metric, DiffMetricKind::Combined, 1)
            .await
            .unwrap();
        assert_eq!(diffs.closest_positive.unwrap().digest, d("aaab"));
    }

    #[tokio::test]
    async fn ties_break_on_lexicographic_digest() {
        // Both candidates are a single byte different from the target, so
        // their combined metric ties; "aaab" must win over "aaac".
        let target = d("aaaa");
        let positives = vec![d("aaac"), d("aaab")];
        let metric = HammingDiffMetric;
        let diffs = compute_reference_diffs(&target, &positives, &[], &metric, DiffMetricKind::Combined, 10)
            .await
            .unwrap();
        assert_eq!(diffs.closest_positive.unwrap().digest, d("aaab"));
    }
}
