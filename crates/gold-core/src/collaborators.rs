//! Collaborator seams (spec §6): the external systems the indexer and
//! search engine depend on but this crate does not implement — tile
//! ingestion, expectation persistence, code-review adapters, image blob
//! storage. Each is a narrow `async_trait` so the core can be driven by
//! fakes in tests and the CLI, and by real adapters in a full deployment.
//!
//! Grounded on the teacher's `service.rs` trait-boundary style: traits
//! describe one collaborator each, implementations are swapped via
//! dependency injection rather than a god-object.

use crate::digest::Digest;
use crate::error::Result;
use crate::expectations::{Expectations, Grouping, Label};
use crate::tile::Tile;
use crate::types::FastMap;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Supplies the current tile snapshot. The real implementation streams
/// ingestion events off a queue; tests and the CLI hand it a fixed tile.
#[async_trait]
pub trait TileSource: Send + Sync {
    async fn current_tile(&self) -> Result<Arc<Tile>>;
}

/// A fixed tile, for tests and the CLI's "index this file once" mode.
pub struct StaticTileSource(Arc<Tile>);

impl StaticTileSource {
    pub fn new(tile: Tile) -> Self {
        Self(Arc::new(tile))
    }
}

#[async_trait]
impl TileSource for StaticTileSource {
    async fn current_tile(&self) -> Result<Arc<Tile>> {
        Ok(self.0.clone())
    }
}

/// A callback invoked when an expectation changes, so the indexer can
/// schedule a partial rebuild instead of waiting for the next full tile
/// tick (spec §4.9).
pub type ChangeListener = Box<dyn Fn(Grouping) + Send + Sync>;

/// Persists triage decisions and notifies listeners of changes.
#[async_trait]
pub trait ExpectationsStore: Expectations {
    async fn set_label(&self, grouping: Grouping, digest: Digest, label: Label) -> Result<()>;
    fn listen_for_change(&self, listener: ChangeListener);
}

#[derive(Default)]
pub struct InMemoryExpectationsStore {
    entries: Mutex<FastMap<(Grouping, Digest), Label>>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl InMemoryExpectationsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Expectations for InMemoryExpectationsStore {
    fn lookup(&self, grouping: &Grouping, digest: &Digest) -> Option<Label> {
        self.entries
            .lock()
            .expect("expectations store lock poisoned")
            .get(&(grouping.clone(), digest.clone()))
            .copied()
    }
}

#[async_trait]
impl ExpectationsStore for InMemoryExpectationsStore {
    async fn set_label(&self, grouping: Grouping, digest: Digest, label: Label) -> Result<()> {
        self.entries
            .lock()
            .expect("expectations store lock poisoned")
            .insert((grouping.clone(), digest), label);
        for listener in self.listeners.lock().expect("listener lock poisoned").iter() {
            listener(grouping.clone());
        }
        Ok(())
    }

    fn listen_for_change(&self, listener: ChangeListener) {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }
}

/// Records who triaged what and when, independent of the current label —
/// used for audit trails the search engine doesn't otherwise need.
#[async_trait]
pub trait TriageHistoryStore: Send + Sync {
    async fn record(&self, grouping: Grouping, digest: Digest, user: String) -> Result<()>;
    async fn history(&self, grouping: &Grouping, digest: &Digest) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryTriageHistoryStore {
    entries: Mutex<FastMap<(Grouping, Digest), Vec<String>>>,
}

#[async_trait]
impl TriageHistoryStore for InMemoryTriageHistoryStore {
    async fn record(&self, grouping: Grouping, digest: Digest, user: String) -> Result<()> {
        self.entries
            .lock()
            .expect("triage history lock poisoned")
            .entry((grouping, digest))
            .or_default()
            .push(user);
        Ok(())
    }

    async fn history(&self, grouping: &Grouping, digest: &Digest) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .expect("triage history lock poisoned")
            .get(&(grouping.clone(), digest.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

/// One open changelist from the code-review system.
#[derive(Debug, Clone)]
pub struct ChangelistInfo {
    pub id: String,
    pub owner: String,
    pub subject: String,
    /// Timestamp of the CL's most recent activity (upload, new patchset,
    /// tryjob completion). Drives the changelist indexer's recency cutoff
    /// (spec §4.10).
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// One patchset of a changelist, as returned by `GetPatchsets` (spec §6).
/// `order` is the patchset's 1-based sequence number; the indexer always
/// selects the highest-ordered patchset.
#[derive(Debug, Clone)]
pub struct PatchsetInfo {
    pub id: String,
    pub order: u32,
}

/// The code-review adapter seam: which CLs are open and should get a
/// sub-index (spec §4.10). A real implementation polls Gerrit/GitHub; this
/// is deliberately thin since adapter transport is a non-goal.
#[async_trait]
pub trait ChangelistStore: Send + Sync {
    async fn open_changelists(&self) -> Result<Vec<ChangelistInfo>>;
    /// Ordered patchsets for a CL. Empty if the CL (or this fake) doesn't
    /// track patchsets separately from the CL id itself.
    async fn patchsets(&self, cl_id: &str) -> Result<Vec<PatchsetInfo>>;
}

#[derive(Default)]
pub struct StaticChangelistStore {
    changelists: Vec<ChangelistInfo>,
    patchsets: FastMap<String, Vec<PatchsetInfo>>,
}

impl StaticChangelistStore {
    pub fn new(cls: Vec<ChangelistInfo>) -> Self {
        Self { changelists: cls, patchsets: FastMap::default() }
    }

    pub fn with_patchsets(mut self, cl_id: impl Into<String>, patchsets: Vec<PatchsetInfo>) -> Self {
        self.patchsets.insert(cl_id.into(), patchsets);
        self
    }
}

#[async_trait]
impl ChangelistStore for StaticChangelistStore {
    async fn open_changelists(&self) -> Result<Vec<ChangelistInfo>> {
        Ok(self.changelists.clone())
    }

    async fn patchsets(&self, cl_id: &str) -> Result<Vec<PatchsetInfo>> {
        Ok(self.patchsets.get(cl_id).cloned().unwrap_or_default())
    }
}

/// One tryjob's produced digests for a changelist, keyed by trace id.
#[async_trait]
pub trait TryjobStore: Send + Sync {
    async fn digests_for_changelist(&self, cl_id: &str) -> Result<FastMap<String, Digest>>;
}

#[derive(Default)]
pub struct StaticTryjobStore(FastMap<String, FastMap<String, Digest>>);

#[async_trait]
impl TryjobStore for StaticTryjobStore {
    async fn digests_for_changelist(&self, cl_id: &str) -> Result<FastMap<String, Digest>> {
        Ok(self.0.get(cl_id).cloned().unwrap_or_default())
    }
}

/// Which field of `DiffMetrics` drives reference-diff ranking and the
/// post-diff filters (spec §4.11 `metric` option).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMetricKind {
    Combined,
    PixelPercent,
    MaxRgba,
}

impl Default for DiffMetricKind {
    fn default() -> Self {
        DiffMetricKind::Combined
    }
}

/// One row of the `DiffMetrics(left_digest, right_digest, ...)` table (spec
/// §6): the full perceptual comparison between two digests, not a single
/// scalar, so callers can pick the field the UI asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffMetrics {
    pub num_pixels_diff: u64,
    pub percent_pixels_diff: f64,
    pub max_rgba_diffs: [u8; 4],
    pub combined_metric: f64,
    pub dimensions_differ: bool,
}

impl DiffMetrics {
    pub fn value(&self, metric: DiffMetricKind) -> f64 {
        match metric {
            DiffMetricKind::Combined => self.combined_metric,
            DiffMetricKind::PixelPercent => self.percent_pixels_diff,
            DiffMetricKind::MaxRgba => {
                self.max_rgba_diffs.iter().copied().max().unwrap_or(0) as f64
            }
        }
    }
}

/// Supplies a perceptual diff metric between two digests. Raw pixel
/// diffing is a non-goal; this seam returns the same metric shape the
/// `DiffMetrics` SQL table would, without computing it from real pixels.
#[async_trait]
pub trait DiffMetricSource: Send + Sync {
    async fn metrics(&self, left: &Digest, right: &Digest) -> Result<DiffMetrics>;
}

/// A fake metric source for tests: the pixel/RGBA fields are all derived
/// from the count of differing bytes between the two digest strings, so
/// tests get a metric that varies monotonically with how different the
/// digests are without needing real images.
#[derive(Default)]
pub struct HammingDiffMetric;

#[async_trait]
impl DiffMetricSource for HammingDiffMetric {
    async fn metrics(&self, left: &Digest, right: &Digest) -> Result<DiffMetrics> {
        if left == right {
            return Ok(DiffMetrics {
                num_pixels_diff: 0,
                percent_pixels_diff: 0.0,
                max_rgba_diffs: [0; 4],
                combined_metric: 0.0,
                dimensions_differ: false,
            });
        }
        let diffs = left
            .as_str()
            .bytes()
            .zip(right.as_str().bytes())
            .filter(|(a, b)| a != b)
            .count();
        let percent = diffs as f64 / left.as_str().len().max(1) as f64;
        let channel = diffs.min(255) as u8;
        Ok(DiffMetrics {
            num_pixels_diff: diffs as u64,
            percent_pixels_diff: percent,
            max_rgba_diffs: [channel, channel, channel, 0],
            combined_metric: percent,
            dimensions_differ: false,
        })
    }
}

/// Raw image storage is a non-goal; this seam only needs to answer
/// "does a blob for this digest exist" for completeness checks.
#[async_trait]
pub trait ImageBlobStore: Send + Sync {
    async fn exists(&self, digest: &Digest) -> Result<bool>;
}

/// A fixed set of known digests, for tests and local CLI runs where there
/// is no real blob backend behind `ImageBlobStore`.
#[derive(Default)]
pub struct InMemoryImageBlobStore {
    known: std::collections::HashSet<Digest>,
}

impl InMemoryImageBlobStore {
    pub fn new(known: impl IntoIterator<Item = Digest>) -> Self {
        Self { known: known.into_iter().collect() }
    }
}

#[async_trait]
impl ImageBlobStore for InMemoryImageBlobStore {
    async fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(self.known.contains(digest))
    }
}

#[async_trait]
pub trait KnownHashesSink: Send + Sync {
    async fn publish(&self, digests: &[Digest]) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryKnownHashesSink {
    published: Mutex<Vec<Digest>>,
}

impl InMemoryKnownHashesSink {
    pub fn published(&self) -> Vec<Digest> {
        self.published.lock().expect("known hashes sink lock poisoned").clone()
    }
}

#[async_trait]
impl KnownHashesSink for InMemoryKnownHashesSink {
    async fn publish(&self, digests: &[Digest]) -> Result<()> {
        self.published
            .lock()
            .expect("known hashes sink lock poisoned")
            .extend_from_slice(digests);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;

    #[tokio::test]
    async fn static_tile_source_returns_the_fixed_tile() {
        let source = StaticTileSource::new(Tile::new(vec![]));
        let tile = source.current_tile().await.unwrap();
        assert!(tile.is_empty());
    }

    #[tokio::test]
    async fn expectations_store_notifies_listeners_on_set_label() {
        let store = InMemoryExpectationsStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        store.listen_for_change(Box::new(move |g| seen_clone.lock().unwrap().push(g)));

        let grouping = Grouping::new("gm", "testA");
        store
            .set_label(grouping.clone(), Digest::new_unchecked("abc"), Label::Positive)
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[grouping.clone()]);
        assert_eq!(store.classify(&grouping, &Digest::new_unchecked("abc")), Label::Positive);
    }

    #[tokio::test]
    async fn triage_history_accumulates_per_pair() {
        let store = InMemoryTriageHistoryStore::default();
        let g = Grouping::new("gm", "testA");
        let d = Digest::new_unchecked("abc");
        store.record(g.clone(), d.clone(), "alice".into()).await.unwrap();
        store.record(g.clone(), d.clone(), "bob".into()).await.unwrap();
        assert_eq!(store.history(&g, &d).await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn image_blob_store_reports_only_known_digests() {
        let store = InMemoryImageBlobStore::new([Digest::new_unchecked("abc")]);
        assert!(store.exists(&Digest::new_unchecked("abc")).await.unwrap());
        assert!(!store.exists(&Digest::new_unchecked("xyz")).await.unwrap());
    }

    #[tokio::test]
    async fn hamming_diff_metric_is_zero_for_identical_digests() {
        let metric = HammingDiffMetric;
        let d = Digest::new_unchecked("abc");
        let metrics = metric.metrics(&d, &d).await.unwrap();
        assert_eq!(metrics.combined_metric, 0.0);
        assert_eq!(metrics.num_pixels_diff, 0);
    }
}
