//! Search query options (spec §4.11).

use crate::paramset::ParamSet;

pub use crate::collaborators::DiffMetricKind as Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageFilter {
    Untriaged,
    Positive,
    Negative,
    All,
}

impl Default for TriageFilter {
    fn default() -> Self {
        TriageFilter::Untriaged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Descending
    }
}

/// `groupTestFilter` (spec §4.11): `Count` restricts each test's results to
/// only its most-frequently-observed digest(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTestFilter {
    None,
    Count,
}

impl Default for GroupTestFilter {
    fn default() -> Self {
        GroupTestFilter::None
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Restricts candidate traces to this paramset (key/value filters from
    /// the UI's search form). Empty matches everything.
    pub query: ParamSet,
    pub include_ignored: bool,
    pub triage_filter: TriageFilter,
    /// Sort digests by reference-diff metric, closest-negative distance.
    pub sort: SortOrder,
    pub offset: usize,
    pub limit: usize,

    /// `changelistID, crs`: scope to this changelist's tryjob results
    /// instead of the primary branch. Both must be set for the CL branch
    /// to take effect; `crs` alone (no id) or vice versa falls back to the
    /// primary-branch search.
    pub changelist_id: Option<String>,
    pub crs: Option<String>,
    /// If false, CL-scoped search drops digests already seen on the
    /// primary branch for the same test.
    pub include_digests_produced_on_master: bool,

    /// Only the head (last-commit) digest of each trace is considered.
    pub head: bool,
    /// Which `DiffMetrics` field drives reference-diff ranking and the
    /// post-diff numeric filters below.
    pub metric: Metric,
    /// Keys that must match, by value overlap, between the traces that
    /// produced a result's digest and the traces that produced a
    /// reference-diff candidate.
    pub match_keys: Vec<String>,
    /// Filter applied to reference-diff candidates' producing traces.
    pub right_trace_values: ParamSet,
    pub diff_max_filter: Option<f64>,
    pub rgba_min_filter: Option<u8>,
    pub rgba_max_filter: Option<u8>,
    /// Drop results with no viable closest-positive or closest-negative
    /// reference at all.
    pub must_include_reference: bool,
    /// Skip the reference-diff stage entirely.
    pub no_diff: bool,
    pub group_test_filter: GroupTestFilter,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: ParamSet) -> Self {
        self.query = query;
        self
    }

    pub fn with_triage_filter(mut self, filter: TriageFilter) -> Self {
        self.triage_filter = filter;
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn with_changelist(mut self, changelist_id: impl Into<String>, crs: impl Into<String>) -> Self {
        self.changelist_id = Some(changelist_id.into());
        self.crs = Some(crs.into());
        self
    }

    pub fn with_head(mut self, head: bool) -> Self {
        self.head = head;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_match_keys(mut self, keys: Vec<String>) -> Self {
        self.match_keys = keys;
        self
    }

    pub fn with_right_trace_values(mut self, values: ParamSet) -> Self {
        self.right_trace_values = values;
        self
    }

    pub fn with_group_test_filter(mut self, filter: GroupTestFilter) -> Self {
        self.group_test_filter = filter;
        self
    }

    pub fn with_no_diff(mut self, no_diff: bool) -> Self {
        self.no_diff = no_diff;
        self
    }

    pub fn with_diff_max_filter(mut self, max: f64) -> Self {
        self.diff_max_filter = Some(max);
        self
    }

    pub fn with_rgba_min_filter(mut self, min: u8) -> Self {
        self.rgba_min_filter = Some(min);
        self
    }

    pub fn with_rgba_max_filter(mut self, max: u8) -> Self {
        self.rgba_max_filter = Some(max);
        self
    }

    pub fn with_must_include_reference(mut self, required: bool) -> Self {
        self.must_include_reference = required;
        self
    }

    pub fn with_include_digests_produced_on_master(mut self, include: bool) -> Self {
        self.include_digests_produced_on_master = include;
        self
    }

    /// True only when both halves of the CL scope (`changelistID, crs`) are
    /// present, per spec §4.11 step 1.
    pub fn is_changelist_scoped(&self) -> bool {
        self.changelist_id.is_some() && self.crs.is_some()
    }
}
