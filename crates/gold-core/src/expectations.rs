//! Expectations: the partial function `(grouping, digest) -> {positive,
//! negative, untriaged}` that humans populate through triage. CL-level
//! expectations join on top of primary-branch expectations, overriding
//! them for the same (grouping, digest).

use crate::digest::Digest;
use crate::types::FastMap;
use serde::{Deserialize, Serialize};

/// The subset of trace-key dimensions used to partition triage decisions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grouping {
    pub corpus: String,
    pub name: String,
}

impl Grouping {
    pub fn new(corpus: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            corpus: corpus.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Positive,
    Negative,
    Untriaged,
}

impl Label {
    pub fn as_char(self) -> char {
        match self {
            Label::Positive => 'p',
            Label::Negative => 'n',
            Label::Untriaged => 'u',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'p' => Some(Label::Positive),
            'n' => Some(Label::Negative),
            'u' => Some(Label::Untriaged),
            _ => None,
        }
    }
}

/// A classifier over (grouping, digest) pairs. `lookup` returns `None` when
/// no expectation has been recorded — callers that just want a label
/// default that to `Untriaged` via `classify`; callers joining two
/// classifiers (CL over primary) need to tell "explicitly untriaged" apart
/// from "no entry at all", which is what makes `lookup` the right seam to
/// implement rather than `classify` directly.
pub trait Expectations: Send + Sync {
    fn lookup(&self, grouping: &Grouping, digest: &Digest) -> Option<Label>;

    fn classify(&self, grouping: &Grouping, digest: &Digest) -> Label {
        self.lookup(grouping, digest).unwrap_or(Label::Untriaged)
    }
}

/// A simple in-memory expectations store, keyed by (grouping, digest).
#[derive(Debug, Default, Clone)]
pub struct MapExpectations {
    entries: FastMap<(Grouping, Digest), Label>,
}

impl MapExpectations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, grouping: Grouping, digest: Digest, label: Label) {
        self.entries.insert((grouping, digest), label);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Expectations for MapExpectations {
    fn lookup(&self, grouping: &Grouping, digest: &Digest) -> Option<Label> {
        self.entries.get(&(grouping.clone(), digest.clone())).copied()
    }
}

/// CL-scoped expectations joined over primary-branch expectations: the CL
/// side wins whenever it has an explicit entry for a (grouping, digest).
pub struct JoinedExpectations<'a> {
    pub primary: &'a dyn Expectations,
    pub changelist: Option<&'a dyn Expectations>,
}

impl<'a> JoinedExpectations<'a> {
    pub fn new(primary: &'a dyn Expectations, changelist: Option<&'a dyn Expectations>) -> Self {
        Self { primary, changelist }
    }
}

impl<'a> Expectations for JoinedExpectations<'a> {
    fn lookup(&self, grouping: &Grouping, digest: &Digest) -> Option<Label> {
        if let Some(cl) = self.changelist {
            if let Some(label) = cl.lookup(grouping, digest) {
                return Some(label);
            }
        }
        self.primary.lookup(grouping, digest)
    }
}
