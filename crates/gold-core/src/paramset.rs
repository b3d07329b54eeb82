//! The ParamSet algebra: an immutable-by-convention key -> values bag used
//! both as trace identity (`Params`, one value per key) and as a
//! triage-grouping descriptor (`ParamSet`, many values per key).
//!
//! ParamSet value lists are typically short (under 50 entries), so every
//! operation here does a linear scan rather than keeping the lists sorted
//! or hashed — for lists this small, a linear scan beats the bookkeeping
//! a binary search or hash set would need.

use indexmap::IndexMap;
use std::collections::BTreeMap;

/// A single trace's identity: one value per key.
pub type Params = BTreeMap<String, String>;

/// Key -> deduplicated, insertion-ordered sequence of values.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParamSet(IndexMap<String, Vec<String>>);

impl ParamSet {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn from_params(p: &Params) -> Self {
        let mut ps = Self::new();
        ps.add_params(p);
        ps
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Appends each key/value pair in `p`, skipping a value already present
    /// for that key. Creates the key's list as needed.
    pub fn add_params(&mut self, p: &Params) {
        for (k, v) in p {
            let list = self.0.entry(k.clone()).or_default();
            if !list.iter().any(|existing| existing == v) {
                list.push(v.clone());
            }
        }
    }

    /// Set-union per key; insertion order of newly-seen values is preserved
    /// after existing values.
    pub fn add_param_set(&mut self, other: &ParamSet) {
        for (k, values) in &other.0 {
            let list = self.0.entry(k.clone()).or_default();
            for v in values {
                if !list.iter().any(|existing| existing == v) {
                    list.push(v.clone());
                }
            }
        }
    }

    /// True if for every key in `self`, `other` has the same key with at
    /// least one overlapping value. A missing key in `other` fails the
    /// match. A receiver with no keys always matches (vacuously true).
    ///
    /// This direction is asymmetric: `other` may carry extra keys `self`
    /// doesn't mention — those are irrelevant to the match. Callers that
    /// need trace keys to match a rule's paramset call `rule.matches(trace)`,
    /// never the other way around.
    pub fn matches(&self, other: &ParamSet) -> bool {
        self.0.iter().all(|(k, values)| match other.0.get(k) {
            Some(other_values) => values.iter().any(|v| other_values.contains(v)),
            None => false,
        })
    }

    /// Like `matches`, but against a single-valued `Params` bag instead of
    /// another ParamSet: every key in `self` must appear in `p` with a value
    /// contained in `self`'s value list for that key.
    pub fn matches_params(&self, p: &Params) -> bool {
        self.0.iter().all(|(k, values)| match p.get(k) {
            Some(v) => values.contains(v),
            None => false,
        })
    }

    /// Sorts each value list lexicographically in place.
    pub fn normalize(&mut self) {
        for values in self.0.values_mut() {
            values.sort_unstable();
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Deep copy; mutating the result never affects `self`.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// URL-encoded `key=value&key=value2` form, one pair per value. Callers
    /// that need determinism should `normalize()` first — see
    /// `ignore::query_codec` for the round-trip contract.
    pub fn to_query_string(&self) -> String {
        let mut out = String::new();
        for (k, values) in &self.0 {
            for v in values {
                if !out.is_empty() {
                    out.push('&');
                }
                out.push_str(&urlencode(k));
                out.push('=');
                out.push_str(&urlencode(v));
            }
        }
        out
    }

    pub fn from_query_string(s: &str) -> Self {
        let mut ps = ParamSet::new();
        if s.is_empty() {
            return ps;
        }
        for pair in s.split('&') {
            if pair.is_empty() {
                continue;
            }
            let mut it = pair.splitn(2, '=');
            let k = urldecode(it.next().unwrap_or(""));
            let v = urldecode(it.next().unwrap_or(""));
            let list = ps.0.entry(k).or_default();
            if !list.iter().any(|existing| existing == &v) {
                list.push(v);
            }
        }
        ps
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(
                    std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                    16,
                ) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// An ordered sequence of ParamSets, matched as "any of".
#[derive(Clone, Debug, Default)]
pub struct ParamMatcher(pub Vec<ParamSet>);

impl ParamMatcher {
    pub fn new(sets: Vec<ParamSet>) -> Self {
        Self(sets)
    }

    pub fn match_any(&self, p: &ParamSet) -> bool {
        self.0.iter().any(|rule| rule.matches(p))
    }
}
