//! Small shared type aliases, grounded on the teacher's `FastMap`/`ZSet`
//! convention: an `FxHashMap` in place of the stdlib's SipHash-backed map
//! for the many small, hot, internally-keyed maps this crate builds per
//! tile tick.

use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

pub type FastMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;
