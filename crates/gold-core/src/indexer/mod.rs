//! Indexer DAG scheduler (spec §4.9) and changelist sub-indexing (§4.10).

mod changelist;
mod dag;

pub use changelist::{ChangelistIndexer, ChangelistSubIndex};
pub use dag::{Indexer, RebuildKind, SearchIndex};
