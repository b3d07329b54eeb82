//! Indexing and search core for an image-regression correctness service:
//! the ParamSet algebra, tile/trace store, digest counting, the ignore-rule
//! engine, paramset summarizer, pre-slicer, blamer, summary calculator, the
//! indexer DAG (full and partial rebuilds), changelist sub-indexing, the
//! search engine, and the trace-group builder.
//!
//! HTTP routing, auth, rate limiting, raw image storage/pixel diffing,
//! expectation-persistence transport, code-review adapter transport, tile
//! ingestion front ends, and deploy tooling are out of scope — this crate
//! is the library a service wraps, not the service itself.

pub mod blame;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod digest;
pub mod digest_counter;
pub mod error;
pub mod expectations;
pub mod ignore;
pub mod indexer;
pub mod paramset;
pub mod paramset_summary;
pub mod preslice;
pub mod search;
pub mod summary;
pub mod tile;
pub mod tracegroup;
pub mod types;

pub use digest::Digest;
pub use error::{Error, Result};
pub use expectations::{Expectations, Grouping, Label};
pub use paramset::{ParamMatcher, ParamSet, Params};
pub use tile::{CommitInfo, IgnoreState, Tile, TileView, Trace, TraceId};
