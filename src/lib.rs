//! BimAtlas core: versioned IFC ingestion and bitemporal query engine.
//!
//! Parses an IFC 4.3 STEP file into product and relationship records, diffs
//! it against a branch's currently-open rows using SCD2 semantics, and
//! persists the delta into a relational store of record mirrored
//! best-effort into a property graph. Point, range, tree, diff, and
//! streaming queries are served over the same `(branch, revision)`
//! coordinate.

pub mod catalog;
pub mod config;
pub mod diff;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod lock;
pub mod model;
pub mod query;
pub mod store;
pub mod stream;
pub mod writer;

pub use catalog::Catalog;
pub use config::Config;
pub use error::{BimAtlasError, ErrorKind, Result};
pub use query::QueryLayer;
pub use store::RelationalStore;
pub use writer::{IngestionResult, RevisionWriter};

/// Initializes the global `tracing` subscriber from `RUST_LOG`, defaulting
/// to `info` when unset. Call once at process start; safe to call more than
/// once — later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
