//! Graph Client component (§4.4): best-effort property-graph mirror of the
//! relational source of truth, reached only through parameter-safe query
//! text built here — nothing upstream ever formats graph query text itself.

pub mod client;
pub mod fake;

pub use client::{Direction, GraphClient, GraphExecutor, GraphRow, GraphValue, RelationEntry, SpatialNode};
pub use fake::FakeGraphExecutor;
