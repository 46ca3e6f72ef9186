//! Storage Schema component (§4.0 table in spec.md §2, §6).

pub mod relational;

pub use relational::RelationalStore;
