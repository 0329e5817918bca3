//! Multi-attribute linear-hashed file organization for relational
//! tuples: insertion and partial-match retrieval on any subset of a
//! tuple's fixed, comma-joined string attributes, reading as few
//! pages as possible.
//!
//! Five pieces, leaves first: bit utilities (`bits`), the page layout
//! and file-backed page store (`page`, `store`), the choice vector and
//! hash composer (`chvec`), the linear-hash directory (`reln`), and
//! the partial-match query planner (`query`).

pub mod bits;
pub mod chvec;
pub mod error;
pub mod page;
pub mod query;
pub mod reln;
pub mod store;
pub mod tuple;

pub use error::{Error, Result};
pub use page::NO_PAGE;
pub use query::{start_query, Cursor};
pub use reln::{PageStats, Relation};
