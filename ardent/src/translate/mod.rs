//! Translation of the query model into backend languages.
//!
//! * [`sql`]: SQL text with dialect-specific placeholders.
//! * [`filter`]: filter trees for document stores.
//! * [`lucene`]: Lucene query and sort strings for search services.
//!
//! All three fold where-conditions the same way, left to right (see
//! [`fold_conditions`](crate::query::fold_conditions)), and reject what
//! they cannot express before any backend is contacted.

pub mod filter;
pub mod lucene;
pub mod sql;
