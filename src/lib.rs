//! Stratum configuration library
//!
//! Resolves a typed configuration from ranked sources while tracking where
//! every value came from, with deferred `%function(...)` indirections and
//! schema-declared refs resolved after the first merge.

pub mod cli;
pub mod error;
pub mod format;
pub mod indirection;
pub mod logging;
pub mod manager;
pub mod reference;
pub mod schema;
pub mod sources;
pub mod tree;
