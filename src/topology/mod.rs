//! Desired topology: document parsing and the in-memory graph built from it.
//!
//! - [`document`] - the Desired State Source format
//! - [`model`] - [`TopologyModel`], an arena of entities indexed by id

mod document;
mod model;

pub use document::TopologyDocument;
pub use model::TopologyModel;
