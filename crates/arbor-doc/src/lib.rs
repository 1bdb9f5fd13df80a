//! arbor-doc - Mutable tree documents with identifier-based links
//!
//! This crate provides the document layer that the arbor object-graph sits
//! on top of:
//! - An arena-backed tree of nodes with generational handles
//! - Role tags, declared-class tags and ordered attributes per node
//! - An identifier index with `#id` link encoding and resolution
//! - Declarative subtree specs for building fixtures from JSON
//!
//! The layer is deliberately small: it knows nothing about classes,
//! relationships or versioning, and it does not parse or write any on-disk
//! format.

pub mod document;
pub mod errors;
pub mod node;

pub use document::{Document, ID_ATTR};
pub use errors::{DocError, Result};
pub use node::{NodeId, NodeSpec, QName};
