//! arbor-core - Typed, versioned object graphs over mutable tree documents
//!
//! This crate projects a declared metamodel (namespaces, classes with
//! version ranges, named relationships) onto an [`arbor_doc::Document`] and
//! keeps the two in sync under mutation:
//! - Namespace/class registry with version-aware resolution
//! - Identity-preserving typed views ([`Element`]) over tree nodes
//! - Plain-data fields with round-trip validation
//! - Five relationship kinds (Containment, Association, Allocation,
//!   Backref, Filter) plus the Single adapter
//! - Write-coupled element lists
//! - A two-phase transactional deletion protocol that leaves no dangling
//!   references behind
//! - The [`Model`] facade with search and find-references queries

pub mod element;
pub mod errors;
pub mod fields;
pub mod list;
pub mod logging;
pub mod model;
pub mod registry;
pub mod relations;
pub mod version;

pub use element::Element;
pub use errors::{ModelError, Result};
pub use fields::{FieldDef, FieldKind, Value};
pub use list::{ElementList, Matcher};
pub use model::{Model, Reference};
pub use registry::{
    ClassId, ClassName, ClassRef, ClassSpec, Metamodel, MetamodelBuilder, Namespace, NamespaceId,
    NamespaceSpec, Property, UriMatch,
};
pub use relations::{Arg, NewObject, RelationDef, RelationKind};

pub use arbor_doc::{Document, NodeId, NodeSpec, QName};
