//! The model facade: root object over a document plus a frozen metamodel.
//!
//! A [`Model`] is a cheap handle (`Rc` internally) over the shared mutable
//! document and the immutable metamodel. It owns the viewpoint-activation
//! state, the search and find-references queries, and the two-phase deletion
//! protocol.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use semver::Version;
use tracing::{debug, error, warn};

use arbor_doc::{Document, NodeId, QName};

use crate::element::Element;
use crate::errors::{ModelError, Result};
use crate::list::ElementList;
use crate::registry::{ClassId, ClassName, ClassRef, Metamodel, NamespaceId, Property};
use crate::relations::{PreparedPurge, RelationKind};
use crate::version::{format_version, parse_version};

/// One reference to a target: the owning element, the relationship name,
/// and the position within the relationship's list (None for single-valued
/// relationships).
#[derive(Debug, Clone)]
pub struct Reference {
    pub owner: Element,
    pub attr: String,
    pub index: Option<usize>,
}

struct ModelInner {
    metamodel: Arc<Metamodel>,
    doc: RefCell<Document>,
    viewpoints: RefCell<HashMap<String, Version>>,
}

/// High-level handle to a loaded model.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

impl Model {
    pub fn new(metamodel: Arc<Metamodel>, document: Document) -> Self {
        Self {
            inner: Rc::new(ModelInner {
                metamodel,
                doc: RefCell::new(document),
                viewpoints: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.inner.metamodel
    }

    /// Read access to the underlying document.
    pub fn document(&self) -> Ref<'_, Document> {
        self.inner.doc.borrow()
    }

    pub(crate) fn doc(&self) -> Ref<'_, Document> {
        self.inner.doc.borrow()
    }

    pub(crate) fn doc_mut(&self) -> RefMut<'_, Document> {
        self.inner.doc.borrow_mut()
    }

    /// Whether two handles refer to the same model.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ===== Identity wrapper =====

    /// Wrap a tree node as a typed object.
    ///
    /// The returned element shares the node's identity: wrapping the same
    /// node twice yields equal elements. Class resolution is re-derived on
    /// every read, so this is O(1) and never caches.
    pub fn wrap(&self, node: NodeId) -> Result<Element> {
        self.doc().tag(node)?;
        Ok(Element::new(self.clone(), node))
    }

    /// Wrap a node, verifying it is compatible with the expected class.
    pub fn wrap_as(&self, node: NodeId, expected: ClassId) -> Result<Element> {
        let declared = self.class_of(node)?;
        if !self.metamodel().is_subclass(declared, expected) {
            return Err(ModelError::ClassMismatch {
                requested: self.metamodel().qualname(expected),
                declared: self.metamodel().qualname(declared),
            });
        }
        Ok(Element::new(self.clone(), node))
    }

    /// The element wrapping the document root.
    pub fn root(&self) -> Result<Element> {
        let root = self.doc().root();
        self.wrap(root)
    }

    /// Find an element anywhere in the model by its identifier.
    pub fn by_id(&self, id: &str) -> Result<Element> {
        let node = self
            .doc()
            .node_by_id(id)
            .ok_or_else(|| ModelError::ElementNotFound {
                key: id.to_string(),
            })?;
        self.wrap(node)
    }

    // ===== Class resolution =====

    /// Resolve the declared class of a tree node.
    ///
    /// Nodes without a declared class resolve to the hierarchy root. The
    /// version embedded in the node's namespace URI wins over the activated
    /// viewpoint version.
    pub fn class_of(&self, node: NodeId) -> Result<ClassId> {
        let qtype = self.doc().qtype(node)?.cloned();
        let Some(qtype) = qtype else {
            return Ok(self.metamodel().root());
        };
        let (ns, uri_version) = self.metamodel().find_namespace_by_uri(&qtype.ns_uri)?;
        let version = uri_version.or_else(|| self.version_context(ns));
        self.metamodel().get_class(ns, &qtype.name, version.as_ref())
    }

    /// Like [`Model::class_of`], but an incomplete metamodel degrades to the
    /// hierarchy root with a warning instead of failing.
    pub(crate) fn class_of_lenient(&self, node: NodeId) -> ClassId {
        match self.class_of(node) {
            Ok(class) => class,
            Err(err) => {
                warn!(%err, "current metamodel is incomplete");
                self.metamodel().root()
            }
        }
    }

    /// Resolve a class reference, version-aware.
    pub fn resolve_class(&self, class: impl Into<ClassRef>) -> Result<ClassId> {
        match class.into() {
            ClassRef::Resolved(name) => self.resolve_class_name(&name),
            ClassRef::Qualified { ns, name } => {
                let mm = self.metamodel();
                if let Ok(nsid) = mm.find_namespace(&ns) {
                    return self.resolve_in(nsid, &name, None);
                }
                let (nsid, uri_version) = mm.find_namespace_by_uri(&ns)?;
                self.resolve_in(nsid, &name, uri_version)
            }
            ClassRef::Unqualified(name) => {
                let mm = self.metamodel();
                let candidates: Vec<NamespaceId> = mm
                    .namespaces()
                    .map(|(id, _)| id)
                    .filter(|&id| mm.contains_class(id, &name))
                    .collect();
                match candidates.as_slice() {
                    [] => Err(ModelError::MissingClass {
                        namespace: "(any)".to_string(),
                        name,
                        version: None,
                    }),
                    [ns] => self.resolve_in(*ns, &name, None),
                    many => Err(ModelError::AmbiguousClassName {
                        name,
                        namespaces: many
                            .iter()
                            .map(|&id| mm.namespace(id).alias.clone())
                            .collect(),
                    }),
                }
            }
        }
    }

    /// Resolve a fully qualified class name at the active version.
    pub fn resolve_class_name(&self, name: &ClassName) -> Result<ClassId> {
        self.resolve_in(name.ns, &name.name, None)
    }

    fn resolve_in(
        &self,
        ns: NamespaceId,
        name: &str,
        version: Option<Version>,
    ) -> Result<ClassId> {
        let version = version.or_else(|| self.version_context(ns));
        self.metamodel().get_class(ns, name, version.as_ref())
    }

    /// The concrete, versioned qualified name for a class name.
    pub fn qualify_classname(&self, name: &ClassName) -> Result<QName> {
        let ns = self.metamodel().namespace(name.ns);
        let uri = ns.versioned_uri(self.version_context(name.ns).as_ref())?;
        Ok(QName::new(uri, name.name.clone()))
    }

    /// The version to use for a namespace: the activated viewpoint version
    /// trimmed to the namespace precision, else the namespace maximum.
    pub(crate) fn version_context(&self, ns: NamespaceId) -> Option<Version> {
        let nsdef = self.metamodel().namespace(ns);
        if !nsdef.is_versioned() {
            return None;
        }
        if let Some(viewpoint) = &nsdef.viewpoint {
            if let Some(version) = self.inner.viewpoints.borrow().get(viewpoint) {
                return Some(nsdef.trim_version(version));
            }
        }
        nsdef.maxver.clone()
    }

    // ===== Viewpoints =====

    /// Record the effective version of a viewpoint for this model.
    ///
    /// Activation is idempotent; re-activating with a different version is
    /// an error, as is a version beyond what a namespace supports.
    pub fn activate_viewpoint(&self, name: &str, version: &str) -> Result<()> {
        let parsed = parse_version(version)?;
        if let Some(active) = self.inner.viewpoints.borrow().get(name) {
            if *active == parsed {
                return Ok(());
            }
            return Err(ModelError::invalid(format!(
                "Viewpoint {name:?} is already activated at version {}",
                format_version(active)
            )));
        }

        for (_, nsdef) in self.metamodel().namespaces() {
            if nsdef.viewpoint.as_deref() != Some(name) {
                continue;
            }
            if let Some(maxver) = &nsdef.maxver {
                if nsdef.trim_version(&parsed) > *maxver {
                    return Err(ModelError::UnsupportedVersion {
                        viewpoint: name.to_string(),
                        version: format_version(&parsed),
                        maxver: format_version(maxver),
                    });
                }
            }
        }

        self.inner
            .viewpoints
            .borrow_mut()
            .insert(name.to_string(), parsed);
        Ok(())
    }

    /// The activated viewpoints and their versions, sorted by name.
    pub fn referenced_viewpoints(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .inner
            .viewpoints
            .borrow()
            .iter()
            .map(|(name, version)| (name.clone(), format_version(version)))
            .collect();
        out.sort();
        out
    }

    // ===== Queries =====

    /// All elements whose resolved class subtypes any of the given classes.
    ///
    /// With no classes, every element with a declared class matches. With
    /// `below`, only descendants of that element are considered. The result
    /// is in document order and deduplicated by identity.
    pub fn search<I, R>(&self, classes: I, below: Option<&Element>) -> Result<ElementList>
    where
        I: IntoIterator<Item = R>,
        R: Into<ClassRef>,
    {
        let mut targets = Vec::new();
        for class in classes {
            targets.push(self.resolve_class(class)?);
        }
        let nodes = self.search_nodes(&targets, below.map(Element::node))?;
        let elemclass = match targets.as_slice() {
            [single] => Some(*single),
            _ => None,
        };
        Ok(ElementList::detached(self.clone(), nodes, elemclass))
    }

    /// Search without a class constraint: every typed element.
    pub fn search_all(&self, below: Option<&Element>) -> Result<ElementList> {
        let nodes = self.search_nodes(&[], below.map(Element::node))?;
        Ok(ElementList::detached(self.clone(), nodes, None))
    }

    /// All nodes of one resolved class, used by derived relationships.
    pub(crate) fn nodes_of_class(
        &self,
        class: ClassId,
        below: Option<NodeId>,
    ) -> Result<Vec<NodeId>> {
        self.search_nodes(&[class], below)
    }

    fn search_nodes(&self, targets: &[ClassId], below: Option<NodeId>) -> Result<Vec<NodeId>> {
        let candidates: Vec<NodeId> = {
            let doc = self.doc();
            let start = below.unwrap_or_else(|| doc.root());
            let mut nodes = doc.typed_descendants(start)?;
            if below.is_none() && doc.qtype(start)?.is_some() {
                nodes.insert(0, start);
            }
            nodes
        };

        let mut out = Vec::new();
        for node in candidates {
            let class = match self.class_of(node) {
                Ok(class) => class,
                Err(err) => {
                    debug!(%err, "skipping unresolvable element in search");
                    continue;
                }
            };
            if targets.is_empty()
                || targets
                    .iter()
                    .any(|&t| self.metamodel().is_subclass(class, t))
            {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Every (owner, relationship, index) that references the identified
    /// element. Unknown identifiers yield an empty result.
    ///
    /// Only stored references are reported: derived relationships (Backref,
    /// Filter) are views over storage and excluded. Single-valued
    /// relationships report no index.
    pub fn find_references(&self, id: &str) -> Result<Vec<Reference>> {
        let Some(target) = self.doc().node_by_id(id) else {
            return Ok(Vec::new());
        };
        Ok(self
            .references_to_node(target)?
            .into_iter()
            .map(|(owner, attr, index)| Reference {
                owner: Element::new(self.clone(), owner),
                attr,
                index,
            })
            .collect())
    }

    /// Convenience overload of [`Model::find_references`] for an element.
    pub fn references_to(&self, target: &Element) -> Result<Vec<Reference>> {
        self.find_references(&target.id()?)
    }

    fn references_to_node(&self, target: NodeId) -> Result<Vec<(NodeId, String, Option<usize>)>> {
        let Some(id) = self.doc().id_of(target)?.map(str::to_string) else {
            return Ok(Vec::new());
        };
        let needle = format!("#{id}");

        // Prefilter: owners whose own attributes, or whose children's
        // attributes (auxiliary link nodes), mention the identifier. The
        // substring test can over-match on identifier prefixes; the
        // relationship reads below make the final call.
        let candidates: Vec<NodeId> = {
            let doc = self.doc();
            let mentions = |node: NodeId| -> bool {
                doc.attributes(node)
                    .map(|attrs| attrs.iter().any(|(_, v)| v.contains(&needle)))
                    .unwrap_or(false)
            };
            doc.preorder(doc.root())?
                .into_iter()
                .filter(|&node| {
                    mentions(node)
                        || doc
                            .children(node)
                            .map(|children| children.iter().any(|&c| mentions(c)))
                            .unwrap_or(false)
                })
                .collect()
        };

        let mm = self.metamodel().clone();
        let mut out = Vec::new();
        for owner in candidates {
            let Ok(class) = self.class_of(owner) else {
                continue;
            };
            for (name, prop) in mm.properties(class) {
                let Property::Relation(rel) = prop else {
                    continue;
                };
                if matches!(
                    rel.kind,
                    RelationKind::Backref(_) | RelationKind::Filter(_)
                ) {
                    continue;
                }
                // A read that fails (e.g. over an unrelated broken link)
                // simply contributes no reference.
                let Ok(nodes) = rel.read_nodes(self, owner, class) else {
                    continue;
                };
                if let Some(position) = nodes.iter().position(|&n| n == target) {
                    let index = if rel.is_single() { None } else { Some(position) };
                    out.push((owner, name.to_string(), index));
                }
            }
        }
        Ok(out)
    }

    // ===== Deletion =====

    /// Delete an element and its whole subtree from the model.
    ///
    /// Runs the two-phase referential-integrity protocol: first every
    /// inbound reference to the subtree is discovered and a purge prepared
    /// (any failure aborts the deletion with nothing changed); then the
    /// subtree is detached and the purges commit independently, with
    /// individual failures logged rather than raised.
    pub fn delete(&self, element: &Element) -> Result<()> {
        let node = element.node();
        {
            let doc = self.doc();
            doc.tag(node)?;
            if node == doc.root() {
                return Err(ModelError::invalid("Cannot delete the model root"));
            }
            if doc.parent_of(node)?.is_none() {
                return Err(ModelError::invalid(
                    "Element is not attached to the model",
                ));
            }
        }

        // Discovery: nothing mutates until every purge has been prepared.
        let subtree: Vec<NodeId> = {
            let doc = self.doc();
            doc.preorder(node)?
                .into_iter()
                .filter(|&n| matches!(doc.id_of(n), Ok(Some(_))))
                .collect()
        };
        let mm = self.metamodel().clone();
        let mut prepared: Vec<PreparedPurge> = Vec::new();
        for &doomed in &subtree {
            for (owner, attr, _) in self.references_to_node(doomed)? {
                let Ok(class) = self.class_of(owner) else {
                    continue;
                };
                let Some(Property::Relation(rel)) = mm.property(class, &attr) else {
                    continue;
                };
                if let Some(purge) = rel.prepare_purge(self, owner, class, &attr, doomed)? {
                    prepared.push(purge);
                }
            }
        }

        // Commit: detach the subtree, then apply the purges independently.
        {
            let mut doc = self.doc_mut();
            doc.unindex_subtree(node)?;
            doc.detach(node)?;
        }
        for purge in prepared {
            if let Err(err) = purge.commit(self) {
                error!(
                    owner = %purge.owner(),
                    relation = purge.relation(),
                    %err,
                    "could not purge a dangling reference"
                );
            }
        }
        self.doc_mut().free_subtree(node)?;
        Ok(())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("metamodel", &self.inner.metamodel)
            .field("nodes", &self.inner.doc.borrow().len())
            .finish()
    }
}
