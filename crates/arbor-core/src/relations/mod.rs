//! Relationship accessors.
//!
//! Each relationship a class declares is a value of [`RelationDef`]: a wire
//! encoding ([`RelationKind`]) plus list options. All reads produce an
//! [`ElementList`](crate::list::ElementList) scoped to the owner; writes diff
//! against the current members. The two-phase deletion protocol talks to
//! relationships through [`RelationDef::prepare_purge`], which returns a
//! [`PreparedPurge`] to be committed after the deletion target is detached.

mod allocation;
mod association;
mod backref;
mod containment;
mod filter;

use arbor_doc::NodeId;

use crate::element::Element;
use crate::errors::{ModelError, Result};
use crate::fields::Value;
use crate::list::{Coupling, ElementList};
use crate::model::Model;
use crate::registry::{ClassId, ClassName, Property};

/// Wire encoding of a relationship.
#[derive(Debug, Clone)]
pub enum RelationKind {
    /// The owner directly parents the target nodes under a role tag
    Containment(Containment),
    /// The owner stores an ordered identifier-link list in its own attribute
    Association(Association),
    /// An auxiliary link node, owned by the owner, carries the link
    Allocation(Allocation),
    /// Derived reverse relationship, computed by scanning
    Backref(Backref),
    /// Another relationship's list narrowed to a subclass
    Filter(Filter),
    /// Adapter collapsing a multi-valued relationship to its first element
    Single {
        wrapped: Box<RelationKind>,
        enforce: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Containment {
    pub role_tag: String,
    pub class: ClassName,
    /// Lowercased creation hints mapped to concrete classes
    pub type_hints: Vec<(String, ClassName)>,
}

#[derive(Debug, Clone)]
pub struct Association {
    pub attr: String,
    pub class: ClassName,
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub tag: String,
    pub alloc_type: ClassName,
    pub attr: String,
    pub backattr: Option<String>,
    pub class: ClassName,
    pub unique: bool,
}

#[derive(Debug, Clone)]
pub struct Backref {
    pub class: ClassName,
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Filter {
    /// Name of the wrapped relationship on the same class
    pub attr: String,
    pub class: ClassName,
}

impl RelationKind {
    /// Whether this kind physically stores references and supports writes.
    pub fn is_writable_storage(&self) -> bool {
        matches!(
            self,
            RelationKind::Containment(_)
                | RelationKind::Association(_)
                | RelationKind::Allocation(_)
        )
    }

    /// Strip the Single adapter, if any.
    pub fn storage(&self) -> &RelationKind {
        match self {
            RelationKind::Single { wrapped, .. } => wrapped,
            other => other,
        }
    }
}

/// A relationship declaration: kind plus list behavior.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub kind: RelationKind,
    pub mapkey: Option<String>,
    pub mapvalue: Option<String>,
    /// Non-zero keeps the coupled list at exactly this length
    pub fixed_length: usize,
    /// Attribute used by `create_singleattr`
    pub single_attr: Option<String>,
}

impl RelationDef {
    pub fn containment(role_tag: impl Into<String>, class: ClassName) -> Self {
        Self::of(RelationKind::Containment(Containment {
            role_tag: role_tag.into(),
            class,
            type_hints: Vec::new(),
        }))
    }

    pub fn association(attr: impl Into<String>, class: ClassName) -> Self {
        Self::of(RelationKind::Association(Association {
            attr: attr.into(),
            class,
        }))
    }

    pub fn allocation(
        tag: impl Into<String>,
        alloc_type: ClassName,
        attr: impl Into<String>,
        class: ClassName,
    ) -> Self {
        Self::of(RelationKind::Allocation(Allocation {
            tag: tag.into(),
            alloc_type,
            attr: attr.into(),
            backattr: None,
            class,
            unique: true,
        }))
    }

    pub fn backref(class: ClassName, attrs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::of(RelationKind::Backref(Backref {
            class,
            attrs: attrs.into_iter().map(Into::into).collect(),
        }))
    }

    pub fn filter(attr: impl Into<String>, class: ClassName) -> Self {
        Self::of(RelationKind::Filter(Filter {
            attr: attr.into(),
            class,
        }))
    }

    /// Wrap this relationship in a Single adapter.
    pub fn single(mut self) -> Self {
        self.kind = RelationKind::Single {
            wrapped: Box::new(self.kind),
            enforce: false,
        };
        self
    }

    /// Wrap in a Single adapter that raises `MissingValue` when empty.
    pub fn single_enforced(mut self) -> Self {
        self.kind = RelationKind::Single {
            wrapped: Box::new(self.kind),
            enforce: true,
        };
        self
    }

    fn of(kind: RelationKind) -> Self {
        Self {
            kind,
            mapkey: None,
            mapvalue: None,
            fixed_length: 0,
            single_attr: None,
        }
    }

    pub fn with_mapkey(mut self, key: impl Into<String>) -> Self {
        self.mapkey = Some(key.into());
        self
    }

    pub fn with_mapvalue(mut self, value: impl Into<String>) -> Self {
        self.mapvalue = Some(value.into());
        self
    }

    pub fn with_fixed_length(mut self, length: usize) -> Self {
        self.fixed_length = length;
        self
    }

    pub fn with_single_attr(mut self, attr: impl Into<String>) -> Self {
        self.single_attr = Some(attr.into());
        self
    }

    /// Relax the uniqueness constraint of an Allocation.
    pub fn non_unique(mut self) -> Self {
        if let RelationKind::Allocation(alloc) = &mut self.kind {
            alloc.unique = false;
        }
        self
    }

    /// Store a back-link to the owner on an Allocation's link nodes.
    pub fn with_backattr(mut self, attr: impl Into<String>) -> Self {
        if let RelationKind::Allocation(alloc) = &mut self.kind {
            alloc.backattr = Some(attr.into());
        }
        self
    }

    /// Register a creation type hint for a Containment.
    pub fn type_hint(mut self, hint: impl Into<String>, class: ClassName) -> Self {
        if let RelationKind::Containment(cont) = &mut self.kind {
            cont.type_hints
                .push((hint.into().to_lowercase(), class));
        }
        self
    }

    pub fn is_single(&self) -> bool {
        matches!(self.kind, RelationKind::Single { .. })
    }

    /// Read the relationship into a scoped element list.
    pub(crate) fn read(
        &self,
        model: &Model,
        owner: NodeId,
        owner_class: ClassId,
        name: &str,
    ) -> Result<ElementList> {
        let nodes = self.read_nodes(model, owner, owner_class)?;
        let elemclass = match self.kind.storage() {
            RelationKind::Containment(c) => model.resolve_class_name(&c.class).ok(),
            RelationKind::Association(a) => model.resolve_class_name(&a.class).ok(),
            RelationKind::Allocation(a) => model.resolve_class_name(&a.class).ok(),
            RelationKind::Filter(f) => model.resolve_class_name(&f.class).ok(),
            RelationKind::Backref(_) => None,
            RelationKind::Single { .. } => unreachable!("storage() strips Single"),
        };
        let coupling = if self.kind.storage().is_writable_storage()
            || matches!(self.kind.storage(), RelationKind::Filter(_))
        {
            Some(Coupling {
                owner,
                owner_class,
                relation: name.to_string(),
                fixed_length: self.fixed_length,
            })
        } else {
            None
        };
        Ok(ElementList::with_options(
            model.clone(),
            nodes,
            elemclass,
            self.mapkey.clone(),
            self.mapvalue.clone(),
            coupling,
        ))
    }

    pub(crate) fn read_nodes(
        &self,
        model: &Model,
        owner: NodeId,
        owner_class: ClassId,
    ) -> Result<Vec<NodeId>> {
        match self.kind.storage() {
            RelationKind::Containment(c) => containment::read(model, owner, c),
            RelationKind::Association(a) => association::read(model, owner, a),
            RelationKind::Allocation(a) => allocation::read(model, owner, a),
            RelationKind::Backref(b) => backref::read(model, owner, b),
            RelationKind::Filter(f) => filter::read(model, owner, owner_class, f),
            RelationKind::Single { .. } => unreachable!("storage() strips Single"),
        }
    }

    /// Overwrite the whole member list.
    ///
    /// New members are inserted, absent ones removed, and the relative order
    /// of kept members follows `values`.
    pub(crate) fn set(
        &self,
        model: &Model,
        owner: NodeId,
        owner_class: ClassId,
        name: &str,
        values: &[Element],
    ) -> Result<()> {
        if self.fixed_length != 0 && values.len() != self.fixed_length {
            return Err(ModelError::invalid(format!(
                "List must stay at length {}, got {} values",
                self.fixed_length,
                values.len()
            )));
        }
        for value in values {
            if !value.same_model(model) {
                return Err(ModelError::invalid(
                    "Cannot insert elements from a different model",
                ));
            }
        }
        match self.kind.storage() {
            RelationKind::Containment(c) => containment::set(model, owner, c, values),
            RelationKind::Association(a) => association::set(model, owner, a, values),
            RelationKind::Allocation(a) => allocation::set(model, owner, name, a, values),
            RelationKind::Filter(f) => filter::set(model, owner, owner_class, f, values),
            RelationKind::Backref(_) => Err(ModelError::invalid(format!(
                "{name:?} is a derived back-reference and cannot be written"
            ))),
            RelationKind::Single { .. } => unreachable!("storage() strips Single"),
        }
    }

    /// Insert one member so it appears at `index` on the next read.
    pub(crate) fn insert(
        &self,
        model: &Model,
        owner: NodeId,
        owner_class: ClassId,
        name: &str,
        index: usize,
        value: InsertValue,
        bounds: &[ClassName],
    ) -> Result<Element> {
        if let InsertValue::Existing(element) = &value {
            if !element.same_model(model) {
                return Err(ModelError::invalid(
                    "Cannot insert elements from a different model",
                ));
            }
        }
        match self.kind.storage() {
            RelationKind::Containment(c) => {
                containment::insert(model, owner, c, index, value, bounds)
            }
            RelationKind::Association(a) => {
                association::insert(model, owner, a, index, value, bounds)
            }
            RelationKind::Allocation(a) => {
                allocation::insert(model, owner, name, a, index, value, bounds)
            }
            RelationKind::Filter(f) => {
                filter::insert(model, owner, owner_class, f, index, value, bounds)
            }
            RelationKind::Backref(_) => Err(ModelError::invalid(format!(
                "{name:?} is a derived back-reference and cannot be written"
            ))),
            RelationKind::Single { .. } => unreachable!("storage() strips Single"),
        }
    }

    /// Remove one member from the relationship.
    ///
    /// For Containment this deletes the element from the model entirely,
    /// running the referential-integrity protocol.
    pub(crate) fn remove_member(
        &self,
        model: &Model,
        owner: NodeId,
        owner_class: ClassId,
        name: &str,
        target: &Element,
    ) -> Result<()> {
        match self.kind.storage() {
            RelationKind::Containment(_) => model.delete(target),
            RelationKind::Association(a) => association::remove(model, owner, a, target),
            RelationKind::Allocation(a) => allocation::remove(model, owner, a, target),
            RelationKind::Filter(f) => filter::remove(model, owner, owner_class, f, target),
            RelationKind::Backref(_) => Err(ModelError::invalid(format!(
                "{name:?} is a derived back-reference and cannot be written"
            ))),
            RelationKind::Single { .. } => unreachable!("storage() strips Single"),
        }
    }

    /// Discovery phase of the deletion protocol.
    ///
    /// Inspects how this relationship on `owner` references `target` and
    /// records what must be undone once the target is detached. Nothing is
    /// mutated here; an error aborts the whole deletion.
    pub(crate) fn prepare_purge(
        &self,
        model: &Model,
        owner: NodeId,
        owner_class: ClassId,
        name: &str,
        target: NodeId,
    ) -> Result<Option<PreparedPurge>> {
        let fixed_length_guard = || -> Result<()> {
            if self.fixed_length != 0 {
                return Err(ModelError::invalid(format!(
                    "Purging a reference from {name:?} would leave fewer than {} members",
                    self.fixed_length
                )));
            }
            Ok(())
        };
        let action = match self.kind.storage() {
            // The owner parents the target directly; detaching the subtree
            // is the whole purge.
            RelationKind::Containment(_) | RelationKind::Backref(_) => None,
            RelationKind::Association(a) => {
                fixed_length_guard()?;
                Some(PurgeAction::RewriteLinks {
                    attr: a.attr.clone(),
                })
            }
            RelationKind::Allocation(a) => {
                let refs = allocation::refs_to(model, owner, a, target)?;
                if refs.is_empty() {
                    None
                } else {
                    fixed_length_guard()?;
                    Some(PurgeAction::DropRefNodes(refs))
                }
            }
            RelationKind::Filter(f) => {
                return filter::prepare_purge(model, owner, owner_class, f, target);
            }
            RelationKind::Single { .. } => unreachable!("storage() strips Single"),
        };
        Ok(action.map(|action| PreparedPurge {
            owner,
            relation: name.to_string(),
            action,
        }))
    }
}

/// A creation marker: materialized into a concrete element on insert.
#[derive(Debug, Clone, Default)]
pub struct NewObject {
    pub type_hint: String,
    /// Wanted identifier; a fresh one is generated when absent
    pub id: Option<String>,
    pub fields: Vec<(String, Arg)>,
}

impl NewObject {
    pub fn new(type_hint: impl Into<String>) -> Self {
        Self {
            type_hint: type_hint.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.fields.push((name.into(), arg.into()));
        self
    }
}

/// An initialization argument for a new object.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Ref(Element),
    Refs(Vec<Element>),
}

macro_rules! arg_from_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Arg::Value(v.into())
            }
        })*
    };
}

arg_from_value!(Value, &str, String, bool, i64, f64);

impl From<Element> for Arg {
    fn from(v: Element) -> Self {
        Arg::Ref(v)
    }
}

impl From<&Element> for Arg {
    fn from(v: &Element) -> Self {
        Arg::Ref(v.clone())
    }
}

impl From<Vec<Element>> for Arg {
    fn from(v: Vec<Element>) -> Self {
        Arg::Refs(v)
    }
}

/// A member being inserted: an existing element or a creation marker.
#[derive(Debug, Clone)]
pub enum InsertValue {
    Existing(Element),
    New(NewObject),
}

/// The recorded undo step for one (owner, relationship) reference.
///
/// Produced by the discovery phase; committed after the deletion target has
/// been detached. Commit failures are reported by the orchestrator, never
/// raised.
#[derive(Debug)]
pub struct PreparedPurge {
    pub(crate) owner: NodeId,
    pub(crate) relation: String,
    pub(crate) action: PurgeAction,
}

#[derive(Debug)]
pub(crate) enum PurgeAction {
    /// Drop these auxiliary link nodes (Allocation)
    DropRefNodes(Vec<NodeId>),
    /// Re-serialize the identifier-link attribute from its surviving
    /// targets (Association)
    RewriteLinks { attr: String },
}

impl PreparedPurge {
    /// Apply the recorded undo step.
    pub(crate) fn commit(&self, model: &Model) -> Result<()> {
        match &self.action {
            PurgeAction::DropRefNodes(refs) => {
                for &refnode in refs {
                    let mut doc = model.doc_mut();
                    doc.detach(refnode)?;
                    doc.free_subtree(refnode)?;
                }
                Ok(())
            }
            PurgeAction::RewriteLinks { attr } => {
                association::rewrite_links(model, self.owner, attr)
            }
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_builders() {
        let class = ClassName::new(crate::registry::NamespaceId(0), "Widget");
        let rel = RelationDef::containment("ownedParts", class.clone())
            .with_mapkey("name")
            .with_fixed_length(2)
            .type_hint("Cog", class.clone());
        assert_eq!(rel.fixed_length, 2);
        let RelationKind::Containment(cont) = &rel.kind else {
            panic!("expected a containment");
        };
        assert_eq!(cont.type_hints[0].0, "cog");

        let single = RelationDef::association("target", class).single_enforced();
        assert!(single.is_single());
        assert!(single.kind.storage().is_writable_storage());
    }

    #[test]
    fn test_new_object_builder() {
        let marker = NewObject::new("Gadget")
            .with_id("fixed-id")
            .set("name", "g1")
            .set("teeth", 3i64);
        assert_eq!(marker.type_hint, "Gadget");
        assert_eq!(marker.id.as_deref(), Some("fixed-id"));
        assert_eq!(marker.fields.len(), 2);
        assert!(matches!(marker.fields[1].1, Arg::Value(Value::Int(3))));
    }
}

/// Look up a relationship property, failing on fields and unknown names.
pub(crate) fn relation_on<'a>(
    model: &'a Model,
    class: ClassId,
    name: &str,
) -> Result<&'a RelationDef> {
    match model.metamodel().property(class, name) {
        Some(Property::Relation(rel)) => Ok(rel),
        Some(Property::Field(_)) => Err(ModelError::invalid(format!(
            "{name:?} is a plain field, not a relationship"
        ))),
        None => Err(ModelError::UnknownAttribute {
            class: model.metamodel().qualname(class),
            attr: name.to_string(),
        }),
    }
}
