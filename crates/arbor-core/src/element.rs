//! Typed objects: stateless views pairing a model handle with one tree node.
//!
//! An [`Element`] holds no data of its own; every read re-derives from the
//! underlying node, and equality is node identity. Elements are cheap to
//! clone and never own the node they wrap.

use std::fmt;

use arbor_doc::{DocError, NodeId};

use crate::errors::{ModelError, Result};
use crate::fields::Value;
use crate::list::ElementList;
use crate::model::Model;
use crate::registry::{ClassId, Property};
use crate::relations::{relation_on, RelationKind};

/// A typed view over one tree node.
#[derive(Clone)]
pub struct Element {
    model: Model,
    node: NodeId,
}

impl Element {
    pub(crate) fn new(model: Model, node: NodeId) -> Self {
        Self { model, node }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The underlying tree node. Opaque, but usable as an identity token.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn same_model(&self, other: &Model) -> bool {
        self.model.ptr_eq(other)
    }

    /// The unique identifier of this element.
    pub fn id(&self) -> Result<String> {
        self.model
            .doc()
            .id_of(self.node)?
            .map(str::to_string)
            .ok_or_else(|| {
                DocError::MissingIdentifier {
                    node: self.node.to_string(),
                }
                .into()
            })
    }

    /// The declared class, resolved through the registry on every call.
    pub fn class(&self) -> Result<ClassId> {
        self.model.class_of(self.node)
    }

    /// The local name of the declared class.
    pub fn classname(&self) -> Result<String> {
        Ok(self
            .model
            .metamodel()
            .class(self.class()?)
            .name
            .clone())
    }

    /// Subtype check against another class.
    pub fn is_instance(&self, class: ClassId) -> Result<bool> {
        Ok(self.model.metamodel().is_subclass(self.class()?, class))
    }

    /// The element wrapping the parent node, if any.
    pub fn parent(&self) -> Result<Option<Element>> {
        match self.model.doc().parent_of(self.node)? {
            Some(parent) => Ok(Some(Element::new(self.model.clone(), parent))),
            None => Ok(None),
        }
    }

    /// Read a plain-data field.
    pub fn field(&self, name: &str) -> Result<Value> {
        match self.lookup(name)? {
            Property::Field(def) => def.read(&self.model.doc(), self.node),
            Property::Relation(_) => Err(ModelError::invalid(format!(
                "{name:?} is a relationship, not a plain field"
            ))),
        }
    }

    /// Write a plain-data field.
    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.lookup(name)? {
            Property::Field(def) => {
                let def = def.clone();
                def.write(&mut self.model.doc_mut(), self.node, value.into())
            }
            Property::Relation(_) => Err(ModelError::invalid(format!(
                "{name:?} is a relationship, not a plain field"
            ))),
        }
    }

    /// Read a relationship into a scoped element list.
    ///
    /// For Single-wrapped relationships this returns the full wrapped list;
    /// use [`Element::single`] for the collapsed view.
    pub fn relation(&self, name: &str) -> Result<ElementList> {
        let class = self.class()?;
        let rel = relation_on(&self.model, class, name)?;
        rel.read(&self.model, self.node, class, name)
    }

    /// Overwrite a relationship's member list.
    pub fn set_relation(&self, name: &str, values: &[Element]) -> Result<()> {
        let class = self.class()?;
        let rel = relation_on(&self.model, class, name)?;
        rel.set(&self.model, self.node, class, name, values)
    }

    /// Read a Single-wrapped relationship: its first member, or None.
    ///
    /// An enforced Single raises `MissingValue` instead of returning None.
    pub fn single(&self, name: &str) -> Result<Option<Element>> {
        let class = self.class()?;
        let rel = relation_on(&self.model, class, name)?;
        let RelationKind::Single { enforce, .. } = &rel.kind else {
            return Err(ModelError::invalid(format!(
                "{name:?} is not a single-valued relationship"
            )));
        };
        let enforce = *enforce;
        let list = rel.read(&self.model, self.node, class, name)?;
        match list.get(0) {
            Some(element) => Ok(Some(element)),
            None if enforce => Err(ModelError::MissingValue {
                owner: self.to_string(),
                attr: name.to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Write a Single-wrapped relationship.
    ///
    /// Clearing an enforced Single is an invalid modification.
    pub fn set_single(&self, name: &str, value: Option<&Element>) -> Result<()> {
        let class = self.class()?;
        let rel = relation_on(&self.model, class, name)?;
        let RelationKind::Single { enforce, .. } = &rel.kind else {
            return Err(ModelError::invalid(format!(
                "{name:?} is not a single-valued relationship"
            )));
        };
        let enforce = *enforce;
        match value {
            Some(element) => {
                rel.set(&self.model, self.node, class, name, &[element.clone()])
            }
            None if enforce => Err(ModelError::invalid(format!(
                "Cannot clear required attribute {name:?} on {self}"
            ))),
            None => rel.set(&self.model, self.node, class, name, &[]),
        }
    }

    /// Generic property read, used by list filters and back-references.
    pub(crate) fn property_read(&self, name: &str) -> Result<ReadValue> {
        let class = self.class()?;
        match self.model.metamodel().property(class, name) {
            Some(Property::Field(def)) => {
                Ok(ReadValue::Scalar(def.read(&self.model.doc(), self.node)?))
            }
            Some(Property::Relation(rel)) => {
                if rel.is_single() {
                    Ok(ReadValue::Single(self.single(name)?))
                } else {
                    Ok(ReadValue::Many(rel.read(
                        &self.model,
                        self.node,
                        class,
                        name,
                    )?))
                }
            }
            None => Err(ModelError::UnknownAttribute {
                class: self.model.metamodel().qualname(class),
                attr: name.to_string(),
            }),
        }
    }

    fn lookup(&self, name: &str) -> Result<Property> {
        let class = self.class()?;
        self.model
            .metamodel()
            .property(class, name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownAttribute {
                class: self.model.metamodel().qualname(class),
                attr: name.to_string(),
            })
    }
}

/// The result of a generic property read.
pub(crate) enum ReadValue {
    Scalar(Value),
    Single(Option<Element>),
    Many(ElementList),
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.model.ptr_eq(&other.model) && self.node == other.node
    }
}

impl Eq for Element {}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.class().ok();
        let classname = match class {
            Some(class) => self.model.metamodel().qualname(class),
            None => "element".to_string(),
        };
        // Only plain name fields are rendered; anything fancier could
        // recurse back into Display through error construction.
        let is_name_field = class.is_some_and(|c| {
            matches!(
                self.model.metamodel().property(c, "name"),
                Some(Property::Field(_))
            )
        });
        let name = match is_name_field.then(|| self.field("name")) {
            Some(Ok(Value::Str(name))) if !name.is_empty() => format!(" {name:?}"),
            _ => String::new(),
        };
        let id = self
            .model
            .doc()
            .id_of(self.node)
            .ok()
            .flatten()
            .map(str::to_string)
            .unwrap_or_else(|| self.node.to_string());
        write!(f, "<{classname}{name} ({id})>")
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({self})")
    }
}
