//! Element lists: the ordered, lazily materialized collections returned by
//! relationships and searches.
//!
//! A list is *detached* (read-only view with filtering, mapping and set
//! algebra) or *coupled* to an (owner, relationship) pair, which additionally
//! allows inserting, deleting and creating members. A coupled list refreshes
//! itself after every mutation, so it always equals what re-reading the
//! relationship would produce.

use std::ops::{Add, Sub};

use arbor_doc::NodeId;

use crate::element::{Element, ReadValue};
use crate::errors::{ModelError, Result};
use crate::fields::Value;
use crate::model::Model;
use crate::registry::ClassId;
use crate::relations::{relation_on, InsertValue, NewObject};

/// Binding of a list to the relationship it was read from.
#[derive(Debug, Clone)]
pub(crate) struct Coupling {
    pub owner: NodeId,
    pub owner_class: ClassId,
    pub relation: String,
    pub fixed_length: usize,
}

/// An ordered collection of elements.
#[derive(Clone)]
pub struct ElementList {
    model: Model,
    nodes: Vec<NodeId>,
    elemclass: Option<ClassId>,
    mapkey: Option<String>,
    mapvalue: Option<String>,
    coupling: Option<Coupling>,
}

impl ElementList {
    pub(crate) fn detached(model: Model, nodes: Vec<NodeId>, elemclass: Option<ClassId>) -> Self {
        Self::with_options(model, nodes, elemclass, None, None, None)
    }

    pub(crate) fn with_options(
        model: Model,
        nodes: Vec<NodeId>,
        elemclass: Option<ClassId>,
        mapkey: Option<String>,
        mapvalue: Option<String>,
        coupling: Option<Coupling>,
    ) -> Self {
        Self {
            model,
            nodes,
            elemclass,
            mapkey,
            mapvalue,
            coupling,
        }
    }

    /// A detached copy of this list with different members.
    fn derived(&self, nodes: Vec<NodeId>) -> Self {
        Self {
            model: self.model.clone(),
            nodes,
            elemclass: self.elemclass,
            mapkey: self.mapkey.clone(),
            mapvalue: self.mapvalue.clone(),
            coupling: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_coupled(&self) -> bool {
        self.coupling.is_some()
    }

    pub fn get(&self, index: usize) -> Option<Element> {
        self.nodes
            .get(index)
            .map(|&n| Element::new(self.model.clone(), n))
    }

    /// Index with negative-from-the-end support.
    pub fn at(&self, index: isize) -> Option<Element> {
        let index = if index < 0 {
            self.nodes.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        self.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = Element> + '_ {
        self.nodes
            .iter()
            .map(|&n| Element::new(self.model.clone(), n))
    }

    pub fn to_vec(&self) -> Vec<Element> {
        self.iter().collect()
    }

    pub fn contains(&self, element: &Element) -> bool {
        element.same_model(&self.model) && self.nodes.contains(&element.node())
    }

    pub fn index_of(&self, element: &Element) -> Option<usize> {
        if !element.same_model(&self.model) {
            return None;
        }
        self.nodes.iter().position(|&n| n == element.node())
    }

    // ===== Filtering =====

    /// Keep the elements whose `attr` matches `value`.
    ///
    /// `attr` may be a dotted chain; element-valued steps recurse, and
    /// list-valued steps match if any member matches.
    pub fn by(&self, attr: &str, value: impl Into<Matcher>) -> Result<ElementList> {
        self.filter_matching(attr, &[value.into()], true)
    }

    /// Keep the elements whose `attr` matches any of `values`.
    pub fn by_any(&self, attr: &str, values: Vec<Matcher>) -> Result<ElementList> {
        self.filter_matching(attr, &values, true)
    }

    /// Drop the elements whose `attr` matches `value`.
    pub fn exclude(&self, attr: &str, value: impl Into<Matcher>) -> Result<ElementList> {
        self.filter_matching(attr, &[value.into()], false)
    }

    fn filter_matching(
        &self,
        attr: &str,
        values: &[Matcher],
        keep_matching: bool,
    ) -> Result<ElementList> {
        let segments: Vec<&str> = attr.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ModelError::invalid(format!(
                "Invalid filter attribute: {attr:?}"
            )));
        }
        let mut nodes = Vec::new();
        for element in self.iter() {
            let leaves = read_chain(&element, &segments)?;
            let matched = leaves
                .iter()
                .any(|leaf| values.iter().any(|v| leaf == v));
            if matched == keep_matching {
                nodes.push(element.node());
            }
        }
        Ok(self.derived(nodes))
    }

    /// Keep the elements whose class (or any of its ancestors) has one of
    /// the given names, compared case-insensitively.
    pub fn by_class(&self, names: &[&str]) -> Result<ElementList> {
        self.filter_class(names, true)
    }

    /// Drop the elements whose class matches any of the given names.
    pub fn exclude_classes(&self, names: &[&str]) -> Result<ElementList> {
        self.filter_class(names, false)
    }

    fn filter_class(&self, names: &[&str], keep_matching: bool) -> Result<ElementList> {
        let mm = self.model.metamodel().clone();
        let mut nodes = Vec::new();
        for element in self.iter() {
            let mut matched = false;
            let mut cur = Some(self.model.class_of_lenient(element.node()));
            while let Some(class) = cur {
                let classname = &mm.class(class).name;
                if names.iter().any(|n| n.eq_ignore_ascii_case(classname)) {
                    matched = true;
                    break;
                }
                cur = mm.class(class).parent;
            }
            if matched == keep_matching {
                nodes.push(element.node());
            }
        }
        Ok(self.derived(nodes))
    }

    /// Find the one element whose `name` field matches.
    pub fn by_name(&self, name: &str) -> Result<Element> {
        self.single_match("name", name)
    }

    /// Find the one element with the given identifier.
    pub fn by_id(&self, id: &str) -> Result<Element> {
        for element in self.iter() {
            if self.model.doc().id_of(element.node())? == Some(id) {
                return Ok(element);
            }
        }
        Err(ModelError::ElementNotFound { key: id.to_string() })
    }

    fn single_match(&self, attr: &str, value: &str) -> Result<Element> {
        let matches = self.filter_matching(attr, &[Matcher::Value(value.into())], true)?;
        match matches.len() {
            0 => Err(ModelError::ElementNotFound {
                key: value.to_string(),
            }),
            1 => Ok(matches.get(0).expect("length checked")),
            _ => Err(ModelError::MultipleMatches {
                key: value.to_string(),
            }),
        }
    }

    /// Filter with an arbitrary predicate.
    pub fn filter(&self, predicate: impl Fn(&Element) -> bool) -> ElementList {
        let nodes = self
            .iter()
            .filter(|e| predicate(e))
            .map(|e| e.node())
            .collect();
        self.derived(nodes)
    }

    /// Project each element through an attribute, flattening list-valued
    /// results and dropping duplicates and empty values.
    pub fn map(&self, attr: &str) -> Result<ElementList> {
        if let Some((head, rest)) = attr.split_once('.') {
            return self.map(head)?.map(rest);
        }

        let mut nodes: Vec<NodeId> = Vec::new();
        let mut push = |node: NodeId| {
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        };
        for element in self.iter() {
            match element.property_read(attr) {
                Ok(ReadValue::Many(list)) => {
                    for member in list.iter() {
                        push(member.node());
                    }
                }
                Ok(ReadValue::Single(Some(member))) => push(member.node()),
                Ok(ReadValue::Single(None)) => {}
                Ok(ReadValue::Scalar(_)) => {
                    return Err(ModelError::invalid(format!(
                        "map over {attr:?} must produce model elements, not scalar values"
                    )))
                }
                Err(ModelError::UnknownAttribute { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(ElementList::detached(self.model.clone(), nodes, None))
    }

    // ===== Key/value projection =====

    /// The mapkey values of all members, in order.
    pub fn keys(&self) -> Result<Vec<Value>> {
        let key = self.mapkey_attr()?;
        let mut out = Vec::with_capacity(self.len());
        for element in self.iter() {
            out.push(match element.property_read(&key) {
                Ok(ReadValue::Scalar(value)) => value,
                _ => Value::Null,
            });
        }
        Ok(out)
    }

    /// All (key, element) pairs, in order.
    pub fn items(&self) -> Result<Vec<(Value, Element)>> {
        let keys = self.keys()?;
        Ok(keys.into_iter().zip(self.iter()).collect())
    }

    /// Find the one element whose mapkey equals `key`.
    pub fn by_key(&self, key: &str) -> Result<Element> {
        let attr = self.mapkey_attr()?;
        self.single_match(&attr, key)
    }

    /// The mapvalue of the element found by `key`; the projection must
    /// declare a scalar mapvalue attribute.
    pub fn key_value(&self, key: &str) -> Result<Value> {
        let element = self.by_key(key)?;
        let attr = self.mapvalue.clone().ok_or_else(|| {
            ModelError::invalid("This list has no value projection configured")
        })?;
        match element.property_read(&attr)? {
            ReadValue::Scalar(value) => Ok(value),
            _ => Err(ModelError::invalid(format!(
                "Value projection {attr:?} is not a scalar field"
            ))),
        }
    }

    fn mapkey_attr(&self) -> Result<String> {
        self.mapkey
            .clone()
            .ok_or_else(|| ModelError::invalid("This list cannot act as a mapping"))
    }

    // ===== Coupled operations =====

    fn require_coupled(&self, op: &str) -> Result<Coupling> {
        self.coupling.clone().ok_or_else(|| ModelError::NotCoupled {
            op: op.to_string(),
        })
    }

    fn refresh(&mut self) -> Result<()> {
        let coupling = self.require_coupled("refresh")?;
        let model = self.model.clone();
        let rel = relation_on(&model, coupling.owner_class, &coupling.relation)?;
        self.nodes = rel.read_nodes(&model, coupling.owner, coupling.owner_class)?;
        Ok(())
    }

    /// Insert an existing element so it appears at `index`.
    pub fn insert(&mut self, index: usize, element: &Element) -> Result<Element> {
        self.insert_value(index, InsertValue::Existing(element.clone()), "insert")
    }

    /// Append an existing element.
    pub fn push(&mut self, element: &Element) -> Result<Element> {
        self.insert(self.len(), element)
    }

    /// Create a new member from a creation marker, appended at the end.
    ///
    /// The concrete class is chosen from the relationship's bound classes,
    /// narrowed by the marker's type hint; candidates are tried in
    /// registration order until one accepts the given fields.
    pub fn create(&mut self, marker: NewObject) -> Result<Element> {
        self.insert_value(self.len(), InsertValue::New(marker), "create")
    }

    /// Create a new member that only has one interesting attribute.
    pub fn create_singleattr(&mut self, value: impl Into<Value>) -> Result<Element> {
        let coupling = self.require_coupled("create")?;
        let model = self.model.clone();
        let rel = relation_on(&model, coupling.owner_class, &coupling.relation)?;
        let attr = rel.single_attr.clone().ok_or_else(|| {
            ModelError::invalid("Cannot create an object from a single attribute")
        })?;
        self.create(NewObject::new("").set(attr, value.into()))
    }

    fn insert_value(&mut self, index: usize, value: InsertValue, op: &str) -> Result<Element> {
        let coupling = self.require_coupled(op)?;
        if coupling.fixed_length != 0 && self.len() >= coupling.fixed_length {
            return Err(ModelError::invalid(
                "Cannot insert into a fixed-length list",
            ));
        }
        let model = self.model.clone();
        let rel = relation_on(&model, coupling.owner_class, &coupling.relation)?;
        let inserted = rel.insert(
            &model,
            coupling.owner,
            coupling.owner_class,
            &coupling.relation,
            index,
            value,
            &[],
        )?;
        self.refresh()?;
        Ok(inserted)
    }

    /// Remove the member at `index` from the relationship.
    ///
    /// For Containment this deletes the element from the model, running the
    /// referential-integrity protocol.
    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let element = self.get(index).ok_or_else(|| {
            ModelError::invalid(format!("Index {index} out of range (length {})", self.len()))
        })?;
        self.remove(&element)
    }

    /// Remove the given member from the relationship.
    pub fn remove(&mut self, element: &Element) -> Result<()> {
        let coupling = self.require_coupled("delete")?;
        if coupling.fixed_length != 0 && self.len() <= coupling.fixed_length {
            return Err(ModelError::invalid(
                "Cannot delete from a fixed-length list",
            ));
        }
        let model = self.model.clone();
        let rel = relation_on(&model, coupling.owner_class, &coupling.relation)?;
        rel.remove_member(
            &model,
            coupling.owner,
            coupling.owner_class,
            &coupling.relation,
            element,
        )?;
        self.refresh()
    }

    /// Replace the member at `index`.
    pub fn set_item(&mut self, index: usize, element: &Element) -> Result<()> {
        let coupling = self.require_coupled("set")?;
        let mut values = self.to_vec();
        if index >= values.len() {
            return Err(ModelError::invalid(format!(
                "Index {index} out of range (length {})",
                values.len()
            )));
        }
        values[index] = element.clone();
        let model = self.model.clone();
        let rel = relation_on(&model, coupling.owner_class, &coupling.relation)?;
        rel.set(
            &model,
            coupling.owner,
            coupling.owner_class,
            &coupling.relation,
            &values,
        )?;
        self.refresh()
    }

    /// Remove every member matching the predicate.
    pub fn delete_all(&mut self, predicate: impl Fn(&Element) -> bool) -> Result<()> {
        let doomed: Vec<Element> = self.iter().filter(|e| predicate(e)).collect();
        for element in doomed {
            self.remove(&element)?;
        }
        Ok(())
    }
}

/// Walk a dotted attribute chain, collecting the leaf values.
fn read_chain(element: &Element, segments: &[&str]) -> Result<Vec<Matcher>> {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Ok(vec![Matcher::Element(element.clone())]),
    };
    match element.property_read(head) {
        Ok(ReadValue::Scalar(value)) => {
            if rest.is_empty() {
                Ok(vec![Matcher::Value(value)])
            } else {
                Ok(Vec::new())
            }
        }
        Ok(ReadValue::Single(Some(next))) => read_chain(&next, rest),
        Ok(ReadValue::Single(None)) => Ok(Vec::new()),
        Ok(ReadValue::Many(list)) => {
            let mut out = Vec::new();
            for member in list.iter() {
                out.extend(read_chain(&member, rest)?);
            }
            Ok(out)
        }
        Err(ModelError::UnknownAttribute { .. }) => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

/// A value that filter helpers compare leaves against.
#[derive(Debug, Clone)]
pub enum Matcher {
    Value(Value),
    Element(Element),
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Value(a), Matcher::Value(b)) => a == b,
            (Matcher::Element(a), Matcher::Element(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! matcher_from_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Matcher {
            fn from(v: $ty) -> Self {
                Matcher::Value(v.into())
            }
        })*
    };
}

matcher_from_value!(Value, &str, String, bool, i64, f64);

impl From<Element> for Matcher {
    fn from(v: Element) -> Self {
        Matcher::Element(v)
    }
}

impl From<&Element> for Matcher {
    fn from(v: &Element) -> Self {
        Matcher::Element(v.clone())
    }
}

impl PartialEq for ElementList {
    fn eq(&self, other: &Self) -> bool {
        self.model.ptr_eq(&other.model) && self.nodes == other.nodes
    }
}

impl Add<&ElementList> for &ElementList {
    type Output = ElementList;

    /// Concatenate two lists.
    ///
    /// Panics when the operands belong to different models.
    fn add(self, other: &ElementList) -> ElementList {
        assert!(
            self.model.ptr_eq(&other.model),
            "Cannot add ElementLists from different models"
        );
        let mut nodes = self.nodes.clone();
        nodes.extend_from_slice(&other.nodes);
        let elemclass = match (self.elemclass, other.elemclass) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        };
        ElementList::detached(self.model.clone(), nodes, elemclass)
    }
}

impl Sub<&ElementList> for &ElementList {
    type Output = ElementList;

    /// Remove every element of `other` from this list, by identity.
    fn sub(self, other: &ElementList) -> ElementList {
        let nodes = self
            .nodes
            .iter()
            .copied()
            .filter(|n| !other.nodes.contains(n))
            .collect();
        ElementList::detached(self.model.clone(), nodes, self.elemclass)
    }
}

impl std::fmt::Debug for ElementList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for element in self.iter() {
            list.entry(&format_args!("{element}"));
        }
        list.finish()
    }
}
