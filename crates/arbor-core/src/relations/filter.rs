//! Filter: a view of another relationship narrowed to a subclass.
//!
//! Reads pass through the wrapped relationship and keep only the members
//! whose class subtypes the filter class. Writes delegate to the wrapped
//! relationship with the filter class added to its bound set, so nothing
//! that violates the narrowing can be inserted through the view.

use arbor_doc::NodeId;

use crate::element::Element;
use crate::errors::{ModelError, Result};
use crate::model::Model;
use crate::registry::{ClassId, ClassName};
use crate::relations::{relation_on, Filter, InsertValue, PreparedPurge, RelationDef};

fn wrapped<'a>(model: &'a Model, owner_class: ClassId, rel: &Filter) -> Result<&'a RelationDef> {
    relation_on(model, owner_class, &rel.attr)
}

pub(super) fn read(
    model: &Model,
    owner: NodeId,
    owner_class: ClassId,
    rel: &Filter,
) -> Result<Vec<NodeId>> {
    let inner = wrapped(model, owner_class, rel)?;
    let cls = model.resolve_class_name(&rel.class)?;
    let mut nodes = inner.read_nodes(model, owner, owner_class)?;
    nodes.retain(|&n| {
        model
            .class_of(n)
            .map(|c| model.metamodel().is_subclass(c, cls))
            .unwrap_or(false)
    });
    Ok(nodes)
}

pub(super) fn insert(
    model: &Model,
    owner: NodeId,
    owner_class: ClassId,
    rel: &Filter,
    index: usize,
    value: InsertValue,
    bounds: &[ClassName],
) -> Result<Element> {
    let inner = wrapped(model, owner_class, rel)?;
    let filtered = read(model, owner, owner_class, rel)?;
    let unfiltered = inner.read_nodes(model, owner, owner_class)?;

    // Translate the position in the filtered view into a position in the
    // wrapped list.
    let real_index = if index >= filtered.len() {
        unfiltered.len()
    } else {
        unfiltered
            .iter()
            .position(|&n| n == filtered[index])
            .unwrap_or(unfiltered.len())
    };

    let mut inner_bounds = bounds.to_vec();
    inner_bounds.push(rel.class.clone());
    inner.insert(
        model,
        owner,
        owner_class,
        &rel.attr,
        real_index,
        value,
        &inner_bounds,
    )
}

pub(super) fn remove(
    model: &Model,
    owner: NodeId,
    owner_class: ClassId,
    rel: &Filter,
    target: &Element,
) -> Result<()> {
    let inner = wrapped(model, owner_class, rel)?;
    inner.remove_member(model, owner, owner_class, &rel.attr, target)
}

pub(super) fn set(
    model: &Model,
    owner: NodeId,
    owner_class: ClassId,
    rel: &Filter,
    values: &[Element],
) -> Result<()> {
    let inner = wrapped(model, owner_class, rel)?;
    let cls = model.resolve_class_name(&rel.class)?;
    for value in values {
        if !model.metamodel().is_subclass(value.class()?, cls) {
            return Err(ModelError::invalid(format!(
                "Cannot insert into {:?}: objects must be instances of {}, not {}",
                rel.attr,
                model.metamodel().qualname(cls),
                model.metamodel().qualname(value.class()?),
            )));
        }
    }

    // Rebuild the wrapped list: members outside the filter stay in place,
    // the filtered positions are re-populated from `values`.
    let unfiltered = inner.read_nodes(model, owner, owner_class)?;
    let mut replacement = Vec::with_capacity(unfiltered.len() + values.len());
    let mut pending = values.iter();
    for node in unfiltered {
        let in_view = model
            .class_of(node)
            .map(|c| model.metamodel().is_subclass(c, cls))
            .unwrap_or(false);
        if in_view {
            if let Some(value) = pending.next() {
                replacement.push(value.clone());
            }
        } else {
            replacement.push(model.wrap(node)?);
        }
    }
    replacement.extend(pending.cloned());

    inner.set(model, owner, owner_class, &rel.attr, &replacement)
}

pub(super) fn prepare_purge(
    model: &Model,
    owner: NodeId,
    owner_class: ClassId,
    rel: &Filter,
    target: NodeId,
) -> Result<Option<PreparedPurge>> {
    let inner = wrapped(model, owner_class, rel)?;
    inner.prepare_purge(model, owner, owner_class, &rel.attr, target)
}
