//! Association: an ordered identifier-link list stored in one attribute of
//! the owner. The targets are owned elsewhere; every write re-serializes the
//! whole list.

use arbor_doc::NodeId;

use crate::element::Element;
use crate::errors::{ModelError, Result};
use crate::model::Model;
use crate::registry::ClassName;
use crate::relations::{Association, InsertValue};

pub(super) fn read(model: &Model, owner: NodeId, rel: &Association) -> Result<Vec<NodeId>> {
    let links = model
        .doc()
        .attribute(owner, &rel.attr)?
        .unwrap_or_default()
        .to_string();
    Ok(model.doc().follow_links(&links, false)?)
}

pub(super) fn set(
    model: &Model,
    owner: NodeId,
    rel: &Association,
    values: &[Element],
) -> Result<()> {
    let nodes: Vec<NodeId> = values.iter().map(Element::node).collect();
    set_links(model, owner, rel, &nodes)
}

pub(super) fn insert(
    model: &Model,
    owner: NodeId,
    rel: &Association,
    index: usize,
    value: InsertValue,
    bounds: &[ClassName],
) -> Result<Element> {
    let InsertValue::Existing(element) = value else {
        return Err(ModelError::invalid(
            "Cannot create new objects on an Association",
        ));
    };
    for bound in bounds {
        let bound_cls = model.resolve_class_name(bound)?;
        if !model
            .metamodel()
            .is_subclass(element.class()?, bound_cls)
        {
            return Err(ModelError::invalid(format!(
                "Objects must be instances of {}, not {}",
                model.metamodel().qualname(bound_cls),
                model.metamodel().qualname(element.class()?),
            )));
        }
    }

    let mut nodes = read(model, owner, rel)?;
    let index = index.min(nodes.len());
    nodes.insert(index, element.node());
    set_links(model, owner, rel, &nodes)?;
    Ok(element)
}

pub(super) fn remove(
    model: &Model,
    owner: NodeId,
    rel: &Association,
    target: &Element,
) -> Result<()> {
    let mut nodes = read(model, owner, rel)?;
    nodes.retain(|&n| n != target.node());
    set_links(model, owner, rel, &nodes)
}

/// Validate all members against the bound class and write the attribute.
fn set_links(model: &Model, owner: NodeId, rel: &Association, nodes: &[NodeId]) -> Result<()> {
    let bound = model.resolve_class_name(&rel.class)?;
    let mut parts = Vec::with_capacity(nodes.len());
    for &node in nodes {
        let class = model.class_of(node)?;
        if !model.metamodel().is_subclass(class, bound) {
            return Err(ModelError::invalid(format!(
                "Cannot insert into {:?}: objects must be instances of {}, not {}",
                rel.attr,
                model.metamodel().qualname(bound),
                model.metamodel().qualname(class),
            )));
        }
        parts.push(model.doc().create_link(node)?);
    }

    let mut doc = model.doc_mut();
    if parts.is_empty() {
        doc.remove_attribute(owner, &rel.attr)?;
    } else {
        doc.set_attribute(owner, &rel.attr, parts.join(" "))?;
    }
    Ok(())
}

/// Commit half of a purge: re-serialize the attribute from the links that
/// still resolve, silently dropping the ones that died with the deletion
/// target.
pub(super) fn rewrite_links(model: &Model, owner: NodeId, attr: &str) -> Result<()> {
    let links = {
        let doc = model.doc();
        match doc.attribute(owner, attr)? {
            Some(value) => value.to_string(),
            None => return Ok(()),
        }
    };
    let survivors = model.doc().follow_links(&links, true)?;

    let mut parts = Vec::with_capacity(survivors.len());
    for node in survivors {
        parts.push(model.doc().create_link(node)?);
    }
    let mut doc = model.doc_mut();
    if parts.is_empty() {
        doc.remove_attribute(owner, attr)?;
    } else {
        doc.set_attribute(owner, attr, parts.join(" "))?;
    }
    Ok(())
}
