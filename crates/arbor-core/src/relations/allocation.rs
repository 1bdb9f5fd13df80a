//! Allocation: references carried by auxiliary link nodes.
//!
//! Each member is represented by a small child node of the owner (the "link
//! node") that holds the identifier-link to the target, and optionally a
//! back-link to the owner. The link nodes are owned by the owner under a
//! role tag; their order is the list order.

use arbor_doc::NodeId;

use crate::element::Element;
use crate::errors::{ModelError, Result};
use crate::model::Model;
use crate::registry::ClassName;
use crate::relations::{Allocation, InsertValue};

pub(super) fn read(model: &Model, owner: NodeId, rel: &Allocation) -> Result<Vec<NodeId>> {
    let mut out = Vec::new();
    for refnode in find_refs(model, owner, rel)? {
        let Some(target) = follow_ref(model, refnode, &rel.attr, false)? else {
            continue;
        };
        if !out.contains(&target) {
            out.push(target);
        }
    }
    Ok(out)
}

/// The owner's link nodes for this relationship, in document order.
fn find_refs(model: &Model, owner: NodeId, rel: &Allocation) -> Result<Vec<NodeId>> {
    let wanted = model.qualify_classname(&rel.alloc_type)?;
    let doc = model.doc();
    let mut out = Vec::new();
    for refnode in doc.children_with_tag(owner, &[rel.tag.as_str()])? {
        if doc.qtype(refnode)? == Some(&wanted) {
            out.push(refnode);
        }
    }
    Ok(out)
}

fn follow_ref(
    model: &Model,
    refnode: NodeId,
    attr: &str,
    ignore_broken: bool,
) -> Result<Option<NodeId>> {
    let link = {
        let doc = model.doc();
        match doc.attribute(refnode, attr)? {
            Some(link) if !link.is_empty() => link.to_string(),
            _ => return Ok(None),
        }
    };
    match model.doc().resolve_link(&link) {
        Ok(node) => Ok(Some(node)),
        Err(arbor_doc::DocError::BrokenLink { .. }) if ignore_broken => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Link nodes currently pointing at `target`; the discovery half of a purge.
pub(super) fn refs_to(
    model: &Model,
    owner: NodeId,
    rel: &Allocation,
    target: NodeId,
) -> Result<Vec<NodeId>> {
    let mut out = Vec::new();
    for refnode in find_refs(model, owner, rel)? {
        if follow_ref(model, refnode, &rel.attr, true)? == Some(target) {
            out.push(refnode);
        }
    }
    Ok(out)
}

pub(super) fn insert(
    model: &Model,
    owner: NodeId,
    name: &str,
    rel: &Allocation,
    index: usize,
    value: InsertValue,
    bounds: &[ClassName],
) -> Result<Element> {
    let InsertValue::Existing(element) = value else {
        return Err(ModelError::invalid(
            "Cannot create new objects on an Allocation",
        ));
    };
    check_bounds(model, rel, bounds, &element, name)?;

    let members = read(model, owner, rel)?;
    let existing = refs_to(model, owner, rel, element.node())?;
    if let Some(&refnode) = existing.first() {
        if rel.unique {
            return Err(ModelError::NonUniqueMember {
                owner: model.wrap(owner)?.to_string(),
                attr: name.to_string(),
                target: element.to_string(),
            });
        }
        reposition(model, owner, rel, refnode, &members, index)?;
        return Ok(element);
    }

    let refnode = create_refnode(model, owner, rel, &element)?;
    reposition(model, owner, rel, refnode, &members, index)?;
    Ok(element)
}

pub(super) fn set(
    model: &Model,
    owner: NodeId,
    name: &str,
    rel: &Allocation,
    values: &[Element],
) -> Result<()> {
    if rel.unique {
        for (i, value) in values.iter().enumerate() {
            if values[..i].iter().any(|v| v.node() == value.node()) {
                return Err(ModelError::NonUniqueMember {
                    owner: model.wrap(owner)?.to_string(),
                    attr: name.to_string(),
                    target: value.to_string(),
                });
            }
        }
    }
    for value in values {
        check_bounds(model, rel, &[], value, name)?;
    }

    // Pair up existing link nodes with the desired members, create the
    // missing ones, then drop the leftovers.
    let mut available: Vec<(NodeId, Option<NodeId>)> = Vec::new();
    for refnode in find_refs(model, owner, rel)? {
        available.push((refnode, follow_ref(model, refnode, &rel.attr, true)?));
    }

    let mut ordered = Vec::with_capacity(values.len());
    for value in values {
        match available
            .iter()
            .position(|(_, target)| *target == Some(value.node()))
        {
            Some(pos) => ordered.push(available.remove(pos).0),
            None => ordered.push(create_refnode(model, owner, rel, value)?),
        }
    }

    for (leftover, _) in available {
        let mut doc = model.doc_mut();
        doc.detach(leftover)?;
        doc.free_subtree(leftover)?;
    }

    // Re-appending in order leaves the link nodes in `values` order.
    for refnode in ordered {
        model.doc_mut().append_child(owner, refnode)?;
    }
    Ok(())
}

pub(super) fn remove(
    model: &Model,
    owner: NodeId,
    rel: &Allocation,
    target: &Element,
) -> Result<()> {
    let refs = refs_to(model, owner, rel, target.node())?;
    let Some(&refnode) = refs.first() else {
        return Err(ModelError::invalid(
            "Cannot delete: target object not in this list",
        ));
    };
    let mut doc = model.doc_mut();
    doc.detach(refnode)?;
    doc.free_subtree(refnode)?;
    Ok(())
}

fn check_bounds(
    model: &Model,
    rel: &Allocation,
    bounds: &[ClassName],
    element: &Element,
    name: &str,
) -> Result<()> {
    let class = element.class()?;
    for bound in std::iter::once(&rel.class).chain(bounds) {
        let bound_cls = model.resolve_class_name(bound)?;
        if !model.metamodel().is_subclass(class, bound_cls) {
            return Err(ModelError::invalid(format!(
                "Cannot insert into {name:?}: objects must be instances of {}, not {}",
                model.metamodel().qualname(bound_cls),
                model.metamodel().qualname(class),
            )));
        }
    }
    Ok(())
}

/// Create and append a link node for `target`.
fn create_refnode(
    model: &Model,
    owner: NodeId,
    rel: &Allocation,
    target: &Element,
) -> Result<NodeId> {
    let alloc_cls = model.resolve_class_name(&rel.alloc_type)?;
    if model.metamodel().class(alloc_cls).abstract_ {
        return Err(ModelError::invalid(format!(
            "Invalid metamodel: {} is abstract and cannot be used as an allocation type",
            model.metamodel().qualname(alloc_cls)
        )));
    }
    let qtype = model.qualify_classname(&rel.alloc_type)?;

    let mut doc = model.doc_mut();
    let id = doc.new_identifier(None)?;
    let link = doc.create_link(target.node())?;
    let backlink = match &rel.backattr {
        Some(_) => Some(doc.create_link(owner)?),
        None => None,
    };
    let refnode = doc.create_node(rel.tag.clone());
    doc.set_qtype(refnode, Some(qtype))?;
    doc.append_child(owner, refnode)?;
    doc.set_identifier(refnode, &id)?;
    doc.set_attribute(refnode, &rel.attr, link)?;
    if let (Some(backattr), Some(backlink)) = (&rel.backattr, backlink) {
        doc.set_attribute(refnode, backattr, backlink)?;
    }
    Ok(refnode)
}

/// Place `refnode` so its target shows up at `index` in the member list.
fn reposition(
    model: &Model,
    owner: NodeId,
    rel: &Allocation,
    refnode: NodeId,
    members: &[NodeId],
    index: usize,
) -> Result<()> {
    if index < members.len() {
        let anchor_target = members[index];
        let anchors = refs_to(model, owner, rel, anchor_target)?;
        if let Some(&anchor) = anchors.iter().find(|&&r| r != refnode) {
            model.doc_mut().insert_before(anchor, refnode)?;
            return Ok(());
        }
    }
    model.doc_mut().append_child(owner, refnode)?;
    Ok(())
}
