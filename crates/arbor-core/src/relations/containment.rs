//! Containment: the owner directly parents its members under a role tag.
//!
//! This is the only relationship kind that owns node lifetime: removing a
//! member deletes its whole subtree from the model, and creation materializes
//! brand-new nodes.

use tracing::debug;

use arbor_doc::NodeId;

use crate::element::Element;
use crate::errors::{ModelError, Result};
use crate::model::Model;
use crate::registry::{ClassId, ClassName, Property};
use crate::relations::{Arg, Containment, InsertValue, NewObject};

pub(super) fn read(model: &Model, owner: NodeId, rel: &Containment) -> Result<Vec<NodeId>> {
    Ok(model
        .doc()
        .children_with_tag(owner, &[rel.role_tag.as_str()])?)
}

pub(super) fn set(
    model: &Model,
    owner: NodeId,
    rel: &Containment,
    values: &[Element],
) -> Result<()> {
    let before = read(model, owner, rel)?;

    // Append every kept or new member; appending moves, so the sequence ends
    // up in `values` order.
    for value in values {
        let length = read(model, owner, rel)?.len();
        insert(
            model,
            owner,
            rel,
            length,
            InsertValue::Existing(value.clone()),
            &[],
        )?;
    }

    // Members that were dropped from the list are deleted from the model.
    let kept: Vec<NodeId> = values.iter().map(Element::node).collect();
    for old in before {
        if !kept.contains(&old) {
            model.delete(&model.wrap(old)?)?;
        }
    }
    Ok(())
}

pub(super) fn insert(
    model: &Model,
    owner: NodeId,
    rel: &Containment,
    index: usize,
    value: InsertValue,
    bounds: &[ClassName],
) -> Result<Element> {
    let members = read(model, owner, rel)?;
    let position = parent_position(model, owner, &members, index)?;

    let node = match value {
        InsertValue::Existing(element) => {
            let node = element.node();
            let mut doc = model.doc_mut();
            doc.set_tag(node, rel.role_tag.clone())?;
            doc.insert_child(owner, position, node)?;
            doc.index_subtree(node)?;
            node
        }
        InsertValue::New(marker) => create(model, owner, rel, position, marker, bounds)?,
    };
    model.wrap(node)
}

/// Translate a list index into a position among all of the owner's children,
/// adjacent to the list neighbors.
fn parent_position(
    model: &Model,
    owner: NodeId,
    members: &[NodeId],
    index: usize,
) -> Result<usize> {
    let doc = model.doc();
    let index = index.min(members.len());
    if index == 0 {
        return Ok(0);
    }
    let anchor = members[index - 1];
    Ok(match doc.child_index(owner, anchor)? {
        Some(pos) => pos + 1,
        None => doc.children(owner)?.len(),
    })
}

/// Find the concrete classes eligible for creating a member.
///
/// Candidates are the non-abstract subclasses of the bound class that also
/// satisfy every extra bound (added by Filter adapters). A type hint narrows
/// the candidates to one, either through the relationship's hint map or by
/// exact class-name match.
pub(crate) fn candidate_classes(
    model: &Model,
    rel: &Containment,
    bounds: &[ClassName],
    hint: &str,
) -> Result<Vec<ClassId>> {
    let mm = model.metamodel();
    let base = model.resolve_class_name(&rel.class)?;
    let mut bound_ids = Vec::with_capacity(bounds.len());
    for bound in bounds {
        bound_ids.push(model.resolve_class_name(bound)?);
    }

    let classes: Vec<ClassId> = mm
        .concrete_subclasses(base)
        .into_iter()
        .filter(|&cls| bound_ids.iter().all(|&b| mm.is_subclass(cls, b)))
        .collect();
    if classes.is_empty() {
        return Err(ModelError::invalid(format!(
            "No concrete subclass of {} satisfies all bounds",
            mm.qualname(base)
        )));
    }

    if let Some((_, mapped)) = rel
        .type_hints
        .iter()
        .find(|(key, _)| key == &hint.to_lowercase())
    {
        let cls = model.resolve_class_name(mapped)?;
        if !classes.contains(&cls) {
            return Err(ModelError::invalid(format!(
                "Type hint {hint:?} maps to class {}, which doesn't satisfy all bounds",
                mm.qualname(cls)
            )));
        }
        return Ok(vec![cls]);
    }

    if !hint.is_empty() {
        let clsname = hint.rsplit(':').next().expect("rsplit yields at least one");
        return match classes.iter().find(|&&c| mm.class(c).name == clsname) {
            Some(&cls) => {
                debug!(hint, class = %mm.qualname(cls), "found exact match for type hint");
                Ok(vec![cls])
            }
            None => Err(ModelError::invalid(format!("Invalid type hint: {hint}"))),
        };
    }

    Ok(classes)
}

fn create(
    model: &Model,
    owner: NodeId,
    rel: &Containment,
    position: usize,
    marker: NewObject,
    bounds: &[ClassName],
) -> Result<NodeId> {
    let classes = candidate_classes(model, rel, bounds, &marker.type_hint)?;
    let id = model.doc().new_identifier(marker.id.as_deref())?;

    debug!(
        %id,
        candidates = classes.len(),
        "trying to create object in containment {:?}",
        rel.role_tag
    );
    for cls in classes {
        if !accepts(model, cls, &marker.fields) {
            debug!(class = %model.metamodel().qualname(cls), "candidate lacks a given field");
            continue;
        }
        return instantiate(model, owner, rel, position, cls, &id, &marker.fields);
    }

    let args: Vec<&str> = marker.fields.iter().map(|(n, _)| n.as_str()).collect();
    Err(ModelError::invalid(format!(
        "Cannot construct model object{} with arguments {args:?} in containment {:?}",
        if marker.type_hint.is_empty() {
            String::new()
        } else {
            format!(" with type hint {:?}", marker.type_hint)
        },
        rel.role_tag,
    )))
}

/// A candidate accepts the creation request iff it has all the given fields.
fn accepts(model: &Model, class: ClassId, fields: &[(String, Arg)]) -> bool {
    fields
        .iter()
        .all(|(name, _)| model.metamodel().property(class, name).is_some())
}

fn instantiate(
    model: &Model,
    owner: NodeId,
    rel: &Containment,
    position: usize,
    class: ClassId,
    id: &str,
    fields: &[(String, Arg)],
) -> Result<NodeId> {
    debug_assert!(!model.metamodel().class(class).abstract_);
    let classdef = model.metamodel().class(class);
    let qtype =
        model.qualify_classname(&ClassName::new(classdef.namespace, classdef.name.as_str()))?;

    let node = {
        let mut doc = model.doc_mut();
        let node = doc.create_node(rel.role_tag.clone());
        doc.set_qtype(node, Some(qtype))?;
        doc.set_identifier(node, id)?;
        doc.insert_child(owner, position, node)?;
        node
    };

    let populate = || -> Result<()> {
        let element = model.wrap(node)?;
        for (name, arg) in fields {
            match model.metamodel().property(class, name) {
                Some(Property::Field(_)) => match arg {
                    Arg::Value(value) => element.set_field(name, value.clone())?,
                    _ => {
                        return Err(ModelError::invalid(format!(
                            "Field {name:?} takes a scalar value, not element references"
                        )))
                    }
                },
                Some(Property::Relation(_)) => match arg {
                    Arg::Ref(target) => element.set_relation(name, &[target.clone()])?,
                    Arg::Refs(targets) => element.set_relation(name, targets)?,
                    Arg::Value(_) => {
                        return Err(ModelError::invalid(format!(
                            "Relationship {name:?} takes element references, not a scalar value"
                        )))
                    }
                },
                None => unreachable!("candidate acceptance checked all field names"),
            }
        }
        Ok(())
    };

    match populate() {
        Ok(()) => {
            model.doc_mut().index_subtree(node)?;
            Ok(node)
        }
        Err(err) => {
            // Leave no half-initialized node behind.
            let mut doc = model.doc_mut();
            doc.detach(node)?;
            doc.free_subtree(node)?;
            Err(err)
        }
    }
}
