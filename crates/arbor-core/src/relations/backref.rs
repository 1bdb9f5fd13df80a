//! Backref: a derived reverse relationship.
//!
//! The member list is computed by scanning every instance of the bound class
//! for a forward relationship that points back at the owner. This is O(n) in
//! the model size and read-only; use it for convenience, not in hot paths.

use arbor_doc::NodeId;

use crate::element::ReadValue;
use crate::errors::Result;
use crate::model::Model;
use crate::relations::Backref;

pub(super) fn read(model: &Model, owner: NodeId, rel: &Backref) -> Result<Vec<NodeId>> {
    let base = model.resolve_class_name(&rel.class)?;
    let owner_element = model.wrap(owner)?;

    let mut matches = Vec::new();
    for candidate_node in model.nodes_of_class(base, None)? {
        let candidate = model.wrap(candidate_node)?;
        for attr in &rel.attrs {
            // Classes without the attribute, and reads that fail for any
            // other reason, simply don't match.
            let hit = match candidate.property_read(attr) {
                Ok(ReadValue::Many(list)) => list.contains(&owner_element),
                Ok(ReadValue::Single(Some(element))) => element == owner_element,
                Ok(_) => false,
                Err(_) => false,
            };
            if hit {
                matches.push(candidate_node);
                break;
            }
        }
    }
    Ok(matches)
}
