use std::collections::HashMap;

use uuid::Uuid;

use crate::errors::{DocError, Result};
use crate::node::{Node, NodeId, NodeSpec, QName};

/// The attribute that carries a node's unique identifier.
pub const ID_ATTR: &str = "id";

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// A mutable, semi-structured tree document.
///
/// Nodes live in a generational arena: handles stay cheap to copy, and a
/// handle into a freed slot is detected as stale instead of aliasing a later
/// occupant. The document also maintains an index from identifier attributes
/// to nodes, used for link resolution.
///
/// This is the minimal tree-navigation and link-resolution surface that the
/// object-graph layer consumes; parsing and serializing an on-disk format is
/// a separate concern and not handled here.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    ids: HashMap<String, NodeId>,
}

impl Document {
    /// Create a document with a single root node with the given tag.
    pub fn new(root_tag: impl Into<String>) -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId::new(0, 0),
            ids: HashMap::new(),
        };
        doc.root = doc.alloc(Node::new(root_tag));
        doc
    }

    /// The root node of this document.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, including detached ones.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the handle refers to a live node.
    pub fn contains(&self, node: NodeId) -> bool {
        self.lookup(node).is_some()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.node.is_none());
            slot.node = Some(node);
            NodeId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId::new(index, 0)
        }
    }

    fn lookup(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn lookup_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn get(&self, id: NodeId) -> Result<&Node> {
        self.lookup(id).ok_or(DocError::StaleNode {
            node: id.to_string(),
        })
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        if self.lookup(id).is_none() {
            return Err(DocError::StaleNode {
                node: id.to_string(),
            });
        }
        Ok(self.lookup_mut(id).expect("checked above"))
    }

    /// Create a new, detached node with the given role tag.
    pub fn create_node(&mut self, tag: impl Into<String>) -> NodeId {
        self.alloc(Node::new(tag))
    }

    // ===== Node data access =====

    pub fn tag(&self, node: NodeId) -> Result<&str> {
        Ok(&self.get(node)?.tag)
    }

    pub fn set_tag(&mut self, node: NodeId, tag: impl Into<String>) -> Result<()> {
        self.get_mut(node)?.tag = tag.into();
        Ok(())
    }

    pub fn qtype(&self, node: NodeId) -> Result<Option<&QName>> {
        Ok(self.get(node)?.qtype.as_ref())
    }

    pub fn set_qtype(&mut self, node: NodeId, qtype: Option<QName>) -> Result<()> {
        self.get_mut(node)?.qtype = qtype;
        Ok(())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Result<Option<&str>> {
        Ok(self.get(node)?.attribute(name))
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: impl Into<String>) -> Result<()> {
        self.get_mut(node)?.set_attribute(name, value.into());
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<Option<String>> {
        Ok(self.get_mut(node)?.remove_attribute(name))
    }

    /// All attributes of a node, in insertion order.
    pub fn attributes(&self, node: NodeId) -> Result<&[(String, String)]> {
        Ok(&self.get(node)?.attributes)
    }

    /// The node's identifier attribute, if it has one.
    pub fn id_of(&self, node: NodeId) -> Result<Option<&str>> {
        self.attribute(node, ID_ATTR)
    }

    // ===== Navigation =====

    pub fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.get(node)?.parent)
    }

    pub fn children(&self, node: NodeId) -> Result<&[NodeId]> {
        Ok(&self.get(node)?.children)
    }

    /// Children whose role tag is one of `tags`, in document order.
    pub fn children_with_tag(&self, node: NodeId, tags: &[&str]) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        for &child in &self.get(node)?.children {
            let ctag = self.tag(child)?;
            if tags.contains(&ctag) {
                out.push(child);
            }
        }
        Ok(out)
    }

    /// All ancestors of a node, nearest first.
    pub fn ancestors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut cur = self.get(node)?.parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.get(p)?.parent;
        }
        Ok(out)
    }

    /// All descendants of a node in preorder, excluding the node itself.
    pub fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.get(node)?.children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.get(n)?.children.iter().rev().copied());
        }
        Ok(out)
    }

    /// Descendants that carry a declared class, in document order.
    pub fn typed_descendants(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut out = self.descendants(node)?;
        out.retain(|&n| self.lookup(n).is_some_and(|d| d.qtype.is_some()));
        Ok(out)
    }

    /// The node and all its descendants in preorder.
    pub fn preorder(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut out = vec![node];
        out.extend(self.descendants(node)?);
        Ok(out)
    }

    /// Position of `child` in `parent`'s child list.
    pub fn child_index(&self, parent: NodeId, child: NodeId) -> Result<Option<usize>> {
        Ok(self.get(parent)?.children.iter().position(|&c| c == child))
    }

    // ===== Structural mutation =====

    /// Attach `child` under `parent` at the given position.
    ///
    /// Positions beyond the end append. A node that already has a parent is
    /// detached from it first, so attaching is also how nodes move.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.get(parent)?;
        self.get(child)?;
        self.detach_quiet(child)?;
        let siblings = &mut self.get_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, child);
        self.get_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Attach `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let len = self.get(parent)?.children.len();
        self.insert_child(parent, len, child)
    }

    /// Attach `new` as the immediate preceding sibling of `anchor`.
    pub fn insert_before(&mut self, anchor: NodeId, new: NodeId) -> Result<()> {
        if anchor == new {
            return Ok(());
        }
        let parent = self.get(anchor)?.parent.ok_or(DocError::OrphanAnchor {
            node: anchor.to_string(),
        })?;
        // Position must be re-read after the detach, in case both share a parent.
        self.detach_quiet(new)?;
        let index = self
            .child_index(parent, anchor)?
            .expect("anchor is a child of its parent");
        let siblings = &mut self.get_mut(parent)?.children;
        siblings.insert(index, new);
        self.get_mut(new)?.parent = Some(parent);
        Ok(())
    }

    /// Detach a node from its parent. The subtree stays alive and indexed.
    pub fn detach(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(DocError::DetachRoot);
        }
        self.detach_quiet(node)
    }

    fn detach_quiet(&mut self, node: NodeId) -> Result<()> {
        let Some(parent) = self.get(node)?.parent else {
            return Ok(());
        };
        let siblings = &mut self.get_mut(parent)?.children;
        siblings.retain(|&c| c != node);
        self.get_mut(node)?.parent = None;
        Ok(())
    }

    /// Free a detached subtree, invalidating all handles into it.
    pub fn free_subtree(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(DocError::DetachRoot);
        }
        self.detach_quiet(node)?;
        self.unindex_subtree(node)?;
        let mut doomed = self.preorder(node)?;
        doomed.reverse();
        for n in doomed {
            let slot = &mut self.slots[n.index as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(n.index);
        }
        Ok(())
    }

    // ===== Identifier index =====

    /// Look up a node by its identifier attribute.
    pub fn node_by_id(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    /// Produce a fresh identifier, or verify that a wanted one is free.
    pub fn new_identifier(&self, want: Option<&str>) -> Result<String> {
        if let Some(want) = want {
            if self.ids.contains_key(want) {
                return Err(DocError::IdCollision {
                    id: want.to_string(),
                });
            }
            return Ok(want.to_string());
        }
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.ids.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Set a node's identifier attribute and index it, failing on collision.
    pub fn set_identifier(&mut self, node: NodeId, id: &str) -> Result<()> {
        match self.ids.get(id) {
            Some(&existing) if existing != node => {
                return Err(DocError::IdCollision { id: id.to_string() })
            }
            _ => {}
        }
        if let Some(old) = self.get(node)?.attribute(ID_ATTR).map(str::to_string) {
            self.ids.remove(&old);
        }
        self.set_attribute(node, ID_ATTR, id)?;
        self.ids.insert(id.to_string(), node);
        Ok(())
    }

    /// Register the identifiers of a subtree in the index.
    pub fn index_subtree(&mut self, node: NodeId) -> Result<()> {
        for n in self.preorder(node)? {
            if let Some(id) = self.id_of(n)?.map(str::to_string) {
                self.ids.insert(id, n);
            }
        }
        Ok(())
    }

    /// Remove the identifiers of a subtree from the index.
    pub fn unindex_subtree(&mut self, node: NodeId) -> Result<()> {
        for n in self.preorder(node)? {
            if let Some(id) = self.id_of(n)?.map(str::to_string) {
                self.ids.remove(&id);
            }
        }
        Ok(())
    }

    // ===== Links =====

    /// Encode a link to the given node.
    ///
    /// The target must carry an identifier. The format is the identifier
    /// prefixed with `#`; list-valued link attributes join several of these
    /// with single spaces.
    pub fn create_link(&self, to: NodeId) -> Result<String> {
        let id = self.id_of(to)?.ok_or(DocError::MissingIdentifier {
            node: to.to_string(),
        })?;
        Ok(format!("#{id}"))
    }

    /// Resolve a single link to its target node.
    pub fn resolve_link(&self, link: &str) -> Result<NodeId> {
        // Tolerate a leading type-hint prefix: everything after the last '#'
        // is the identifier.
        let Some((_, id)) = link.rsplit_once('#') else {
            return Err(DocError::MalformedLink {
                link: link.to_string(),
            });
        };
        if id.is_empty() {
            return Err(DocError::MalformedLink {
                link: link.to_string(),
            });
        }
        self.node_by_id(id).ok_or(DocError::BrokenLink {
            link: link.to_string(),
        })
    }

    /// Resolve a space-separated list of links.
    ///
    /// With `ignore_broken`, dangling targets are skipped; malformed links
    /// always fail.
    pub fn follow_links(&self, links: &str, ignore_broken: bool) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        for link in links.split_whitespace() {
            match self.resolve_link(link) {
                Ok(node) => out.push(node),
                Err(DocError::BrokenLink { .. }) if ignore_broken => {}
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    // ===== Fixture support =====

    /// Build a document from a declarative subtree description.
    ///
    /// Every node that declares an `id` attribute is registered in the
    /// identifier index; duplicate identifiers fail.
    pub fn from_spec(spec: &NodeSpec) -> Result<Self> {
        let mut doc = Self::new(spec.tag.clone());
        let root = doc.root;
        doc.apply_spec(root, spec)?;
        Ok(doc)
    }

    fn apply_spec(&mut self, node: NodeId, spec: &NodeSpec) -> Result<()> {
        self.get_mut(node)?.qtype = spec.qtype.clone();
        for (key, value) in &spec.attributes {
            if key == ID_ATTR {
                self.set_identifier(node, value)?;
            } else {
                self.set_attribute(node, key, value.clone())?;
            }
        }
        for child_spec in &spec.children {
            let child = self.create_node(child_spec.tag.clone());
            self.append_child(node, child)?;
            self.apply_spec(child, child_spec)?;
        }
        Ok(())
    }

    /// Snapshot a subtree as a declarative description.
    pub fn to_spec(&self, node: NodeId) -> Result<NodeSpec> {
        let data = self.get(node)?;
        let mut spec = NodeSpec {
            tag: data.tag.clone(),
            qtype: data.qtype.clone(),
            attributes: data.attributes.clone(),
            children: Vec::new(),
        };
        for &child in &data.children {
            spec.children.push(self.to_spec(child)?);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new("root");
        let a = doc.create_node("child");
        let b = doc.create_node("child");
        doc.append_child(doc.root(), a).unwrap();
        doc.append_child(doc.root(), b).unwrap();
        doc.set_identifier(a, "id-a").unwrap();
        doc.set_identifier(b, "id-b").unwrap();
        (doc, a, b)
    }

    #[test]
    fn test_children_with_tag() {
        let (mut doc, a, _) = sample();
        let other = doc.create_node("other");
        doc.append_child(doc.root(), other).unwrap();

        let found = doc.children_with_tag(doc.root(), &["child"]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], a);
    }

    #[test]
    fn test_insert_child_moves_node() {
        let (mut doc, a, b) = sample();
        // Re-inserting `a` after `b` moves it instead of duplicating it.
        doc.insert_child(doc.root(), 2, a).unwrap();
        assert_eq!(doc.children(doc.root()).unwrap(), &[b, a]);
        assert_eq!(doc.parent_of(a).unwrap(), Some(doc.root()));
    }

    #[test]
    fn test_insert_before() {
        let (mut doc, a, b) = sample();
        let c = doc.create_node("child");
        doc.insert_before(a, c).unwrap();
        assert_eq!(doc.children(doc.root()).unwrap(), &[c, a, b]);
    }

    #[test]
    fn test_link_round_trip() {
        let (doc, a, _) = sample();
        let link = doc.create_link(a).unwrap();
        assert_eq!(link, "#id-a");
        assert_eq!(doc.resolve_link(&link).unwrap(), a);
    }

    #[test]
    fn test_resolve_link_with_type_prefix() {
        let (doc, a, _) = sample();
        assert_eq!(doc.resolve_link("ns:Thing sub/frag#id-a").unwrap(), a);
    }

    #[test]
    fn test_malformed_and_broken_links() {
        let (doc, _, _) = sample();
        assert!(matches!(
            doc.resolve_link("id-a"),
            Err(DocError::MalformedLink { .. })
        ));
        assert!(matches!(
            doc.resolve_link("#nope"),
            Err(DocError::BrokenLink { .. })
        ));

        let targets = doc.follow_links("#id-a #nope #id-b", true).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(doc.follow_links("#id-a #nope", false).is_err());
    }

    #[test]
    fn test_new_identifier_collision() {
        let (doc, _, _) = sample();
        assert!(matches!(
            doc.new_identifier(Some("id-a")),
            Err(DocError::IdCollision { .. })
        ));
        assert_eq!(doc.new_identifier(Some("fresh")).unwrap(), "fresh");
        // Generated identifiers are unique on every call.
        assert_ne!(
            doc.new_identifier(None).unwrap(),
            doc.new_identifier(None).unwrap()
        );
    }

    #[test]
    fn test_free_subtree_invalidates_handles() {
        let (mut doc, a, b) = sample();
        let nested = doc.create_node("leaf");
        doc.append_child(a, nested).unwrap();
        doc.set_identifier(nested, "id-n").unwrap();

        doc.free_subtree(a).unwrap();
        assert!(!doc.contains(a));
        assert!(!doc.contains(nested));
        assert!(doc.contains(b));
        assert_eq!(doc.node_by_id("id-a"), None);
        assert_eq!(doc.node_by_id("id-n"), None);
        assert!(matches!(doc.tag(a), Err(DocError::StaleNode { .. })));
    }

    #[test]
    fn test_freed_slot_reuse_is_detected() {
        let (mut doc, a, _) = sample();
        doc.free_subtree(a).unwrap();
        let reused = doc.create_node("fresh");
        assert_eq!(reused.index, a.index);
        assert_ne!(reused.generation, a.generation);
        assert!(doc.contains(reused));
        assert!(!doc.contains(a));
    }

    #[test]
    fn test_detach_root_fails() {
        let (mut doc, _, _) = sample();
        assert_eq!(doc.detach(doc.root()), Err(DocError::DetachRoot));
    }

    #[test]
    fn test_spec_round_trip() {
        let json = serde_json::json!({
            "tag": "root",
            "attributes": [["id", "r"]],
            "children": [
                {"tag": "child", "attributes": [["id", "c1"], ["name", "one"]]},
                {"tag": "child", "attributes": [["id", "c2"]]},
            ],
        });
        let spec: NodeSpec = serde_json::from_value(json).unwrap();
        let doc = Document::from_spec(&spec).unwrap();

        assert!(doc.node_by_id("c1").is_some());
        let back = doc.to_spec(doc.root()).unwrap();
        assert_eq!(back.children.len(), 2);
        assert_eq!(back.children[0].attributes[1].1, "one");
    }
}
