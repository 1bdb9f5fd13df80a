use thiserror::Error;

/// Result type alias using DocError
pub type Result<T> = std::result::Result<T, DocError>;

/// Errors raised by the document layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocError {
    /// A node handle refers to a slot that was freed or never allocated
    #[error("Stale node handle: {node}")]
    StaleNode { node: String },

    /// A requested identifier is already taken by another node
    #[error("Identifier already in use: {id}")]
    IdCollision { id: String },

    /// A link string does not have the expected `#<id>` shape
    #[error("Malformed link: {link:?}")]
    MalformedLink { link: String },

    /// A link points at an identifier that is not in the index
    #[error("Broken link, no such target: {link:?}")]
    BrokenLink { link: String },

    /// A link source or target carries no identifier attribute
    #[error("Node has no identifier and cannot be linked: {node}")]
    MissingIdentifier { node: String },

    /// The document root cannot be detached
    #[error("Cannot detach the document root")]
    DetachRoot,

    /// A child index is out of bounds for the parent's child list
    #[error("Child index {index} out of bounds (parent has {len} children)")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The anchor node for an insert-before is not attached to a parent
    #[error("Anchor node has no parent: {node}")]
    OrphanAnchor { node: String },
}
