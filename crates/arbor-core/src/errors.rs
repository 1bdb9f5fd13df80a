use thiserror::Error;

/// Result type alias using ModelError
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error taxonomy of the object-graph layer
///
/// Schema resolution failures (`UnknownNamespace`, `MissingClass`,
/// `AmbiguousClassName`) are always surfaced. Write-path errors
/// (`InvalidModification`, `NonUniqueMember`) fail closed: they are raised
/// before any part of the tree has been touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No namespace is registered under the given alias or URI
    #[error("Namespace not found: {name}")]
    UnknownNamespace { name: String },

    /// The namespace has no matching class registration
    #[error("No class {name:?} in namespace {namespace}{}", version_suffix(.version))]
    MissingClass {
        namespace: String,
        name: String,
        version: Option<String>,
    },

    /// An unqualified class name matched registrations in several namespaces
    #[error("Multiple classes named {name:?} found, specify a namespace: {namespaces:?}")]
    AmbiguousClassName {
        name: String,
        namespaces: Vec<String>,
    },

    /// A class from a versioned namespace was requested without any version context
    #[error("Versioned namespace, but no version requested: {namespace}")]
    MissingVersion { namespace: String },

    /// A viewpoint version exceeds what the namespace supports
    #[error("Viewpoint {viewpoint:?} v{version} exceeds the supported maximum {maxver}")]
    UnsupportedVersion {
        viewpoint: String,
        version: String,
        maxver: String,
    },

    /// A version string could not be parsed
    #[error("Malformed version: {value:?}")]
    InvalidVersion { value: String },

    /// A wrap request asked for a class incompatible with the node's declared class
    #[error("Class mismatch: requested {requested}, but node is declared as {declared}")]
    ClassMismatch { requested: String, declared: String },

    /// A write would leave the model invalid; nothing was changed
    #[error("Invalid modification: {reason}")]
    InvalidModification { reason: String },

    /// A duplicate was inserted into a unique relationship
    #[error("Cannot insert: {attr:?} of {owner} already contains a reference to {target}")]
    NonUniqueMember {
        owner: String,
        attr: String,
        target: String,
    },

    /// An enforced single-valued attribute is empty
    #[error("Missing required value for {attr:?} on {owner}")]
    MissingValue { owner: String, attr: String },

    /// No element with the requested identifier or key
    #[error("Element not found: {key}")]
    ElementNotFound { key: String },

    /// A single-result lookup matched more than one element
    #[error("Multiple matches for {key:?}")]
    MultipleMatches { key: String },

    /// The class has no property with the given name
    #[error("Class {class} has no attribute {attr:?}")]
    UnknownAttribute { class: String, attr: String },

    /// A stored attribute value failed round-trip validation
    #[error("Invalid value for {attr:?}: {value:?}")]
    InvalidFieldValue { attr: String, value: String },

    /// A mutating list operation was attempted on a detached list
    #[error("List is not coupled to a relationship, cannot {op}")]
    NotCoupled { op: String },

    /// Metamodel registration error (duplicate name, bad wiring)
    #[error("Invalid metamodel registration: {reason}")]
    Registration { reason: String },

    /// Error bubbled up from the document layer
    #[error(transparent)]
    Doc(#[from] arbor_doc::DocError),
}

fn version_suffix(version: &Option<String>) -> String {
    match version {
        Some(v) => format!(" (v{v})"),
        None => String::new(),
    }
}

impl ModelError {
    /// Shorthand for an [`ModelError::InvalidModification`] with a formatted reason.
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ModelError::InvalidModification {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_class_display() {
        let err = ModelError::MissingClass {
            namespace: "https://example.com/ns/{VERSION}".into(),
            name: "Widget".into(),
            version: Some("1.2.0".into()),
        };
        let text = err.to_string();
        assert!(text.contains("Widget"));
        assert!(text.contains("(v1.2.0)"));

        let err = ModelError::MissingClass {
            namespace: "https://example.com/plain".into(),
            name: "Widget".into(),
            version: None,
        };
        assert!(!err.to_string().contains("(v"));
    }

    #[test]
    fn test_doc_error_conversion() {
        let doc_err = arbor_doc::DocError::BrokenLink {
            link: "#gone".into(),
        };
        let err: ModelError = doc_err.clone().into();
        assert_eq!(err, ModelError::Doc(doc_err));
    }
}
