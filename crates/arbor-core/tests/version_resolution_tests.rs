//! Version-aware namespace and class resolution: activation, trimming,
//! monotone dispatch across version ranges.

use std::sync::Arc;

use proptest::prelude::*;

use arbor_core::version::{parse_version, trim_version};
use arbor_core::{
    ClassId, ClassSpec, Document, Metamodel, Model, MetamodelBuilder, ModelError, NamespaceId,
    NamespaceSpec, QName,
};

const VP_URI: &str = "https://arbor.dev/ns/vp/{VERSION}";
const VP_NAME: &str = "org.arbor.vp";

struct VersionedFixture {
    model: Model,
    ns: NamespaceId,
    foo1: ClassId,
    foo2: ClassId,
}

fn versioned_metamodel() -> (Arc<Metamodel>, NamespaceId, ClassId, ClassId) {
    let mut b = MetamodelBuilder::new();
    let ns = b
        .namespace(
            NamespaceSpec::new(VP_URI, "vp")
                .viewpoint(VP_NAME)
                .maxver("4.0")
                .version_precision(2),
        )
        .unwrap();
    let root = b.class(ns, ClassSpec::new("Element").abstract_()).unwrap();
    let foo1 = b
        .class(ns, ClassSpec::new("Foo").parent(root).minver("1.0"))
        .unwrap();
    let foo2 = b
        .class(ns, ClassSpec::new("Foo").parent(root).minver("2.0"))
        .unwrap();
    (b.freeze().unwrap(), ns, foo1, foo2)
}

fn versioned_fixture() -> VersionedFixture {
    let (mm, ns, foo1, foo2) = versioned_metamodel();
    let doc = Document::new("arbor");
    VersionedFixture {
        model: Model::new(mm, doc),
        ns,
        foo1,
        foo2,
    }
}

#[test]
fn test_version_monotonic_dispatch() {
    let (mm, ns, foo1, foo2) = versioned_metamodel();
    let at = |v: &str| mm.get_class(ns, "Foo", Some(&parse_version(v).unwrap()));

    assert_eq!(at("1.5").unwrap(), foo1);
    assert_eq!(at("2.0").unwrap(), foo2);
    assert_eq!(at("2.5").unwrap(), foo2);
    assert!(matches!(at("0.5"), Err(ModelError::MissingClass { .. })));
}

#[test]
fn test_resolution_without_version_context_is_an_error() {
    let (mm, ns, _, _) = versioned_metamodel();
    assert!(matches!(
        mm.get_class(ns, "Foo", None),
        Err(ModelError::MissingVersion { .. })
    ));
}

#[test]
fn test_activated_viewpoint_drives_resolution() {
    let fx = versioned_fixture();

    // Before activation the namespace maximum applies.
    assert_eq!(fx.model.resolve_class("vp:Foo").unwrap(), fx.foo2);

    fx.model.activate_viewpoint(VP_NAME, "1.5.3").unwrap();
    assert_eq!(fx.model.resolve_class("vp:Foo").unwrap(), fx.foo1);

    assert_eq!(
        fx.model.referenced_viewpoints(),
        vec![(VP_NAME.to_string(), "1.5.3".to_string())]
    );
}

#[test]
fn test_qualify_classname_embeds_trimmed_version() {
    let fx = versioned_fixture();
    fx.model.activate_viewpoint(VP_NAME, "1.5.3").unwrap();

    // Precision 2 zeroes the patch level, so point releases share identity.
    let qname = fx
        .model
        .qualify_classname(&arbor_core::ClassName::new(fx.ns, "Foo"))
        .unwrap();
    assert_eq!(qname.ns_uri, "https://arbor.dev/ns/vp/1.5.0");
    assert_eq!(qname.name, "Foo");
}

#[test]
fn test_uri_embedded_version_wins_over_activation() {
    let fx = versioned_fixture();
    fx.model.activate_viewpoint(VP_NAME, "1.0").unwrap();

    let mut doc = Document::new("probe");
    let node = doc.root();
    doc.set_qtype(node, Some(QName::new("https://arbor.dev/ns/vp/2.2.0", "Foo")))
        .unwrap();
    let probe = Model::new(fx.model.metamodel().clone(), doc);
    probe.activate_viewpoint(VP_NAME, "1.0").unwrap();

    // The node claims 2.2.0 in its namespace URI, so it resolves to the
    // newer registration despite the older activated viewpoint.
    assert_eq!(probe.class_of(node).unwrap(), fx.foo2);
}

#[test]
fn test_activation_rules() {
    let fx = versioned_fixture();

    // Activating beyond the supported maximum fails.
    assert!(matches!(
        fx.model.activate_viewpoint(VP_NAME, "5.0"),
        Err(ModelError::UnsupportedVersion { .. })
    ));

    fx.model.activate_viewpoint(VP_NAME, "2.0").unwrap();
    // Idempotent for the same version, an error for a different one.
    fx.model.activate_viewpoint(VP_NAME, "2.0").unwrap();
    assert!(matches!(
        fx.model.activate_viewpoint(VP_NAME, "3.0"),
        Err(ModelError::InvalidModification { .. })
    ));
}

#[test]
fn test_unknown_namespace_and_class_are_surfaced() {
    let fx = versioned_fixture();
    assert!(matches!(
        fx.model.resolve_class("nowhere:Foo"),
        Err(ModelError::UnknownNamespace { .. })
    ));
    fx.model.activate_viewpoint(VP_NAME, "2.0").unwrap();
    assert!(matches!(
        fx.model.resolve_class("vp:Bar"),
        Err(ModelError::MissingClass { .. })
    ));
}

proptest! {
    #[test]
    fn prop_trim_version_is_idempotent(
        major in 0u64..20,
        minor in 0u64..20,
        patch in 0u64..20,
        precision in 1usize..4,
    ) {
        let version = semver::Version::new(major, minor, patch);
        let once = trim_version(&version, precision);
        let twice = trim_version(&once, precision);
        prop_assert_eq!(&once, &twice);
        prop_assert!(once <= version);
    }

    #[test]
    fn prop_parse_version_pads_consistently(major in 0u64..100, minor in 0u64..100) {
        let partial = parse_version(&format!("{major}.{minor}")).unwrap();
        let full = parse_version(&format!("{major}.{minor}.0")).unwrap();
        prop_assert_eq!(partial, full);
    }
}
