//! Shared fixture: a small widget-modeling metamodel and helpers to build
//! models against it.
#![allow(dead_code)]

use std::sync::Arc;

use arbor_core::{
    ClassName, ClassSpec, Document, Element, FieldDef, Metamodel, Model, MetamodelBuilder,
    NamespaceId, NamespaceSpec, NewObject, QName, RelationDef,
};

pub const CORE_URI: &str = "https://arbor.dev/ns/core";

pub struct Fixture {
    pub model: Model,
    pub core: NamespaceId,
}

pub fn metamodel() -> (Arc<Metamodel>, NamespaceId) {
    let mut b = MetamodelBuilder::new();
    let core = b.namespace(NamespaceSpec::new(CORE_URI, "core")).unwrap();

    let element = b
        .class(
            core,
            ClassSpec::new("Element")
                .abstract_()
                .field("name", FieldDef::string("name"))
                .field("description", FieldDef::string("description")),
        )
        .unwrap();

    b.class(
        core,
        ClassSpec::new("Package")
            .parent(element)
            .relation(
                "widgets",
                RelationDef::containment("ownedWidgets", ClassName::new(core, "Widget"))
                    .with_single_attr("name")
                    .with_mapkey("name")
                    .with_mapvalue("description"),
            )
            .relation(
                "packages",
                RelationDef::containment("ownedPackages", ClassName::new(core, "Package"))
                    .with_single_attr("name"),
            )
            .relation(
                "sites",
                RelationDef::containment("ownedSites", ClassName::new(core, "Site"))
                    .with_single_attr("name"),
            )
            .relation(
                "assemblies",
                RelationDef::containment("ownedAssemblies", ClassName::new(core, "Assembly"))
                    .with_single_attr("name"),
            )
            .relation(
                "links",
                RelationDef::containment("ownedLinks", ClassName::new(core, "Link"))
                    .with_single_attr("name"),
            ),
    )
    .unwrap();

    b.class(
        core,
        ClassSpec::new("Widget")
            .parent(element)
            .field("weight", FieldDef::float("weight"))
            .field(
                "kind",
                FieldDef::enumeration("kind", ["UNSET", "SIMPLE", "COMPOSITE"]),
            )
            .relation(
                "parts",
                RelationDef::containment("ownedParts", ClassName::new(core, "Part"))
                    .with_single_attr("name")
                    .type_hint("cog", ClassName::new(core, "Sprocket")),
            )
            .relation(
                "gadgets",
                RelationDef::filter("parts", ClassName::new(core, "Gadget")),
            )
            .relation(
                "needs",
                RelationDef::association("needs", ClassName::new(core, "Widget")),
            )
            .relation(
                "needed_by",
                RelationDef::backref(ClassName::new(core, "Widget"), ["needs"]),
            )
            .relation(
                "deployments",
                RelationDef::allocation(
                    "ownedDeployments",
                    ClassName::new(core, "WidgetDeployment"),
                    "targetElement",
                    ClassName::new(core, "Site"),
                )
                .with_backattr("sourceElement"),
            ),
    )
    .unwrap();

    let part = b
        .class(core, ClassSpec::new("Part").parent(element).abstract_())
        .unwrap();
    b.class(
        core,
        ClassSpec::new("Gadget")
            .parent(part)
            .field("flavor", FieldDef::string("flavor")),
    )
    .unwrap();
    b.class(
        core,
        ClassSpec::new("Sprocket")
            .parent(part)
            .field("teeth", FieldDef::int("teeth")),
    )
    .unwrap();

    b.class(core, ClassSpec::new("WidgetDeployment").parent(element))
        .unwrap();
    b.class(core, ClassSpec::new("Site").parent(element)).unwrap();

    b.class(
        core,
        ClassSpec::new("Assembly")
            .parent(element)
            .relation(
                "main_widget",
                RelationDef::association("mainWidget", ClassName::new(core, "Widget")).single(),
            )
            .relation(
                "required_widget",
                RelationDef::association("requiredWidget", ClassName::new(core, "Widget"))
                    .single_enforced(),
            ),
    )
    .unwrap();

    b.class(
        core,
        ClassSpec::new("Link").parent(element).relation(
            "ends",
            RelationDef::association("linkEnds", ClassName::new(core, "Site"))
                .with_fixed_length(2),
        ),
    )
    .unwrap();

    (b.freeze().unwrap(), core)
}

/// A model whose document only contains the root package.
pub fn fixture() -> Fixture {
    let (mm, core) = metamodel();
    let mut doc = Document::new("arbor");
    let root = doc.root();
    doc.set_qtype(root, Some(QName::new(CORE_URI, "Package")))
        .unwrap();
    doc.set_identifier(root, "root").unwrap();
    Fixture {
        model: Model::new(mm, doc),
        core,
    }
}

pub fn create_named(model: &Model, relation: &str, name: &str) -> Element {
    let root = model.root().unwrap();
    let mut list = root.relation(relation).unwrap();
    list.create(NewObject::new("").set("name", name)).unwrap()
}

pub fn create_widget(model: &Model, name: &str) -> Element {
    create_named(model, "widgets", name)
}

pub fn create_site(model: &Model, name: &str) -> Element {
    create_named(model, "sites", name)
}

pub fn create_assembly(model: &Model, name: &str) -> Element {
    create_named(model, "assemblies", name)
}
