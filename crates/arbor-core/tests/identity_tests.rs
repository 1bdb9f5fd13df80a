//! Identity wrapper behavior: wrapping is identity-preserving, class
//! resolution is re-derived per read, and mismatched wraps fail.

mod common;

use arbor_core::ModelError;

use common::{create_widget, fixture};

#[test]
fn test_wrapping_the_same_node_yields_equal_elements() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w1");

    let once = fx.model.wrap(widget.node()).unwrap();
    let twice = fx.model.wrap(widget.node()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, widget);
}

#[test]
fn test_by_id_round_trip() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w1");
    let id = widget.id().unwrap();

    let found = fx.model.by_id(&id).unwrap();
    assert_eq!(found, widget);
    assert_eq!(found.classname().unwrap(), "Widget");

    assert!(matches!(
        fx.model.by_id("no-such-id"),
        Err(ModelError::ElementNotFound { .. })
    ));
}

#[test]
fn test_wrap_as_verifies_subtype_compatibility() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w1");

    let mm = fx.model.metamodel().clone();
    let widget_cls = fx.model.resolve_class("core:Widget").unwrap();
    let element_cls = mm.root();
    let site_cls = fx.model.resolve_class("core:Site").unwrap();

    // Wrapping as the declared class or any ancestor is fine.
    assert!(fx.model.wrap_as(widget.node(), widget_cls).is_ok());
    assert!(fx.model.wrap_as(widget.node(), element_cls).is_ok());

    // An unrelated class is rejected.
    assert!(matches!(
        fx.model.wrap_as(widget.node(), site_cls),
        Err(ModelError::ClassMismatch { .. })
    ));
}

#[test]
fn test_elements_are_stateless_views() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w1");

    // A second view sees writes made through the first immediately.
    let other = fx.model.by_id(&widget.id().unwrap()).unwrap();
    widget.set_field("name", "renamed").unwrap();
    assert_eq!(other.field("name").unwrap().as_str(), Some("renamed"));
}

#[test]
fn test_parent_navigation() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w1");

    let parent = widget.parent().unwrap().unwrap();
    assert_eq!(parent, fx.model.root().unwrap());
    // The document root has no parent element.
    assert!(parent.parent().unwrap().is_none());
}

#[test]
fn test_unqualified_class_resolution() {
    let fx = fixture();
    let by_alias = fx.model.resolve_class("core:Widget").unwrap();
    let unqualified = fx.model.resolve_class("Widget").unwrap();
    assert_eq!(by_alias, unqualified);

    assert!(matches!(
        fx.model.resolve_class("Nonexistent"),
        Err(ModelError::MissingClass { .. })
    ));
}
