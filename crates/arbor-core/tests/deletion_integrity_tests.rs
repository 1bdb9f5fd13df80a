//! The two-phase deletion protocol: discovery failures abort with nothing
//! changed, successful deletions leave no dangling references behind.

mod common;

use arbor_core::{ModelError, NewObject};

use common::{create_assembly, create_named, create_site, create_widget, fixture};

#[test]
fn test_delete_purges_association_references() {
    let fx = fixture();
    let a = create_widget(&fx.model, "a");
    let b = create_widget(&fx.model, "b");
    let target = create_widget(&fx.model, "t");
    a.set_relation("needs", &[b.clone(), target.clone()]).unwrap();
    let target_id = target.id().unwrap();

    fx.model.delete(&target).unwrap();

    assert!(fx.model.find_references(&target_id).unwrap().is_empty());
    // The surviving link is intact, the dangling one is gone.
    assert_eq!(a.relation("needs").unwrap().to_vec(), vec![b]);
    assert!(matches!(
        fx.model.by_id(&target_id),
        Err(ModelError::ElementNotFound { .. })
    ));
}

#[test]
fn test_delete_purges_allocation_link_nodes() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w");
    let s1 = create_site(&fx.model, "s1");
    let s2 = create_site(&fx.model, "s2");
    widget
        .set_relation("deployments", &[s1.clone(), s2.clone()])
        .unwrap();
    let s1_id = s1.id().unwrap();

    fx.model.delete(&s1).unwrap();

    assert!(fx.model.find_references(&s1_id).unwrap().is_empty());
    assert_eq!(widget.relation("deployments").unwrap().to_vec(), vec![s2]);
    // The auxiliary link node itself is gone from the tree.
    let doc = fx.model.document();
    let refs = doc
        .children_with_tag(widget.node(), &["ownedDeployments"])
        .unwrap();
    assert_eq!(refs.len(), 1);
}

#[test]
fn test_delete_covers_the_whole_subtree() {
    let fx = fixture();
    let package = create_named(&fx.model, "packages", "sub");
    let mut widgets = package.relation("widgets").unwrap();
    let inner = widgets.create(NewObject::new("").set("name", "inner")).unwrap();
    let outer = create_widget(&fx.model, "outer");
    outer.set_relation("needs", &[inner.clone()]).unwrap();
    let inner_id = inner.id().unwrap();

    // Deleting the package must also purge references to its descendants.
    fx.model.delete(&package).unwrap();

    assert!(fx.model.find_references(&inner_id).unwrap().is_empty());
    assert!(outer.relation("needs").unwrap().is_empty());
}

#[test]
fn test_discovery_failure_aborts_with_nothing_changed() {
    let fx = fixture();
    let link = create_named(&fx.model, "links", "l");
    let s1 = create_site(&fx.model, "s1");
    let s2 = create_site(&fx.model, "s2");
    link.set_relation("ends", &[s1.clone(), s2.clone()]).unwrap();
    let s1_id = s1.id().unwrap();

    // Purging an end would leave the two-ended link at length 1; the
    // discovery phase rejects that before anything is touched.
    let err = fx.model.delete(&s1).unwrap_err();
    assert!(matches!(err, ModelError::InvalidModification { .. }));

    assert!(fx.model.by_id(&s1_id).is_ok());
    assert_eq!(link.relation("ends").unwrap().len(), 2);
    assert_eq!(
        fx.model.find_references(&s1_id).unwrap().len(),
        1,
        "the reference must still be there"
    );
}

#[test]
fn test_deleting_enforced_single_target_surfaces_on_read() {
    let fx = fixture();
    let assembly = create_assembly(&fx.model, "asm");
    let required = create_widget(&fx.model, "req");
    let optional = create_widget(&fx.model, "opt");
    assembly.set_single("required_widget", Some(&required)).unwrap();
    assembly.set_single("main_widget", Some(&optional)).unwrap();

    // Deletion itself succeeds; enforcement is a read-time contract.
    fx.model.delete(&required).unwrap();
    assert!(matches!(
        assembly.single("required_widget"),
        Err(ModelError::MissingValue { .. })
    ));

    // Without enforcement the field just reads empty after deletion.
    fx.model.delete(&optional).unwrap();
    assert_eq!(assembly.single("main_widget").unwrap(), None);
}

#[test]
fn test_delete_rejects_root_and_stale_elements() {
    let fx = fixture();
    let root = fx.model.root().unwrap();
    assert!(fx.model.delete(&root).is_err());

    let widget = create_widget(&fx.model, "w");
    fx.model.delete(&widget).unwrap();
    // Deleting again fails on the stale handle.
    assert!(fx.model.delete(&widget).is_err());
}

#[test]
fn test_find_references_reports_owner_attr_and_index() {
    let fx = fixture();
    let a = create_widget(&fx.model, "a");
    let b = create_widget(&fx.model, "b");
    let target = create_widget(&fx.model, "t");
    let assembly = create_assembly(&fx.model, "asm");

    a.set_relation("needs", &[b.clone(), target.clone()]).unwrap();
    assembly.set_single("main_widget", Some(&target)).unwrap();

    let mut refs = fx.model.references_to(&target).unwrap();
    refs.sort_by(|x, y| x.attr.cmp(&y.attr));
    assert_eq!(refs.len(), 2);

    assert_eq!(refs[0].owner, assembly);
    assert_eq!(refs[0].attr, "main_widget");
    assert_eq!(refs[0].index, None);

    assert_eq!(refs[1].owner, a);
    assert_eq!(refs[1].attr, "needs");
    assert_eq!(refs[1].index, Some(1));
}
