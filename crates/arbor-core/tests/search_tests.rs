//! Model-wide search: subtype matching, scope constraints, document order.

mod common;

use arbor_core::NewObject;

use common::{create_named, create_site, create_widget, fixture};

#[test]
fn test_search_matches_subtypes() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w");
    let mut parts = widget.relation("parts").unwrap();
    let gadget = parts.create(NewObject::new("Gadget").set("name", "g")).unwrap();
    let sprocket = parts.create(NewObject::new("cog").set("name", "s")).unwrap();

    // Searching for the abstract base finds all concrete subtypes.
    let found = fx.model.search(["core:Part"], None).unwrap();
    assert_eq!(found.to_vec(), vec![gadget.clone(), sprocket]);

    let only_gadgets = fx.model.search(["Gadget"], None).unwrap();
    assert_eq!(only_gadgets.to_vec(), vec![gadget]);
}

#[test]
fn test_search_below_constrains_to_descendants() {
    let fx = fixture();
    let w1 = create_widget(&fx.model, "w1");
    let w2 = create_widget(&fx.model, "w2");
    let mut parts = w1.relation("parts").unwrap();
    let g1 = parts.create(NewObject::new("Gadget").set("name", "g1")).unwrap();

    let below_w1 = fx.model.search(["core:Part"], Some(&w1)).unwrap();
    assert_eq!(below_w1.to_vec(), vec![g1]);
    assert!(fx
        .model
        .search(["core:Part"], Some(&w2))
        .unwrap()
        .is_empty());

    // The scope element itself is not part of the result.
    let widgets_below_w1 = fx.model.search(["Widget"], Some(&w1)).unwrap();
    assert!(widgets_below_w1.is_empty());
}

#[test]
fn test_search_all_returns_every_typed_element() {
    let fx = fixture();
    let widget = create_widget(&fx.model, "w");
    let site = create_site(&fx.model, "s");

    let everything = fx.model.search_all(None).unwrap();
    // Root package, widget, site.
    assert_eq!(everything.len(), 3);
    assert!(everything.contains(&widget));
    assert!(everything.contains(&site));
    assert!(everything.contains(&fx.model.root().unwrap()));
}

#[test]
fn test_search_is_in_document_order() {
    let fx = fixture();
    let names = ["alpha", "beta", "gamma"];
    for name in names {
        create_widget(&fx.model, name);
    }
    let pkg = create_named(&fx.model, "packages", "sub");
    let mut nested = pkg.relation("widgets").unwrap();
    nested.create(NewObject::new("").set("name", "delta")).unwrap();

    let found = fx.model.search(["Widget"], None).unwrap();
    let found_names: Vec<String> = found
        .iter()
        .map(|e| e.field("name").unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(found_names, ["alpha", "beta", "gamma", "delta"]);
}
