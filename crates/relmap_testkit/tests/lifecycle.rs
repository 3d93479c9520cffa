//! Reload, delete, lifecycle events and export.

use std::sync::Arc;

use parking_lot::Mutex;
use relmap_codec::{Record, Value};
use relmap_core::{CoreError, Lifecycle, ReloadOptions, SaveOptions};
use relmap_testkit::prelude::*;

#[test]
fn delete_clears_the_instance() {
    init_tracing();
    let shop = ShopFixture::new();
    let order = shop.repo.get("Order", 2).unwrap();
    shop.repo.delete("Order", &order).unwrap();

    assert!(order.is_deleted());
    assert!(matches!(
        order.get("product"),
        Err(CoreError::InstanceDeleted { .. })
    ));
    assert!(matches!(
        order.set("product", "Walther P99"),
        Err(CoreError::InstanceDeleted { .. })
    ));
    assert!(order.field_names().is_err());
    assert!(!shop.repo.contains("Order", 2).unwrap());
    assert!(matches!(
        shop.repo.save("Order", &order),
        Err(CoreError::InstanceDeleted { .. })
    ));
    assert_eq!(shop.rows("orders").len(), 2);
}

#[test]
fn removed_children_are_deleted_on_save() {
    init_tracing();
    let shop = ShopFixture::new();
    let james = shop.repo.get("Customer", 2).unwrap();
    let orders = james.has_many("orders").unwrap();
    let ppk = orders[0].instance().clone();
    james.remove_related("orders", &ppk).unwrap();

    let mark = shop.queries();
    shop.repo.save("Customer", &james).unwrap();
    assert_eq!(
        shop.statements_since(mark),
        vec!["DELETE FROM orders WHERE id = 2"]
    );
    assert!(ppk.is_deleted());

    let mark = shop.queries();
    shop.repo
        .save_with(
            "Customer",
            &james,
            &SaveOptions::new().keep_missing_related_instances(true),
        )
        .unwrap();
    assert_eq!(shop.queries(), mark);
}

#[test]
fn reload_refuses_to_drop_changes() {
    init_tracing();
    let shop = ShopFixture::new();
    let bob = shop.repo.get("Customer", 1).unwrap();
    bob.set("occupation", "Kapper").unwrap();

    let err = shop.repo.reload("Customer", &bob).unwrap_err();
    assert_eq!(
        err.to_string(),
        "\"Customer\" {1} has unsaved changes in: occupation"
    );
    assert_eq!(bob.get("occupation").unwrap(), Value::from("Kapper"));

    shop.repo
        .reload_with("Customer", &bob, &ReloadOptions::new().discard_changes(true))
        .unwrap();
    assert_eq!(
        bob.get("occupation").unwrap(),
        Value::from("Software ontwikkelaar")
    );
}

#[test]
fn reload_sees_changes_made_elsewhere() {
    let shop = ShopFixture::new();
    let bob = shop.repo.get("Customer", 1).unwrap();
    let orders = bob.has_many("orders").unwrap();
    assert_eq!(orders.len(), 1);

    let other = shop.second_repository();
    let remote = other.get("Customer", 1).unwrap();
    remote.set("name", "B. Fanger").unwrap();
    other.save("Customer", &remote).unwrap();

    shop.repo.reload("Customer", &bob).unwrap();
    assert_eq!(bob.get("name").unwrap(), Value::from("B. Fanger"));
    assert!(bob.field("orders").unwrap().is_placeholder());

    let same = shop
        .repo
        .reload_by_id("Customer", 1, &ReloadOptions::new())
        .unwrap();
    assert_eq!(same, bob);
}

#[test]
fn reload_all_is_all_or_nothing() {
    let shop = ShopFixture::new();
    let bob = shop.repo.get("Customer", 1).unwrap();
    let james = shop.repo.get("Customer", 2).unwrap();
    james.set("name", "M").unwrap();
    bob.set("name", "Q").unwrap();

    assert!(shop
        .repo
        .reload_all("Customer", &ReloadOptions::new())
        .is_err());
    assert_eq!(bob.get("name").unwrap(), Value::from("Q"));

    shop.repo
        .reload_all("Customer", &ReloadOptions::new().discard_changes(true))
        .unwrap();
    assert_eq!(bob.get("name").unwrap(), Value::from("Bob Fanger"));
    assert_eq!(james.get("name").unwrap(), Value::from("James Bond"));
}

#[test]
fn reload_needs_a_stored_instance() {
    let shop = ShopFixture::new();
    let order = shop.repo.create("Order", Record::new()).unwrap();
    assert!(matches!(
        shop.repo.reload("Order", &order),
        Err(CoreError::NotPersisted { .. })
    ));
}

#[test]
fn events_follow_the_state_machine() {
    init_tracing();
    let shop = ShopFixture::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for event in [
        Lifecycle::Create,
        Lifecycle::Load,
        Lifecycle::Saving,
        Lifecycle::Saved,
        Lifecycle::Deleting,
        Lifecycle::Deleted,
    ] {
        let seen = Arc::clone(&seen);
        shop.repo.listen("Order", event, move |_| seen.lock().push(event));
    }

    let order = shop
        .repo
        .create("Order", Record::new().with("product", "Tea"))
        .unwrap();
    shop.repo.save("Order", &order).unwrap();
    shop.repo.delete("Order", &order).unwrap();
    shop.repo.get("Order", 1).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            Lifecycle::Create,
            Lifecycle::Saving,
            Lifecycle::Saved,
            Lifecycle::Deleting,
            Lifecycle::Deleted,
            Lifecycle::Load,
        ]
    );
}

#[test]
fn listeners_see_the_saving_state() {
    let shop = ShopFixture::new();
    let states = Arc::new(Mutex::new(Vec::new()));
    let repo = shop.second_repository();
    let inner = repo.clone();
    let recorded = Arc::clone(&states);
    repo.listen("Customer", Lifecycle::Saving, move |customer| {
        recorded.lock().push(inner.diff("Customer", customer).map(|c| c.len()).ok());
    });

    let bob = repo.get("Customer", 1).unwrap();
    bob.set("name", "Robert").unwrap();
    repo.save("Customer", &bob).unwrap();
    assert_eq!(*states.lock(), vec![Some(1)]);
    assert_eq!(repo.diff("Customer", &bob).unwrap().len(), 0);
}

#[test]
fn export_renders_the_graph() {
    init_tracing();
    let shop = ShopFixture::new();
    let james = shop.repo.get("Customer", 2).unwrap();

    let flat = shop.repo.export("Customer", &james, 0).unwrap();
    assert_eq!(
        serde_json::to_value(&flat).unwrap(),
        serde_json::json!({"id": 2, "name": "James Bond", "occupation": "Spion"})
    );

    let deep = shop.repo.export("Customer", &james, 1).unwrap();
    let json = serde_json::to_value(&deep).unwrap();
    assert_eq!(json["orders"][0]["product"], "Walter PPK 9mm");
    assert_eq!(json["orders"][1]["product"], "Spycam");
    assert_eq!(json["groups"], serde_json::json!([]));
    assert!(json["orders"][0].get("customer").is_none());
}

#[test]
fn export_merges_junction_fields() {
    let shop = ShopFixture::new();
    let bob = shop.repo.get("Customer", 1).unwrap();
    let json = serde_json::to_value(shop.repo.export("Customer", &bob, 2).unwrap()).unwrap();
    assert_eq!(
        json["ratings"],
        serde_json::json!([{"id": 1, "title": "Hacker", "customers": [], "rating": 5}])
    );
    assert_eq!(json["orders"][0]["product"], "Kop koffie");
    assert!(json["groups"][0]["customers"].as_array().unwrap().is_empty());
}
