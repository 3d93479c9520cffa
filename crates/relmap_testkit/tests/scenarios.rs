//! Identity, placeholder and save scenarios on the shop dataset, with exact
//! backend operation counts.

use relmap_codec::{Record, Value};
use relmap_core::{BelongsToRef, Field, Instance, SaveOptions};
use relmap_testkit::prelude::*;

#[test]
fn get_returns_one_instance_per_row() {
    init_tracing();
    let shop = ShopFixture::new();
    let first = shop.repo.get("Customer", 1).unwrap();
    let second = shop.repo.get("Customer", 1).unwrap();
    assert!(Instance::ptr_eq(&first, &second));
    assert_eq!(shop.queries(), 1);
}

#[test]
fn all_reuses_live_instances() {
    init_tracing();
    let shop = ShopFixture::new();
    let james = shop.repo.get("Customer", 2).unwrap();
    let everyone = shop.repo.all("Customer").unwrap().to_vec().unwrap();
    assert_eq!(everyone.len(), 2);
    let same: Vec<_> = everyone.iter().filter(|c| Instance::ptr_eq(c, &james)).collect();
    assert_eq!(same.len(), 1);
    assert_eq!(shop.queries(), 2);
}

#[test]
fn order_placeholder_scenario() {
    init_tracing();
    let shop = ShopFixture::new();

    let order = shop.repo.get("Order", 2).unwrap();
    assert_eq!(shop.queries(), 1);
    assert_eq!(
        shop.statements_since(0),
        vec!["SELECT * FROM orders WHERE id = 2"]
    );

    assert_eq!(order.get_path("customer.id").unwrap(), Value::Integer(2));
    assert_eq!(shop.queries(), 1);

    assert_eq!(
        order.get_path("customer.name").unwrap(),
        Value::from("James Bond")
    );
    assert_eq!(shop.queries(), 2);
    assert!(matches!(order.field("customer").unwrap(), Field::BelongsTo(Some(_))));

    let customer = match order.belongs_to("customer").unwrap() {
        Some(BelongsToRef::Loaded(customer)) => customer,
        other => panic!("expected the loaded customer, got {other:?}"),
    };
    assert_eq!(customer.get("occupation").unwrap(), Value::from("Spion"));
    assert_eq!(shop.queries(), 2);

    shop.repo.save("Customer", &customer).unwrap();
    assert_eq!(shop.queries(), 2);

    customer.set("occupation", "Geheim agent").unwrap();
    let mark = shop.queries();
    shop.repo.save("Customer", &customer).unwrap();
    assert_eq!(
        shop.statements_since(mark),
        vec!["UPDATE customers SET occupation = 'Geheim agent' WHERE id = 2"]
    );
}

#[test]
fn created_order_uses_the_default_customer() {
    init_tracing();
    let shop = ShopFixture::new();
    let order = shop
        .repo
        .create("Order", Record::new().with("product", "Untitled"))
        .unwrap();
    assert_eq!(order.get_path("customer.id").unwrap(), Value::Integer(1));
    assert_eq!(shop.queries(), 0);

    assert_eq!(
        order.get_path("customer.name").unwrap(),
        Value::from("Bob Fanger")
    );
    assert_eq!(shop.queries(), 1);
}

#[test]
fn created_order_takes_defaults_for_missing_values() {
    let shop = ShopFixture::new();
    let order = shop.repo.create("Order", Record::new()).unwrap();
    assert_eq!(order.get("product").unwrap(), Value::from("Untitled"));
    let changes = shop.repo.diff("Order", &order).unwrap();
    assert!(changes.is_empty());
}

#[test]
fn second_save_writes_nothing() {
    init_tracing();
    let shop = ShopFixture::new();
    let bob = shop.repo.get("Customer", 1).unwrap();
    bob.has_many("orders").unwrap();
    bob.set("name", "Robert Fanger").unwrap();

    shop.repo.save("Customer", &bob).unwrap();
    assert_eq!(shop.writes(), 1);
    let mark = shop.queries();
    shop.repo.save("Customer", &bob).unwrap();
    assert_eq!(shop.queries(), mark);
    assert!(shop.repo.diff("Customer", &bob).unwrap().is_empty());
}

fn cycle(shop: &ShopFixture) -> (Instance, Instance) {
    let carol = shop
        .repo
        .create("Customer", Record::new().with("name", "Carol"))
        .unwrap();
    let order = shop
        .repo
        .create("Order", Record::new().with("product", "Tea"))
        .unwrap();
    order.set_belongs_to("customer", Some(carol.clone())).unwrap();
    carol.push_related("orders", order.clone()).unwrap();
    (carol, order)
}

#[test]
fn cycles_save_from_the_child() {
    init_tracing();
    let shop = ShopFixture::new();
    let (carol, order) = cycle(&shop);
    shop.repo.save("Order", &order).unwrap();

    assert_eq!(
        shop.statements_since(0),
        vec![
            "INSERT INTO customers (id, name, occupation) VALUES (3, 'Carol', NULL)",
            "INSERT INTO orders (customer_id, id, product) VALUES (3, 4, 'Tea')",
        ]
    );
    assert_eq!(carol.get("id").unwrap(), Value::Integer(3));
    assert_eq!(shop.repo.get("Order", 4).unwrap(), order);
}

#[test]
fn cycles_saved_from_the_child_track_the_child_row() {
    init_tracing();
    let shop = ShopFixture::new();
    let (carol, order) = cycle(&shop);
    shop.repo.save("Order", &order).unwrap();

    carol.remove_related("orders", &order).unwrap();
    drop(order);
    let mark = shop.queries();
    shop.repo.save("Customer", &carol).unwrap();
    assert_eq!(
        shop.statements_since(mark),
        vec!["DELETE FROM orders WHERE id = 4"]
    );
    assert_eq!(shop.rows("orders").len(), 3);
}

#[test]
fn cycles_save_from_the_parent() {
    init_tracing();
    let shop = ShopFixture::new();
    let (carol, order) = cycle(&shop);
    shop.repo.save("Customer", &carol).unwrap();

    assert_eq!(shop.writes(), 2);
    assert_eq!(order.get_path("customer.id").unwrap(), Value::Integer(3));
    let mark = shop.queries();
    shop.repo.save("Customer", &carol).unwrap();
    shop.repo.save("Order", &order).unwrap();
    assert_eq!(shop.queries(), mark);
}

#[test]
fn children_are_linked_to_their_parent() {
    init_tracing();
    let shop = ShopFixture::new();
    let james = shop.repo.get("Customer", 2).unwrap();
    let order = shop
        .repo
        .create("Order", Record::new().with("product", "Aston Martin"))
        .unwrap();
    james.push_related("orders", order.clone()).unwrap();

    let mark = shop.queries();
    shop.repo.save("Customer", &james).unwrap();
    assert_eq!(
        shop.statements_since(mark),
        vec!["INSERT INTO orders (customer_id, id, product) VALUES (2, 4, 'Aston Martin')"]
    );
    match order.belongs_to("customer").unwrap() {
        Some(BelongsToRef::Loaded(customer)) => assert_eq!(customer, james),
        other => panic!("expected the parent, got {other:?}"),
    }
}

#[test]
fn ignoring_relations_writes_only_the_row() {
    let shop = ShopFixture::new();
    let james = shop.repo.get("Customer", 2).unwrap();
    let order = shop.repo.create("Order", Record::new()).unwrap();
    james.push_related("orders", order).unwrap();
    james.set("name", "007").unwrap();

    let mark = shop.queries();
    shop.repo
        .save_with("Customer", &james, &SaveOptions::new().ignore_relations(true))
        .unwrap();
    assert_eq!(
        shop.statements_since(mark),
        vec!["UPDATE customers SET name = '007' WHERE id = 2"]
    );
    assert_eq!(shop.rows("orders").len(), 3);
}

#[test]
fn failed_saves_restore_the_state() {
    init_tracing();
    let shop = ShopFixture::new();
    let copy = shop
        .repo
        .create("Customer", Record::new().with("id", 1).with("name", "Clone"))
        .unwrap();
    let err = shop.repo.save("Customer", &copy).unwrap_err();
    assert!(err.is_backend());
    assert_eq!(shop.writes(), 0);
    assert!(shop.repo.validate().is_ok());

    copy.set("id", 7).unwrap();
    shop.repo.save("Customer", &copy).unwrap();
    assert_eq!(shop.repo.get("Customer", 7).unwrap(), copy);
}

#[test]
fn property_filters_reach_the_backend_columns() {
    let shop = ShopFixture::new();
    let spy_orders = shop
        .repo
        .all("Order")
        .unwrap()
        .filter(&relmap_codec::Conditions::field_eq("customer.id", 2))
        .unwrap();
    assert_eq!(spy_orders.len().unwrap(), 2);

    let products = shop
        .repo
        .all("Order")
        .unwrap()
        .select(&["product"])
        .unwrap();
    assert_eq!(products.len(), 3);
    assert_eq!(products[0].value("product"), Value::from("Kop koffie"));
    assert_eq!(shop.repo.tracked(), 0);
}
