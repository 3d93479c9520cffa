//! Property tests: backend rows survive the trip through instances.

use proptest::prelude::*;
use relmap_codec::Record;
use relmap_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn customer_rows_round_trip(row in customer_row_strategy()) {
        let shop = ShopFixture::new();
        let customer = shop.repo.convert("Customer", row.clone()).unwrap();
        for (column, value) in &row {
            prop_assert_eq!(&customer.get(column).unwrap(), value);
        }
        prop_assert!(shop.repo.diff("Customer", &customer).unwrap().is_empty());
        prop_assert_eq!(shop.repo.export("Customer", &customer, 0).unwrap(), row.to_value());
    }

    #[test]
    fn order_rows_round_trip(row in order_row_strategy()) {
        let shop = ShopFixture::new();
        let order = shop.repo.convert("Order", row.clone()).unwrap();
        prop_assert_eq!(order.get("product").unwrap(), row.value("product"));
        prop_assert_eq!(order.get_path("customer.id").unwrap(), row.value("customer_id"));
        prop_assert!(shop.repo.diff("Order", &order).unwrap().is_empty());
        prop_assert_eq!(shop.queries(), 0);
    }

    #[test]
    fn created_rows_are_stored_as_given(row in customer_row_strategy()) {
        let shop = ShopFixture::new();
        let values: Record = row.iter().filter(|(c, _)| *c != "id").map(|(c, v)| (c.clone(), v.clone())).collect();
        let customer = shop.repo.create("Customer", values).unwrap();
        shop.repo.save("Customer", &customer).unwrap();

        let stored = shop.rows("customers").pop().unwrap();
        prop_assert_eq!(stored.value("name"), row.value("name"));
        prop_assert_eq!(stored.value("occupation"), row.value("occupation"));

        let other = shop.second_repository();
        let fetched = other.get("Customer", stored.value("id")).unwrap();
        prop_assert_eq!(fetched.get("name").unwrap(), row.value("name"));
        prop_assert_eq!(shop.writes(), 1);
    }
}
