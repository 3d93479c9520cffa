//! Property-based test generators using proptest.
//!
//! Provides strategies for generating rows and property paths that fit the
//! shop models.

use proptest::prelude::*;
use relmap_codec::{Record, Value};

/// Strategy for generating readable names (customer names, products).
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,8}( [A-Z][a-z]{1,8})?").expect("Invalid regex")
}

/// Strategy for generating identifiers of properties and columns.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating scalar values that survive a backend round-trip.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        name_strategy().prop_map(Value::Text),
    ]
}

/// Strategy for generating text-or-null column values.
pub fn optional_text_strategy() -> impl Strategy<Value = Value> {
    prop::option::of(name_strategy()).prop_map(|text| text.map_or(Value::Null, Value::Text))
}

/// Strategy for generating `customers` rows with ids above the seeded ones.
pub fn customer_row_strategy() -> impl Strategy<Value = Record> {
    (100i64..10_000, name_strategy(), optional_text_strategy()).prop_map(
        |(id, name, occupation)| {
            Record::new()
                .with("id", id)
                .with("name", name)
                .with("occupation", occupation)
        },
    )
}

/// Strategy for generating `orders` rows pointing at a seeded customer.
pub fn order_row_strategy() -> impl Strategy<Value = Record> {
    (100i64..10_000, name_strategy(), 1i64..=2).prop_map(|(id, product, customer)| {
        Record::new()
            .with("id", id)
            .with("product", product)
            .with("customer_id", customer)
    })
}

/// Strategy for generating property paths in canonical form, such as
/// `address.city`, `tags[0]` or `meta->owner[name]`.
pub fn property_path_strategy() -> impl Strategy<Value = String> {
    let tail = prop_oneof![
        identifier_strategy().prop_map(|name| format!(".{name}")),
        identifier_strategy().prop_map(|name| format!("->{name}")),
        identifier_strategy().prop_map(|name| format!("[{name}]")),
        (0usize..8).prop_map(|index| format!("[{index}]")),
    ];
    (identifier_strategy(), prop::collection::vec(tail, 0..4))
        .prop_map(|(head, tail)| format!("{head}{}", tail.concat()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_codec::PropertyPath;

    proptest! {
        #[test]
        fn generated_paths_parse(path in property_path_strategy()) {
            prop_assert!(PropertyPath::parse(&path).is_ok());
        }

        #[test]
        fn customer_rows_have_every_column(row in customer_row_strategy()) {
            prop_assert_eq!(row.len(), 3);
            prop_assert!(row.value("id").as_integer().is_some());
        }
    }
}
