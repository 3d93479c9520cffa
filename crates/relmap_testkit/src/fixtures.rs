//! Test fixtures.
//!
//! The shop dataset used throughout the tests:
//!
//! | model      | table       | relations                                        |
//! |------------|-------------|--------------------------------------------------|
//! | `Customer` | `customers` | hasMany `orders`, `groups` (memberships), `ratings` |
//! | `Order`    | `orders`    | belongsTo `customer` (defaults to customer 1)    |
//! | `Group`    | `groups`    | hasMany `customers` (memberships)                |
//!
//! `memberships` and `ratings` are junctions keyed on
//! `(customer_id, group_id)`; `ratings` carries an extra `rating` column.

use std::sync::Arc;

use relmap_backend::{
    table_config, BelongsToConfig, HasManyConfig, InMemoryBackend, JunctionConfig, ModelConfig,
    Operation, TableSchema,
};
use relmap_codec::Record;
use relmap_core::Repository;

/// Builds the shop backend with its tables, rows, models and junctions.
pub fn shop_backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    for schema in [
        TableSchema::new("customers").auto_increment("id"),
        TableSchema::new("orders").auto_increment("id"),
        TableSchema::new("groups").auto_increment("id"),
        TableSchema::new("memberships").primary_key(["customer_id", "group_id"]),
        TableSchema::new("ratings").primary_key(["customer_id", "group_id"]),
    ] {
        backend
            .create_table(schema)
            .expect("Failed to create shop table");
    }

    let seed = |table: &str, rows: Vec<Record>| {
        backend.seed(table, rows).expect("Failed to seed shop table");
    };
    seed(
        "customers",
        vec![
            Record::new()
                .with("id", 1)
                .with("name", "Bob Fanger")
                .with("occupation", "Software ontwikkelaar"),
            Record::new()
                .with("id", 2)
                .with("name", "James Bond")
                .with("occupation", "Spion"),
        ],
    );
    seed(
        "orders",
        vec![
            Record::new().with("id", 1).with("product", "Kop koffie").with("customer_id", 1),
            Record::new().with("id", 2).with("product", "Walter PPK 9mm").with("customer_id", 2),
            Record::new().with("id", 3).with("product", "Spycam").with("customer_id", 2),
        ],
    );
    seed("groups", vec![Record::new().with("id", 1).with("title", "Hacker")]);
    seed(
        "memberships",
        vec![Record::new().with("customer_id", 1).with("group_id", 1)],
    );
    seed(
        "ratings",
        vec![Record::new()
            .with("customer_id", 1)
            .with("group_id", 1)
            .with("rating", 5)],
    );

    backend.register_model(
        ModelConfig::new("Customer", table_config("customers"))
            .columns(["id", "name", "occupation"])
            .has_many(
                "orders",
                HasManyConfig::new("Order", "customer_id").belongs_to("customer"),
            )
            .has_many(
                "groups",
                HasManyConfig::through("Group", "memberships", "customer_id", "group_id")
                    .reciprocal("customers"),
            )
            .has_many(
                "ratings",
                HasManyConfig::through("Group", "ratings", "customer_id", "group_id")
                    .field("rating", "rating"),
            ),
    );
    backend.register_model(
        ModelConfig::new("Order", table_config("orders"))
            .columns(["id", "product"])
            .default_value("product", "Untitled")
            .belongs_to(
                "customer",
                BelongsToConfig::new("Customer", "customer_id").default_id(1),
            ),
    );
    backend.register_model(
        ModelConfig::new("Group", table_config("groups"))
            .columns(["id", "title"])
            .has_many(
                "customers",
                HasManyConfig::through("Customer", "memberships", "group_id", "customer_id")
                    .reciprocal("groups"),
            ),
    );
    backend.register_junction(JunctionConfig::new("memberships", table_config("memberships")));
    backend.register_junction(JunctionConfig::new("ratings", table_config("ratings")));
    backend
}

/// A repository wired to a fresh shop backend.
///
/// The backend handle is kept so tests can count and inspect the
/// operations a scenario issues.
pub struct ShopFixture {
    /// The repository under test.
    pub repo: Repository,
    /// The backend serving every shop model.
    pub backend: Arc<InMemoryBackend>,
}

impl ShopFixture {
    /// Creates the fixture.
    pub fn new() -> Self {
        let backend = Arc::new(shop_backend());
        let repo = Repository::new();
        repo.register_backend(backend.clone())
            .expect("Failed to register shop backend");
        Self { repo, backend }
    }

    /// A second repository on the same backend, with its own identity map.
    pub fn second_repository(&self) -> Repository {
        let repo = Repository::new();
        repo.register_backend(self.backend.clone())
            .expect("Failed to register shop backend");
        repo
    }

    /// Number of backend operations issued so far.
    pub fn queries(&self) -> usize {
        self.backend.log().len()
    }

    /// Number of inserts, updates and deletes issued so far.
    pub fn writes(&self) -> usize {
        self.backend.log().writes()
    }

    /// The operations issued after `mark` (an earlier [`queries`](Self::queries)).
    pub fn since(&self, mark: usize) -> Vec<Operation> {
        self.backend.log().since(mark)
    }

    /// The statements issued after `mark`, rendered as text.
    pub fn statements_since(&self, mark: usize) -> Vec<String> {
        self.since(mark).iter().map(ToString::to_string).collect()
    }

    /// The stored rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.backend.rows(table).expect("Unknown shop table")
    }
}

impl Default for ShopFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_registers_every_model() {
        let shop = ShopFixture::new();
        assert_eq!(shop.repo.models(), vec!["Customer", "Group", "Order"]);
        shop.repo.validate_configs().unwrap();
        assert_eq!(shop.queries(), 0);
        assert_eq!(shop.rows("orders").len(), 3);
    }

    #[test]
    fn repositories_share_the_backend() {
        let shop = ShopFixture::new();
        let other = shop.second_repository();
        let a = shop.repo.get("Customer", 1).unwrap();
        let b = other.get("Customer", 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(shop.queries(), 2);
    }
}
