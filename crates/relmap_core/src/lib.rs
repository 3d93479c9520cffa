//! # Relmap Core
//!
//! The in-process repository of Relmap.
//!
//! This crate provides:
//! - [`Repository`], an identity map binding backend rows to live
//!   [`Instance`] objects (one object per model and id)
//! - Lazy relations: belongsTo and hasMany fields start as placeholders and
//!   are substituted in place on first access
//! - [`Junction`] wrappers for many-to-many relations with extra columns
//! - [`Collection`] and [`RepositoryCollection`], lazy filterable sequences
//! - Save, delete, reload and diff with an explicit entry state machine
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use relmap_backend::{table_config, BelongsToConfig, HasManyConfig, InMemoryBackend, ModelConfig, TableSchema};
//! use relmap_codec::{Record, Value};
//! use relmap_core::Repository;
//!
//! let backend = InMemoryBackend::new();
//! backend.create_table(TableSchema::new("customers")).unwrap();
//! backend.create_table(TableSchema::new("orders").auto_increment("id")).unwrap();
//! backend.seed("customers", [Record::new().with("id", 1).with("name", "Bob")]).unwrap();
//! backend.register_model(
//!     ModelConfig::new("Customer", table_config("customers"))
//!         .columns(["id", "name"])
//!         .has_many("orders", HasManyConfig::new("Order", "customer_id").belongs_to("customer")),
//! );
//! backend.register_model(
//!     ModelConfig::new("Order", table_config("orders"))
//!         .columns(["id", "product"])
//!         .belongs_to("customer", BelongsToConfig::new("Customer", "customer_id")),
//! );
//!
//! let repo = Repository::new();
//! repo.register_backend(Arc::new(backend)).unwrap();
//!
//! let bob = repo.get("Customer", 1).unwrap();
//! let tea = repo.create("Order", Record::new().with("product", "Tea")).unwrap();
//! bob.push_related("orders", tea.clone()).unwrap();
//! repo.save("Customer", &bob).unwrap();
//!
//! assert_eq!(tea.get("id").unwrap(), Value::Integer(1));
//! assert_eq!(tea.get_path("customer.name").unwrap(), Value::from("Bob"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod error;
mod instance;
mod junction;
mod placeholder;
mod repository;
mod types;

pub use collection::{Collection, RepositoryCollection};
pub use config::{ConvertOptions, GetOptions, ReloadOptions, SaveOptions};
pub use error::{CoreError, CoreResult};
pub use instance::{BelongsToRef, Field, Instance, Related, WeakInstance};
pub use junction::Junction;
pub use placeholder::{BelongsToPlaceholder, HasManyPlaceholder};
pub use repository::{Change, Changes, Repository};
pub use types::{EntryState, InstanceId, Lifecycle, RepositoryId};
