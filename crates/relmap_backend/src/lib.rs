//! # Relmap Backend
//!
//! The storage side of Relmap.
//!
//! This crate provides the contract the repository talks to and the
//! descriptors that tell it what is stored where. Backends are **raw record
//! stores**: they read and write flat rows and know nothing about instances,
//! identity or relations.
//!
//! ## Design Principles
//!
//! - Backends serve [`ModelConfig`] and [`JunctionConfig`] descriptors
//! - Queries are lazy [`RowSource`]s; a backend may accept pushed-down
//!   filters and projections or decline them
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Table store with an [`OperationLog`], for tests
//!   and ephemeral use
//!
//! ## Example
//!
//! ```rust
//! use relmap_backend::{table_config, Backend, InMemoryBackend, TableSchema};
//! use relmap_codec::{Record, Value};
//!
//! let backend = InMemoryBackend::new();
//! backend.create_table(TableSchema::new("customers")).unwrap();
//! backend.seed("customers", [Record::new().with("id", 1).with("name", "Bob")]).unwrap();
//!
//! let row = backend.get(&Record::new().with("id", 1), &table_config("customers")).unwrap();
//! assert_eq!(row.value("name"), Value::from("Bob"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod log;
mod memory;
mod model;

pub use backend::{Backend, BackendConfig, RowSource, StaticRows};
pub use error::{BackendError, BackendResult};
pub use log::{Operation, OperationLog};
pub use memory::{table_config, InMemoryBackend, TableSchema, DEFAULT_IDENTIFIER};
pub use model::{BelongsToConfig, HasManyConfig, JunctionConfig, ModelConfig};
