//! # Relmap Codec
//!
//! The dynamic data model shared by every Relmap crate.
//!
//! This crate provides:
//! - [`Value`]: the dynamic value stored in backend columns and instance fields
//! - [`Record`]: one raw backend row (column → value)
//! - [`PropertyPath`]: a small path language addressing nested fields
//! - [`Conditions`]: AND-ed filters evaluated against anything a path can
//!   be resolved on
//!
//! ## Usage
//!
//! ```
//! use relmap_codec::{Conditions, PropertyPath, Record, Value};
//!
//! let row = Record::new().with("id", 1).with("name", "Bob Fanger");
//!
//! let name = PropertyPath::parse("name").unwrap();
//! assert_eq!(name.get(&row.to_value()), Some(&Value::from("Bob Fanger")));
//!
//! let conditions = Conditions::from_pairs([("id >=", 0)]).unwrap();
//! assert!(conditions.matches(&row).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod condition;
mod error;
mod path;
mod record;
mod value;

pub use condition::{loose_eq, Condition, Conditions, Operator};
pub use error::{CodecError, CodecResult};
pub use path::{PathTarget, PropertyPath, Segment};
pub use record::Record;
pub use value::{Value, NULL_INDEX};
