//! Core types and pure logic for the Forma dynamic entity engine.
//!
//! This crate holds the metadata model, the definition validator, the type
//! compiler, DDL generation and value coercion. Nothing here touches a
//! database; the only runtime piece is the `tokio::sync` watch channel behind
//! [`cancel`]. Storage backends implement [`store::EntityStore`] and the
//! engine crate drives everything else.

pub mod cancel;
pub mod collab;
pub mod compile;
pub mod ddl;
pub mod definition;
pub mod error;
pub mod field;
pub mod interface;
pub mod query;
pub mod row;
pub mod schema;
pub mod script;
pub mod store;
pub mod validate;
pub mod value;

pub use error::{Error, Result};
