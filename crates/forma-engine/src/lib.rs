//! The Forma engine: definition lifecycle, schema publishing and generic
//! persistence over any [`forma_core::store::EntityStore`].
//!
//! # Wiring
//!
//! ```rust,ignore
//! let store = forma_store_sqlite::SqliteStore::open("forma.db").await?;
//! let engine = Arc::new(Engine::new(store, EngineConfig::default()));
//! ```
//!
//! The engine is `Send + Sync`; share it behind an `Arc`. Localization and
//! audit collaborators are swapped in with [`Engine::with_localizer`] and
//! [`Engine::with_audit`].

pub mod audit;
pub mod cache;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod keyed;
pub mod persistence;
pub mod publisher;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
