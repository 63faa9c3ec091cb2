//! Database Backend Abstractions
//!
//! Models reach a document database through the traits in [`core`]. The
//! in-memory backend is always available; the MongoDB one sits behind the
//! `mongodb` feature.

pub mod core;
pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub use self::core::*;
pub use memory::{InMemoryCollection, InMemoryDatabase};

#[cfg(feature = "mongodb")]
pub use mongo::{MongoCollection, MongoDatabase};
