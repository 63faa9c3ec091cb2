//! Model System - Attribute declarations and per-instance state
//!
//! - `attributes`: the per-model attribute registry
//! - `definition`: model definitions and their builder
//! - `instance`: attribute values, dirty tracking and atomic baselines
//! - `lifecycle`: observer flows around persistence

pub mod attributes;
pub mod definition;
pub mod instance;
pub mod lifecycle;

pub use attributes::{AttrType, AttributeDescriptor, AttributeRegistry, ID_FIELD};
pub use definition::{ModelBuilder, ModelDefinition};
pub use instance::Instance;
pub use lifecycle::ModelLifecycle;
