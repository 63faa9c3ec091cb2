//! Query Module - result-wrapping query builder and aggregation pipeline

pub mod builder;
pub mod pipeline;

pub use builder::ModelQuery;
pub use pipeline::Pipeline;

/// Result of a wrapping terminal: model instances, or the raw documents when
/// wrapping was skipped
#[derive(Debug, Clone)]
pub enum Wrapped<M, R> {
    Model(M),
    Raw(R),
}

impl<M, R> Wrapped<M, R> {
    pub fn is_wrapped(&self) -> bool {
        matches!(self, Wrapped::Model(_))
    }

    pub fn into_model(self) -> Option<M> {
        match self {
            Wrapped::Model(model) => Some(model),
            Wrapped::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<R> {
        match self {
            Wrapped::Model(_) => None,
            Wrapped::Raw(raw) => Some(raw),
        }
    }
}
