/// Error returned by a lifecycle observer to veto the current operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The instance is not acceptable for this write
    #[error("Validation error: {0}")]
    Validation(String),

    /// The observer itself failed while handling the event
    #[error("Observer error: {0}")]
    Observer(String),
}

impl EventError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn observer(message: impl Into<String>) -> Self {
        Self::Observer(message.into())
    }
}
