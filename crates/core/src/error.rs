#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed or contradictory calculation configuration.
    #[error("Invalid parameters: {0}")]
    Parameter(String),
}

impl CoreError {
    /// Shorthand for building a [`CoreError::Parameter`].
    pub fn parameter(msg: impl Into<String>) -> Self {
        Self::Parameter(msg.into())
    }
}
