use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown field attribute '{0}'")]
    UnknownField(String),
    #[error("failed to dispatch validation snapshot: {0}")]
    Dispatch(String),
}
