use brew_core::KettleId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("kettle not found: {0}")]
    KettleNotFound(KettleId),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
