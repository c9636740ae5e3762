use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("invalid budget: {0}")]
    InvalidBudget(String),

    #[error("invalid attribution rules: {0}")]
    InvalidRules(String),
}
